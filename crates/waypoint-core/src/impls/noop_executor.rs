//! NoopExecutor - scan 本体が入るまでの置き場所

use async_trait::async_trait;

use crate::domain::{JobEnvelope, ScanOutcome};
use crate::ports::ScanExecutor;

/// Logs the resolved targets and reports them as scanned.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutor;

#[async_trait]
impl ScanExecutor for NoopExecutor {
    async fn execute(&self, job: &JobEnvelope, urls: &[String]) -> ScanOutcome {
        if urls.is_empty() {
            return ScanOutcome::no_targets();
        }
        tracing::debug!(
            scan_id = %job.scan_id(),
            target = job.target(),
            url_count = urls.len(),
            "no scanner configured, skipping execution"
        );
        ScanOutcome::success(urls.len())
    }
}
