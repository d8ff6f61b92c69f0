//! ScanExecutor port - URL 解決後に呼ばれる scan 本体

use async_trait::async_trait;

use crate::domain::{JobEnvelope, ScanOutcome};

/// Runs the scan for one job. Called once per task and awaited before the
/// task leaves the tracker.
#[async_trait]
pub trait ScanExecutor: Send + Sync {
    async fn execute(&self, job: &JobEnvelope, urls: &[String]) -> ScanOutcome;
}
