//! ScanApi port - 内部 scan API（spider results, live hosts, chunks, initialize）

use async_trait::async_trait;
use uuid::Uuid;

/// Errors from the HTTP scan APIs. None of them are retried.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("failed to decode response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait ScanApi: Send + Sync {
    /// URLs found by a spider scan, empty strings removed.
    async fn spider_results(&self, credential: &str, spider_scan_id: Uuid)
    -> Result<Vec<String>, ApiError>;

    /// Live hosts of a target, empty strings removed.
    async fn live_hosts(&self, credential: &str, target_id: Uuid) -> Result<Vec<String>, ApiError>;

    /// One chunk of a scan's target list, empty strings removed.
    async fn scan_chunk(
        &self,
        credential: &str,
        scan_id: Uuid,
        chunk_id: u64,
    ) -> Result<Vec<String>, ApiError>;

    /// Mark a scan as started (`startTime` in unix millis).
    async fn initialize_scan(
        &self,
        credential: &str,
        scan_id: Uuid,
        start_time_ms: i64,
    ) -> Result<(), ApiError>;
}
