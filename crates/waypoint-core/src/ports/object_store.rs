//! ObjectStore port - deep-scan 文書の取得元（S3）

use async_trait::async_trait;

/// Errors from object storage.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("access denied to bucket '{bucket}'")]
    AccessDenied { bucket: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("storage error: {0}")]
    Other(String),
}

/// Reads whole objects by key.
///
/// 実装は呼び出しごとにセッションを張り直してよい（retry の各 attempt は独立）。
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError>;
}
