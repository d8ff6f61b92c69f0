//! S3ObjectStore - deep-scan 文書の取得
//!
//! `get_object` のたびに SDK 設定を読み直してクライアントを作る（attempt ごとに独立）。

use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Region},
    error::SdkError,
    operation::get_object::GetObjectError,
};

use crate::config::StorageConfig;
use crate::ports::{ObjectStore, StorageError};

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    bucket: String,
    region: String,
    /// MinIO / LocalStack 用
    endpoint: Option<String>,
}

impl S3ObjectStore {
    pub fn new(bucket: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            region: region.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        let store = Self::new(&config.bucket, &config.region);
        match &config.endpoint {
            Some(endpoint) => store.with_endpoint(endpoint),
            None => store,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn client(&self) -> Client {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        Client::from_conf(builder.build())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client()
            .await
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|ref err| map_get_error(err, key, &self.bucket))?;

        let body = response
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Other(format!("failed to read body: {err}")))?
            .into_bytes()
            .to_vec();

        tracing::debug!(bucket = %self.bucket, key, bytes = body.len(), "fetched object");
        Ok(body)
    }
}

fn map_get_error(err: &SdkError<GetObjectError>, key: &str, bucket: &str) -> StorageError {
    match err {
        SdkError::ServiceError(service_err) => {
            if matches!(service_err.err(), GetObjectError::NoSuchKey(_)) {
                return StorageError::NotFound {
                    key: key.to_string(),
                };
            }
            match service_err.raw().status().as_u16() {
                404 => {
                    return StorageError::NotFound {
                        key: key.to_string(),
                    };
                }
                403 => {
                    return StorageError::AccessDenied {
                        bucket: bucket.to_string(),
                    };
                }
                _ => {}
            }
        }
        SdkError::DispatchFailure(dispatch_err) => {
            if dispatch_err.is_io() || dispatch_err.is_timeout() {
                return StorageError::Connection(err.to_string());
            }
        }
        SdkError::TimeoutError(_) => return StorageError::Connection(err.to_string()),
        _ => {}
    }
    StorageError::Other(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_carries_endpoint() {
        let config = StorageConfig {
            bucket: "deep-scans".into(),
            region: "eu-west-2".into(),
            endpoint: Some("http://minio:9000".into()),
        };
        let store = S3ObjectStore::from_config(&config);
        assert_eq!(store.bucket(), "deep-scans");
        assert_eq!(store.endpoint.as_deref(), Some("http://minio:9000"));
    }
}
