//! UrlResolver - job の optional ID から URL の取得元を選び、URL 一覧を返す
//!
//! # 取得元（優先順）
//! 1. ObjectStorage: vulnerability scan ID あり → S3 の deep-scan 文書（retry あり）
//! 2. SpiderScan: spider scan ID あり → spider results API
//! 3. LiveHosts: chunk ID なし + target ID あり → live hosts API
//! 4. Chunk: それ以外 → scan chunk API
//!
//! 失敗はすべて「URL なし」に縮退する。呼び出し側にエラーは返さない。

use std::fmt;
use std::sync::Arc;

use url::Url;
use uuid::Uuid;

use super::retry::RetryPolicy;
use crate::domain::{DeepScanDocument, JobEnvelope, UrlParameter};
use crate::ports::{ObjectStore, ScanApi, StorageError};

/// Inputs of one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveRequest {
    pub credential: String,
    pub customer_id: Uuid,
    pub target_id: Option<Uuid>,
    pub scan_id: Uuid,
    pub spider_scan_id: Option<Uuid>,
    pub vulnerability_scan_id: Option<Uuid>,
    pub chunk_id: Option<u64>,
}

impl ResolveRequest {
    pub fn from_job(job: &JobEnvelope) -> Self {
        Self {
            credential: job.credential().to_string(),
            customer_id: job.customer_id(),
            target_id: job.target_id(),
            scan_id: job.scan_id(),
            spider_scan_id: job.spider_scan_id(),
            vulnerability_scan_id: job.vulnerability_scan_id(),
            chunk_id: job.chunk_id(),
        }
    }

    pub fn is_vulnerability_scan(&self) -> bool {
        self.vulnerability_scan_id.is_some()
    }
}

/// The four mutually exclusive retrieval paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    ObjectStorage,
    SpiderScan,
    LiveHosts,
    Chunk,
}

impl Strategy {
    /// Pure function of which optional identifiers are present.
    pub fn select(req: &ResolveRequest) -> Self {
        if req.is_vulnerability_scan() {
            Strategy::ObjectStorage
        } else if req.spider_scan_id.is_some() {
            Strategy::SpiderScan
        } else if req.chunk_id.is_none() && req.target_id.is_some() {
            Strategy::LiveHosts
        } else {
            Strategy::Chunk
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ObjectStorage => "object_storage",
            Strategy::SpiderScan => "spider_scan",
            Strategy::LiveHosts => "live_hosts",
            Strategy::Chunk => "chunk",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why one object-storage attempt did not produce a document.
#[derive(Debug, thiserror::Error)]
enum StorageMiss {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("failed to decode deep-scan document: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("document belongs to customer {found:?}")]
    CustomerMismatch { found: String },
}

/// Object key of a deep-scan document.
pub fn deep_scan_key(customer_id: Uuid, vulnerability_scan_id: Uuid, chunk_id: Option<u64>) -> String {
    match chunk_id {
        Some(chunk) => {
            format!("customers/{customer_id}/deep-scans/{vulnerability_scan_id}.{chunk}.json")
        }
        None => format!("customers/{customer_id}/deep-scans/{vulnerability_scan_id}.json"),
    }
}

/// Merge `query`-type parameters missing from the URL's query string.
///
/// Existing keys are never overwritten. The query is re-encoded with keys
/// sorted (values of one key keep their order). Unparseable URLs pass
/// through unchanged.
pub fn merge_query_params(raw: &str, params: &[UrlParameter]) -> String {
    let mut url = match Url::parse(raw) {
        Ok(url) => url,
        Err(err) => {
            tracing::warn!(url = raw, error = %err, "cannot parse retrieved url, keeping as is");
            return raw.to_string();
        }
    };

    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    for param in params.iter().filter(|p| p.is_query()) {
        if !pairs.iter().any(|(key, _)| *key == param.key) {
            pairs.push((param.key.clone(), param.value.clone()));
        }
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs.iter());
    }
    url.to_string()
}

/// Dispatches a [`ResolveRequest`] to one of the four strategies.
pub struct UrlResolver {
    store: Arc<dyn ObjectStore>,
    api: Arc<dyn ScanApi>,
    storage_retry: RetryPolicy,
}

impl UrlResolver {
    pub fn new(store: Arc<dyn ObjectStore>, api: Arc<dyn ScanApi>) -> Self {
        Self {
            store,
            api,
            storage_retry: RetryPolicy::object_storage(),
        }
    }

    pub fn with_storage_retry(mut self, policy: RetryPolicy) -> Self {
        self.storage_retry = policy;
        self
    }

    pub async fn resolve(&self, req: &ResolveRequest) -> Vec<String> {
        let strategy = Strategy::select(req);
        tracing::debug!(scan_id = %req.scan_id, %strategy, "resolving target urls");

        let result = match strategy {
            Strategy::ObjectStorage => {
                // select() が保証する
                let Some(vulnerability_scan_id) = req.vulnerability_scan_id else {
                    return Vec::new();
                };
                return self
                    .from_object_storage(req.customer_id, vulnerability_scan_id, req.chunk_id)
                    .await;
            }
            Strategy::SpiderScan => match req.spider_scan_id {
                Some(id) => self.api.spider_results(&req.credential, id).await,
                None => Ok(Vec::new()),
            },
            Strategy::LiveHosts => match req.target_id {
                Some(id) => self.api.live_hosts(&req.credential, id).await,
                None => Ok(Vec::new()),
            },
            Strategy::Chunk => {
                self.api
                    .scan_chunk(&req.credential, req.scan_id, req.chunk_id.unwrap_or(0))
                    .await
            }
        };

        match result {
            Ok(urls) => urls,
            Err(err) => {
                tracing::error!(scan_id = %req.scan_id, %strategy, error = %err, "failed to retrieve target urls");
                Vec::new()
            }
        }
    }

    async fn from_object_storage(
        &self,
        customer_id: Uuid,
        vulnerability_scan_id: Uuid,
        chunk_id: Option<u64>,
    ) -> Vec<String> {
        let key = deep_scan_key(customer_id, vulnerability_scan_id, chunk_id);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.fetch_document(&key, customer_id).await {
                Ok(doc) => {
                    return doc
                        .data
                        .iter()
                        .map(|record| merge_query_params(&record.url, &record.parameters))
                        .collect();
                }
                Err(miss) => {
                    tracing::trace!(key = %key, attempt, error = %miss, "deep-scan document miss");
                }
            }

            if !self.storage_retry.allows_another(attempt) {
                tracing::warn!(key = %key, attempts = attempt, "no urls found in object storage");
                return Vec::new();
            }
            tokio::time::sleep(self.storage_retry.next_delay(attempt)).await;
            tracing::warn!(key = %key, attempt = attempt + 1, "retrying deep-scan document fetch");
        }
    }

    async fn fetch_document(
        &self,
        key: &str,
        customer_id: Uuid,
    ) -> Result<DeepScanDocument, StorageMiss> {
        let body = self.store.get_object(key).await?;
        let doc: DeepScanDocument = serde_json::from_slice(&body)?;

        match Uuid::parse_str(doc.customer_id.trim()) {
            Ok(found) if found == customer_id => Ok(doc),
            _ => Err(StorageMiss::CustomerMismatch {
                found: doc.customer_id,
            }),
        }
    }
}
