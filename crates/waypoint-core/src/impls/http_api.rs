//! HttpScanApi - 内部 scan API の HTTP クライアント
//!
//! - 取得系は 7.5 秒、initialize は 60 秒で打ち切る
//! - 200 以外はすべて失敗（retry はしない）
//! - 空文字の URL は捨てる

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::domain::urls::{SpiderResultsResponse, UrlListResponse};
use crate::ports::{ApiError, ScanApi};

const QUERY_TIMEOUT: Duration = Duration::from_millis(7500);
const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(60);
const JSON_UTF8: &str = "application/json; charset=utf-8";

#[derive(Debug, Clone)]
pub struct HttpScanApi {
    client: Client,
    base_url: String,
    scanner: String,
    user_agent: String,
}

impl HttpScanApi {
    pub fn new(
        base_url: impl Into<String>,
        scanner: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            scanner: scanner.into(),
            user_agent: user_agent.into(),
        }
    }

    pub fn from_config(config: &ApiConfig) -> Self {
        Self::new(&config.base_url, &config.scanner, &config.user_agent)
    }

    fn request(&self, builder: RequestBuilder, credential: &str) -> RequestBuilder {
        builder
            .header("X-API-Key", credential)
            .header(CONTENT_TYPE, JSON_UTF8)
            .header(USER_AGENT, &self.user_agent)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, credential: &str) -> Result<T, ApiError> {
        tracing::debug!(url, "querying scan api");
        let response = self
            .request(self.client.get(url), credential)
            .timeout(QUERY_TIMEOUT)
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(ApiError::Status(status.as_u16()));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn url_list(&self, url: &str, credential: &str) -> Result<Vec<String>, ApiError> {
        let body: UrlListResponse = self.get_json(url, credential).await?;
        Ok(body.data.into_iter().filter(|u| !u.is_empty()).collect())
    }
}

#[async_trait]
impl ScanApi for HttpScanApi {
    async fn spider_results(
        &self,
        credential: &str,
        spider_scan_id: Uuid,
    ) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/api/spiderx/results/{}", self.base_url, spider_scan_id);
        let mut body: SpiderResultsResponse = self.get_json(&url, credential).await?;

        let urls = body
            .data
            .remove(&spider_scan_id.to_string())
            .map(|result| {
                result
                    .data
                    .into_iter()
                    .map(|entry| entry.url)
                    .filter(|u| !u.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Ok(urls)
    }

    async fn live_hosts(&self, credential: &str, target_id: Uuid) -> Result<Vec<String>, ApiError> {
        let url = format!("{}/api/hosts/{}/live", self.base_url, target_id);
        self.url_list(&url, credential).await
    }

    async fn scan_chunk(
        &self,
        credential: &str,
        scan_id: Uuid,
        chunk_id: u64,
    ) -> Result<Vec<String>, ApiError> {
        let url = format!(
            "{}/api/{}/scan/{}/chunks/{}",
            self.base_url, self.scanner, scan_id, chunk_id
        );
        self.url_list(&url, credential).await
    }

    async fn initialize_scan(
        &self,
        credential: &str,
        scan_id: Uuid,
        start_time_ms: i64,
    ) -> Result<(), ApiError> {
        let url = format!(
            "{}/api/{}/scan/{}/initialize",
            self.base_url, self.scanner, scan_id
        );
        let response = self
            .request(self.client.put(&url), credential)
            .timeout(INITIALIZE_TIMEOUT)
            .json(&serde_json::json!({ "startTime": start_time_ms }))
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(ApiError::Status(status.as_u16())),
        }
    }
}
