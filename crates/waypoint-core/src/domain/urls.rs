//! Wire shapes of the URL sources.

use serde::{Deserialize, Serialize};

/// One parameter attached to a retrieved URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlParameter {
    #[serde(alias = "Key")]
    pub key: String,
    #[serde(alias = "Value")]
    pub value: String,
    #[serde(rename = "type", alias = "Type")]
    pub kind: String,
}

impl UrlParameter {
    pub fn is_query(&self) -> bool {
        self.kind.eq_ignore_ascii_case("query")
    }
}

/// A URL record of a deep-scan document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UrlRecord {
    pub method: String,
    pub url: String,
    pub status_code: i64,
    pub content_length: i64,
    pub content_type: String,
    pub parameters: Vec<UrlParameter>,
}

/// Document stored at `customers/{customer}/deep-scans/{scan}[.{chunk}].json`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeepScanDocument {
    pub customer_id: String,
    pub scan_id: String,
    pub data: Vec<UrlRecord>,
}

/// `{success, data: [string]}` from the live-hosts and chunk endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UrlListResponse {
    pub success: bool,
    pub data: Vec<String>,
}

/// `{data: {<scanID>: {data: [{url}]}}}` from the spider results endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpiderResultsResponse {
    pub data: std::collections::HashMap<String, SpiderResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpiderResult {
    pub data: Vec<SpiderUrl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SpiderUrl {
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_scan_document_tolerates_missing_fields() {
        let doc: DeepScanDocument = serde_json::from_str(
            r#"{"customerId":"c","data":[{"url":"https://x.test/","parameters":[{"key":"a","value":"1","type":"QUERY"}]}]}"#,
        )
        .unwrap();
        assert_eq!(doc.customer_id, "c");
        assert_eq!(doc.data[0].status_code, 0);
        assert!(doc.data[0].parameters[0].is_query());
    }
}
