//! JobEnvelope - キューに載る scan job の記述
//!
//! Producer と consumer が共有する wire schema。
//! optional field は「存在して有効」か「不在」のどちらか。
//! zero 値（nil UUID, 0, 空文字列, 空リスト）は decode 時に不在として扱う。

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Errors raised while building or decoding an envelope.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("{field} is not a valid UUID: {value:?}")]
    InvalidIdentifier {
        field: &'static str,
        value: String,
        #[source]
        source: uuid::Error,
    },

    #[error("{field} must not be the nil UUID")]
    NilIdentifier { field: &'static str },

    #[error("malformed job envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to encode job envelope: {0}")]
    Encode(#[source] serde_json::Error),
}

/// The unit of work placed on the queue. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    #[serde(rename = "scanID")]
    scan_id: Uuid,
    #[serde(rename = "customerAPIKey")]
    credential: String,
    #[serde(rename = "customerID")]
    customer_id: Uuid,
    target: String,
    #[serde(rename = "templateIDs", default, deserialize_with = "wire::lenient_uuids")]
    template_ids: Vec<Uuid>,

    #[serde(
        rename = "targetID",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::uuid_or_nil"
    )]
    target_id: Option<Uuid>,
    #[serde(
        rename = "vulnerabilityScanID",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::uuid_or_nil"
    )]
    vulnerability_scan_id: Option<Uuid>,
    #[serde(
        rename = "subDomainxScanID",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::uuid_or_nil"
    )]
    subdomain_scan_id: Option<Uuid>,
    #[serde(
        rename = "spiderxScanID",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::uuid_or_nil"
    )]
    spider_scan_id: Option<Uuid>,
    #[serde(
        rename = "chunkID",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::nonzero"
    )]
    chunk_id: Option<u64>,
    #[serde(
        rename = "templateTags",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::nonempty_string"
    )]
    template_tags: Option<String>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::nonempty_list"
    )]
    headers: Option<Vec<String>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::nonzero"
    )]
    delay: Option<u64>,
    // wire 上の綴りは "timout"（既存 producer 互換）。"timeout" は読むだけで、
    // 両方ある場合は "timout" が優先（decode で畳み込む）
    #[serde(
        rename = "timout",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::nonzero"
    )]
    timeout: Option<u64>,
    #[serde(
        rename = "timeout",
        default,
        skip_serializing,
        deserialize_with = "wire::nonzero"
    )]
    timeout_fallback: Option<u64>,
    #[serde(
        rename = "vpnConnectionURI",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::nonempty_string"
    )]
    vpn_connection_uri: Option<String>,
    #[serde(
        rename = "customerNotificationsKey",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::nonempty_string"
    )]
    notifications_key: Option<String>,
    #[serde(
        rename = "customerCanaryToken",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "wire::nonempty_string"
    )]
    canary_token: Option<String>,
}

impl JobEnvelope {
    /// Start building an envelope from its required fields.
    ///
    /// Identifiers are parsed in [`JobEnvelopeBuilder::build`].
    pub fn builder(
        scan_id: impl Into<String>,
        customer_id: impl Into<String>,
        credential: impl Into<String>,
        target: impl Into<String>,
    ) -> JobEnvelopeBuilder {
        JobEnvelopeBuilder {
            scan_id: scan_id.into(),
            customer_id: customer_id.into(),
            credential: credential.into(),
            target: target.into(),
            template_ids: Vec::new(),
            target_id: None,
            vulnerability_scan_id: None,
            subdomain_scan_id: None,
            spider_scan_id: None,
            chunk_id: None,
            template_tags: None,
            headers: None,
            delay: None,
            timeout: None,
            vpn_connection_uri: None,
            notifications_key: None,
            canary_token: None,
        }
    }

    /// Decode a message body. Required identifiers must be non-nil.
    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        let mut envelope: JobEnvelope = serde_json::from_slice(body)?;
        envelope.validate()?;
        if let Some(fallback) = envelope.timeout_fallback.take() {
            envelope.timeout.get_or_insert(fallback);
        }
        Ok(envelope)
    }

    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        serde_json::to_vec(self).map_err(EnvelopeError::Encode)
    }

    fn validate(&self) -> Result<(), EnvelopeError> {
        if self.scan_id.is_nil() {
            return Err(EnvelopeError::NilIdentifier { field: "scanID" });
        }
        if self.customer_id.is_nil() {
            return Err(EnvelopeError::NilIdentifier {
                field: "customerID",
            });
        }
        Ok(())
    }

    pub fn scan_id(&self) -> Uuid {
        self.scan_id
    }

    pub fn customer_id(&self) -> Uuid {
        self.customer_id
    }

    /// Opaque customer credential, sent as-is to the scan APIs.
    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn template_ids(&self) -> &[Uuid] {
        &self.template_ids
    }

    pub fn target_id(&self) -> Option<Uuid> {
        self.target_id
    }

    pub fn vulnerability_scan_id(&self) -> Option<Uuid> {
        self.vulnerability_scan_id
    }

    pub fn subdomain_scan_id(&self) -> Option<Uuid> {
        self.subdomain_scan_id
    }

    pub fn spider_scan_id(&self) -> Option<Uuid> {
        self.spider_scan_id
    }

    pub fn chunk_id(&self) -> Option<u64> {
        self.chunk_id
    }

    pub fn template_tags(&self) -> Option<&str> {
        self.template_tags.as_deref()
    }

    pub fn headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    pub fn delay(&self) -> Option<u64> {
        self.delay
    }

    pub fn timeout(&self) -> Option<u64> {
        self.timeout
    }

    pub fn vpn_connection_uri(&self) -> Option<&str> {
        self.vpn_connection_uri.as_deref()
    }

    pub fn notifications_key(&self) -> Option<&str> {
        self.notifications_key.as_deref()
    }

    pub fn canary_token(&self) -> Option<&str> {
        self.canary_token.as_deref()
    }
}

/// Builder for [`JobEnvelope`].
///
/// Optional identifiers given as the nil UUID and zero/empty values are
/// normalized to "absent", the same way decoding treats them.
#[derive(Debug, Clone)]
pub struct JobEnvelopeBuilder {
    scan_id: String,
    customer_id: String,
    credential: String,
    target: String,
    template_ids: Vec<Uuid>,
    target_id: Option<Uuid>,
    vulnerability_scan_id: Option<Uuid>,
    subdomain_scan_id: Option<Uuid>,
    spider_scan_id: Option<Uuid>,
    chunk_id: Option<u64>,
    template_tags: Option<String>,
    headers: Option<Vec<String>>,
    delay: Option<u64>,
    timeout: Option<u64>,
    vpn_connection_uri: Option<String>,
    notifications_key: Option<String>,
    canary_token: Option<String>,
}

impl JobEnvelopeBuilder {
    /// Template IDs. Entries that are not UUIDs are dropped.
    pub fn template_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.template_ids = ids
            .into_iter()
            .filter_map(|raw| {
                let raw = raw.as_ref().trim();
                match Uuid::parse_str(raw) {
                    Ok(id) => Some(id),
                    Err(err) => {
                        tracing::debug!(template_id = raw, error = %err, "dropping invalid template id");
                        None
                    }
                }
            })
            .collect();
        self
    }

    pub fn target_id(mut self, id: Uuid) -> Self {
        self.target_id = Some(id).filter(|id| !id.is_nil());
        self
    }

    pub fn vulnerability_scan_id(mut self, id: Uuid) -> Self {
        self.vulnerability_scan_id = Some(id).filter(|id| !id.is_nil());
        self
    }

    pub fn subdomain_scan_id(mut self, id: Uuid) -> Self {
        self.subdomain_scan_id = Some(id).filter(|id| !id.is_nil());
        self
    }

    pub fn spider_scan_id(mut self, id: Uuid) -> Self {
        self.spider_scan_id = Some(id).filter(|id| !id.is_nil());
        self
    }

    pub fn chunk_id(mut self, chunk: u64) -> Self {
        self.chunk_id = Some(chunk).filter(|c| *c != 0);
        self
    }

    pub fn template_tags(mut self, tags: impl Into<String>) -> Self {
        self.template_tags = Some(tags.into()).filter(|s| !s.is_empty());
        self
    }

    pub fn headers(mut self, headers: Vec<String>) -> Self {
        self.headers = Some(headers).filter(|h| !h.is_empty());
        self
    }

    pub fn delay(mut self, delay: u64) -> Self {
        self.delay = Some(delay).filter(|d| *d != 0);
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout).filter(|t| *t != 0);
        self
    }

    pub fn vpn_connection_uri(mut self, uri: impl Into<String>) -> Self {
        self.vpn_connection_uri = Some(uri.into()).filter(|s| !s.is_empty());
        self
    }

    pub fn notifications_key(mut self, key: impl Into<String>) -> Self {
        self.notifications_key = Some(key.into()).filter(|s| !s.is_empty());
        self
    }

    pub fn canary_token(mut self, token: impl Into<String>) -> Self {
        self.canary_token = Some(token.into()).filter(|s| !s.is_empty());
        self
    }

    /// Parse the required identifiers and produce the envelope.
    pub fn build(self) -> Result<JobEnvelope, EnvelopeError> {
        let scan_id = parse_required("scanID", &self.scan_id)?;
        let customer_id = parse_required("customerID", &self.customer_id)?;

        Ok(JobEnvelope {
            scan_id,
            credential: self.credential,
            customer_id,
            target: self.target,
            template_ids: self.template_ids,
            target_id: self.target_id,
            vulnerability_scan_id: self.vulnerability_scan_id,
            subdomain_scan_id: self.subdomain_scan_id,
            spider_scan_id: self.spider_scan_id,
            chunk_id: self.chunk_id,
            template_tags: self.template_tags,
            headers: self.headers,
            delay: self.delay,
            timeout: self.timeout,
            timeout_fallback: None,
            vpn_connection_uri: self.vpn_connection_uri,
            notifications_key: self.notifications_key,
            canary_token: self.canary_token,
        })
    }
}

fn parse_required(field: &'static str, raw: &str) -> Result<Uuid, EnvelopeError> {
    let id = Uuid::parse_str(raw.trim()).map_err(|source| EnvelopeError::InvalidIdentifier {
        field,
        value: raw.to_string(),
        source,
    })?;
    if id.is_nil() {
        return Err(EnvelopeError::NilIdentifier { field });
    }
    Ok(id)
}

/// Zero-value-as-absent deserializers.
mod wire {
    use super::*;

    pub(super) fn uuid_or_nil<'de, D>(d: D) -> Result<Option<Uuid>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(s) => {
                let id = Uuid::parse_str(s).map_err(serde::de::Error::custom)?;
                Ok(Some(id).filter(|id| !id.is_nil()))
            }
        }
    }

    pub(super) fn lenient_uuids<'de, D>(d: D) -> Result<Vec<Uuid>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<Vec<String>> = Option::deserialize(d)?;
        Ok(raw
            .unwrap_or_default()
            .iter()
            .filter_map(|s| Uuid::parse_str(s.trim()).ok())
            .collect())
    }

    pub(super) fn nonzero<'de, D>(d: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<u64> = Option::deserialize(d)?;
        Ok(raw.filter(|v| *v != 0))
    }

    pub(super) fn nonempty_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(d)?;
        Ok(raw.filter(|s| !s.is_empty()))
    }

    pub(super) fn nonempty_list<'de, D>(d: D) -> Result<Option<Vec<String>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<Vec<String>> = Option::deserialize(d)?;
        Ok(raw.filter(|v| !v.is_empty()))
    }
}
