//! Remote blob client.
//!
//! The remote side is a third-party JSON document store: one opaque
//! document per user, addressed by a server-assigned id, authenticated by
//! a single API key header. `RemoteStore` is the seam the orchestrator
//! syncs through; `BinClient` is the real HTTP implementation. The client
//! never retries — the orchestrator's poll/debounce cycles are the only
//! retry policy this system has.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{header::HeaderValue, Client as HttpClient, StatusCode};
use serde_json::Value;

/// Header carrying the API credential, as the bin provider expects it.
const ACCESS_KEY_HEADER: &str = "X-Access-Key";

/// Result of a replace call: the server either took the new payload or
/// reported that the id no longer exists. A stale id is an expected state
/// (the document was deleted or the pointer came from an old credential),
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    Replaced,
    StaleId,
}

/// Storage operations the sync orchestrator needs from the remote side.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store a new document, returning the server-assigned id.
    async fn create_document(&self, payload: &Value) -> Result<String>;

    /// Overwrite the document at `id` with `payload`.
    async fn replace_document(&self, id: &str, payload: &Value) -> Result<ReplaceOutcome>;

    /// Fetch the newest revision of the document at `id`. `None` means the
    /// document does not exist (empty state, not a failure).
    async fn fetch_latest(&self, id: &str) -> Result<Option<Value>>;

    /// List the ids of every document this credential can see. Summaries
    /// only — each candidate still has to be fetched to check ownership.
    async fn list_documents(&self) -> Result<Vec<String>>;
}

/// HTTP client for the bin service.
pub struct BinClient {
    http_client: HttpClient,
    base_url: String,
    api_key: String,
}

impl BinClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_header(&self) -> Result<HeaderValue> {
        HeaderValue::from_str(&self.api_key).context("API key is not a valid header value")
    }
}

#[async_trait]
impl RemoteStore for BinClient {
    async fn create_document(&self, payload: &Value) -> Result<String> {
        let resp = self
            .http_client
            .post(self.url("/documents"))
            .header(ACCESS_KEY_HEADER, self.auth_header()?)
            .json(payload)
            .send()
            .await
            .context("network error creating document")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to create document: {} - {}", status, body));
        }

        let body: Value = resp.json().await.context("invalid create response")?;
        extract_id(&body).ok_or_else(|| anyhow!("create response carries no document id: {body}"))
    }

    async fn replace_document(&self, id: &str, payload: &Value) -> Result<ReplaceOutcome> {
        let resp = self
            .http_client
            .put(self.url(&format!("/documents/{id}")))
            .header(ACCESS_KEY_HEADER, self.auth_header()?)
            .json(payload)
            .send()
            .await
            .context("network error replacing document")?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(ReplaceOutcome::StaleId);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to replace document: {} - {}", status, body));
        }
        Ok(ReplaceOutcome::Replaced)
    }

    async fn fetch_latest(&self, id: &str) -> Result<Option<Value>> {
        let resp = self
            .http_client
            .get(self.url(&format!("/documents/{id}/latest")))
            .header(ACCESS_KEY_HEADER, self.auth_header()?)
            .send()
            .await
            .context("network error fetching document")?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to fetch document: {} - {}", status, body));
        }

        let body: Value = resp.json().await.context("invalid fetch response")?;
        Ok(Some(unwrap_record(body)))
    }

    async fn list_documents(&self) -> Result<Vec<String>> {
        let resp = self
            .http_client
            .get(self.url("/documents"))
            .header(ACCESS_KEY_HEADER, self.auth_header()?)
            .send()
            .await
            .context("network error listing documents")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to list documents: {} - {}", status, body));
        }

        let body: Value = resp.json().await.context("invalid list response")?;
        Ok(extract_summary_ids(&body))
    }
}

/// Pull the stored document out of a fetch response. The service wraps the
/// payload under `record`; tolerate a bare payload too.
fn unwrap_record(body: Value) -> Value {
    match body {
        Value::Object(mut map) if map.contains_key("record") => {
            map.remove("record").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Find the document id in a create/summary value. Different deployments
/// put it in different places, so try the known spots in order.
fn extract_id(value: &Value) -> Option<String> {
    if let Value::String(s) = value {
        return Some(s.clone());
    }
    for candidate in [
        value.get("id"),
        value.get("record"),
        value.get("metadata").and_then(|m| m.get("id")),
    ] {
        match candidate {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Ids from a list response: an array of summaries, either bare or wrapped
/// under a `records` key. Entries that carry no id are skipped.
fn extract_summary_ids(body: &Value) -> Vec<String> {
    let entries = match body {
        Value::Array(entries) => entries.as_slice(),
        Value::Object(map) => match map.get("records").and_then(Value::as_array) {
            Some(entries) => entries.as_slice(),
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    entries.iter().filter_map(extract_id).collect()
}
