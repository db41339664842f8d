// Backend access: one-shot row fetches and action-dispatch RPC.
//
// `Backend` is the seam the sync units talk to. `HttpBackend` is the
// production implementation over reqwest; tests substitute in-memory mocks.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use scout_common::protocol::rpc::{normalize_list, RpcEnvelope, RpcRequest};
use scout_common::types::BriefId;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Endpoints;
use crate::error::{Result, SyncError};
use crate::session::SessionTokenProvider;

#[async_trait]
pub trait Backend: Send + Sync {
    /// All current rows of `table` belonging to `brief_id`, oldest first.
    async fn fetch_rows(&self, table: &str, brief_id: &BriefId) -> Result<Vec<Value>>;

    /// Dispatch one action and return its response envelope.
    async fn invoke(&self, request: RpcRequest) -> Result<RpcEnvelope>;
}

/// Invoke `request` and unwrap the envelope into its `data` payload.
pub async fn call_action(backend: &dyn Backend, request: RpcRequest) -> Result<Value> {
    let action = request.action.clone();
    let envelope = backend.invoke(request).await?;
    Ok(envelope.into_result(&action)?)
}

/// Decode a list-returning payload into typed rows.
///
/// Every list the backend returns goes through here. Unknown layouts yield
/// an empty list and a warning instead of an error. Rows that do not match
/// `T` are skipped with a warning.
pub fn decode_list<T: DeserializeOwned>(what: &str, payload: Value) -> Vec<T> {
    let Some(items) = normalize_list(payload).into_items() else {
        warn!(what, "unrecognized list response shape; treating as empty");
        return Vec::new();
    };
    decode_rows(what, items)
}

pub(crate) fn decode_rows<T: DeserializeOwned>(what: &str, items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(row) => Some(row),
            Err(error) => {
                warn!(what, %error, "skipping row that failed to decode");
                None
            }
        })
        .collect()
}

// ── HTTP implementation ─────────────────────────────────────────────

pub struct HttpBackend {
    http: reqwest::Client,
    endpoints: Endpoints,
    tokens: Arc<dyn SessionTokenProvider>,
}

impl HttpBackend {
    pub fn new(endpoints: Endpoints, tokens: Arc<dyn SessionTokenProvider>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(endpoints.api_key())
            .map_err(|_| SyncError::Config("api_key is not a valid header value".into()))?;
        headers.insert("apikey", api_key);
        let http = reqwest::Client::builder().default_headers(headers).build()?;
        Ok(Self { http, endpoints, tokens })
    }

    async fn bearer(&self) -> Result<String> {
        let token = self.tokens.access_token().await?;
        Ok(format!("Bearer {token}"))
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn fetch_rows(&self, table: &str, brief_id: &BriefId) -> Result<Vec<Value>> {
        let mut url = self.endpoints.rest_url(table)?;
        url.query_pairs_mut()
            .append_pair("select", "*")
            .append_pair("brief_id", &format!("eq.{brief_id}"))
            .append_pair("order", "created_at.asc");

        debug!(table, brief_id = %brief_id, "fetching rows");
        let response =
            self.http.get(url).header(AUTHORIZATION, self.bearer().await?).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http { status: status.as_u16(), body });
        }

        let body: Value = response.json().await?;
        Ok(decode_list(table, body))
    }

    async fn invoke(&self, request: RpcRequest) -> Result<RpcEnvelope> {
        let url = self.endpoints.function_url()?;
        debug!(action = %request.action, "invoking backend action");
        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.bearer().await?)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            // Functions report failures inside an envelope even on 4xx.
            if let Ok(value) = serde_json::from_str::<Value>(&body) {
                let envelope = RpcEnvelope::from_value(value);
                if !envelope.success && envelope.error.is_some() {
                    return Ok(envelope);
                }
            }
            return Err(SyncError::Http { status: status.as_u16(), body });
        }

        if body.trim().is_empty() {
            return Ok(RpcEnvelope::ok(Value::Null));
        }
        let value: Value = serde_json::from_str(&body)
            .map_err(|error| SyncError::decode(format!("{} response", request.action), error))?;
        Ok(RpcEnvelope::from_value(value))
    }
}
