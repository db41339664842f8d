// Request/response types for the backend's action-dispatch functions.
//
// Every server-compute call is a POST of `{action, brief_id?, ...params}`
// answered by `{success, data?, error?}`. Some functions answer with a bare
// payload instead of the envelope; `RpcEnvelope::from_value` accepts both.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::BriefId;

/// An action-dispatch request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcRequest {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brief_id: Option<BriefId>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl RpcRequest {
    pub fn new(action: impl Into<String>) -> Self {
        Self { action: action.into(), brief_id: None, params: Map::new() }
    }

    pub fn with_brief(mut self, brief_id: &BriefId) -> Self {
        self.brief_id = Some(brief_id.clone());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }
}

/// The `{success, data?, error?}` response envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcEnvelope {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A call that reached the backend but reported `success: false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} failed: {message}")]
pub struct RpcFailure {
    pub action: String,
    pub message: String,
}

impl RpcEnvelope {
    pub fn ok(data: Value) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(message.into()) }
    }

    /// Interpret a raw response body.
    ///
    /// An object carrying a boolean `success` is an envelope. Anything else is
    /// treated as a successful bare payload.
    pub fn from_value(value: Value) -> Self {
        let is_envelope = value.get("success").is_some_and(Value::is_boolean);
        if is_envelope {
            let success = value.get("success").and_then(Value::as_bool).unwrap_or(false);
            let error = value.get("error").and_then(error_message);
            let data = match value {
                Value::Object(mut map) => map.remove("data"),
                _ => None,
            };
            return Self { success, data, error };
        }
        Self::ok(value)
    }

    pub fn into_result(self, action: &str) -> Result<Value, RpcFailure> {
        if self.success {
            return Ok(self.data.unwrap_or(Value::Null));
        }
        Err(RpcFailure {
            action: action.to_string(),
            message: self.error.unwrap_or_else(|| "request failed".to_string()),
        })
    }
}

fn error_message(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(value.to_string())),
        other => Some(other.to_string()),
    }
}

/// Which list layout a response used.
#[derive(Debug, Clone, PartialEq)]
pub enum ListShape {
    /// `{data: {items: [...]}}`
    DataItems(Vec<Value>),
    /// `{data: [...]}`
    Data(Vec<Value>),
    /// `{items: [...]}`
    Items(Vec<Value>),
    /// `[...]`
    Bare(Vec<Value>),
    /// `null`: no rows.
    Null,
    Unrecognized,
}

impl ListShape {
    /// Rows carried by a recognized shape; `None` when unrecognized.
    pub fn into_items(self) -> Option<Vec<Value>> {
        match self {
            Self::DataItems(items) | Self::Data(items) | Self::Items(items) | Self::Bare(items) => {
                Some(items)
            }
            Self::Null => Some(Vec::new()),
            Self::Unrecognized => None,
        }
    }
}

/// Classify a list-returning payload, trying known layouts in order.
pub fn normalize_list(value: Value) -> ListShape {
    match value {
        Value::Null => ListShape::Null,
        Value::Array(items) => ListShape::Bare(items),
        Value::Object(mut map) => {
            if let Some(data) = map.remove("data") {
                return match data {
                    Value::Array(items) => ListShape::Data(items),
                    Value::Object(mut inner) => match inner.remove("items") {
                        Some(Value::Array(items)) => ListShape::DataItems(items),
                        _ => ListShape::Unrecognized,
                    },
                    _ => ListShape::Unrecognized,
                };
            }
            match map.remove("items") {
                Some(Value::Array(items)) => ListShape::Items(items),
                _ => ListShape::Unrecognized,
            }
        }
        _ => ListShape::Unrecognized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_flattens_params_next_to_action() {
        let request = RpcRequest::new("send_message")
            .with_brief(&BriefId::new("brief-1"))
            .with_param("content", "hello");
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(value, json!({"action": "send_message", "brief_id": "brief-1", "content": "hello"}));
    }

    #[test]
    fn request_omits_missing_brief() {
        let value = serde_json::to_value(RpcRequest::new("get_user_role")).expect("serialize");
        assert_eq!(value, json!({"action": "get_user_role"}));
    }

    #[test]
    fn envelope_failure_becomes_rpc_failure() {
        let envelope =
            RpcEnvelope::from_value(json!({"success": false, "error": "quota exceeded"}));
        let error = envelope.into_result("launch_fast_search").expect_err("should fail");
        assert_eq!(error.message, "quota exceeded");
        assert_eq!(error.to_string(), "launch_fast_search failed: quota exceeded");
    }

    #[test]
    fn envelope_error_object_uses_its_message() {
        let envelope = RpcEnvelope::from_value(
            json!({"success": false, "error": {"message": "not allowed", "code": 403}}),
        );
        assert_eq!(envelope.error.as_deref(), Some("not allowed"));
    }

    #[test]
    fn bare_payload_is_treated_as_success() {
        let envelope = RpcEnvelope::from_value(json!([{"id": 1}]));
        assert!(envelope.success);
        assert_eq!(envelope.into_result("get_kpis").expect("ok"), json!([{"id": 1}]));
    }

    #[test]
    fn non_boolean_success_field_is_not_an_envelope() {
        let envelope = RpcEnvelope::from_value(json!({"success": "yes", "items": []}));
        assert!(envelope.success);
        assert_eq!(envelope.data, Some(json!({"success": "yes", "items": []})));
    }

    #[test]
    fn normalize_list_accepts_every_known_shape() {
        let rows = json!([{"id": "a"}, {"id": "b"}]);
        let expected = rows.as_array().cloned().expect("array");

        assert_eq!(
            normalize_list(json!({"data": {"items": rows.clone()}})),
            ListShape::DataItems(expected.clone())
        );
        assert_eq!(normalize_list(json!({"data": rows.clone()})), ListShape::Data(expected.clone()));
        assert_eq!(normalize_list(json!({"items": rows.clone()})), ListShape::Items(expected.clone()));
        assert_eq!(normalize_list(rows), ListShape::Bare(expected));
    }

    #[test]
    fn normalize_list_flags_unknown_shapes() {
        assert_eq!(normalize_list(json!({"rows": []})), ListShape::Unrecognized);
        assert_eq!(normalize_list(json!({"data": {"rows": []}})), ListShape::Unrecognized);
        assert_eq!(normalize_list(json!("oops")), ListShape::Unrecognized);
        assert_eq!(normalize_list(json!({"data": 3})).into_items(), None);
        assert_eq!(normalize_list(Value::Null).into_items(), Some(Vec::new()));
    }
}
