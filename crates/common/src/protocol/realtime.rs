// Change-feed wire types for the realtime websocket (phoenix channel framing).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::BriefId;

pub const PROTOCOL_VSN: &str = "1.0.0";
pub const PHOENIX_TOPIC: &str = "phoenix";
pub const DEFAULT_SCHEMA: &str = "public";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_ACCESS_TOKEN: &str = "access_token";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";

/// Row-level change kinds a channel can filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    #[serde(rename = "INSERT")]
    Insert,
    #[serde(rename = "UPDATE")]
    Update,
    #[serde(rename = "DELETE")]
    Delete,
    #[serde(rename = "*")]
    All,
}

impl ChangeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INSERT" => Some(Self::Insert),
            "UPDATE" => Some(Self::Update),
            "DELETE" => Some(Self::Delete),
            "*" => Some(Self::All),
            _ => None,
        }
    }
}

/// Table-scoped subscription predicate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeFilter {
    pub event: ChangeKind,
    pub schema: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ChangeFilter {
    /// All changes on `table` whose `brief_id` column equals `brief_id`.
    pub fn for_brief(table: &str, brief_id: &BriefId) -> Self {
        Self {
            event: ChangeKind::All,
            schema: DEFAULT_SCHEMA.to_string(),
            table: table.to_string(),
            filter: Some(format!("brief_id=eq.{brief_id}")),
        }
    }
}

/// One delivered row change: `{eventType, new, old}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub event_type: ChangeKind,
    #[serde(default)]
    pub new: Option<Value>,
    #[serde(default)]
    pub old: Option<Value>,
}

impl ChangeEvent {
    pub fn insert(row: Value) -> Self {
        Self { event_type: ChangeKind::Insert, new: Some(row), old: None }
    }

    pub fn update(old: Option<Value>, row: Value) -> Self {
        Self { event_type: ChangeKind::Update, new: Some(row), old }
    }

    pub fn delete(old: Value) -> Self {
        Self { event_type: ChangeKind::Delete, new: None, old: Some(old) }
    }

    /// Primary key of the affected row, read from `new` then `old`.
    pub fn row_id(&self) -> Option<String> {
        [self.new.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|row| row.get("id").and_then(id_string))
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Topic name for one entity scoped to one brief.
pub fn channel_topic(entity: &str, brief_id: &BriefId) -> String {
    format!("realtime:{entity}:{brief_id}")
}

/// A single phoenix frame, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RealtimeFrame {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl RealtimeFrame {
    pub fn join(
        topic: &str,
        filters: &[ChangeFilter],
        access_token: Option<&str>,
        reference: String,
    ) -> Self {
        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": filters,
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = Value::String(token.to_string());
        }
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload,
            join_ref: Some(reference.clone()),
            reference: Some(reference),
        }
    }

    pub fn leave(topic: &str, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            reference: Some(reference),
            join_ref: None,
        }
    }

    pub fn heartbeat(reference: String) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            reference: Some(reference),
            join_ref: None,
        }
    }

    pub fn access_token(topic: &str, token: &str, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_ACCESS_TOKEN.to_string(),
            payload: json!({ "access_token": token }),
            reference: Some(reference),
            join_ref: None,
        }
    }

    /// `Some(status)` for `phx_reply` frames.
    pub fn reply_status(&self) -> Option<&str> {
        if self.event != EVENT_REPLY {
            return None;
        }
        self.payload.get("status").and_then(Value::as_str)
    }

    /// Decode a row change carried by this frame.
    ///
    /// Accepts the `postgres_changes` envelope (`payload.data`) as well as the
    /// older per-kind events (`INSERT`/`UPDATE`/`DELETE` with `record` and
    /// `old_record` at the top of the payload).
    pub fn change_event(&self) -> Option<ChangeEvent> {
        let data = if self.event == EVENT_POSTGRES_CHANGES {
            self.payload.get("data")?
        } else if ChangeKind::parse(&self.event).is_some() {
            &self.payload
        } else {
            return None;
        };

        let kind = data
            .get("type")
            .or_else(|| data.get("eventType"))
            .and_then(Value::as_str)
            .and_then(ChangeKind::parse)?;
        let new = data.get("record").filter(|row| is_row(row)).cloned();
        let old = data.get("old_record").filter(|row| is_row(row)).cloned();
        Some(ChangeEvent { event_type: kind, new, old })
    }
}

fn is_row(value: &Value) -> bool {
    value.as_object().is_some_and(|row| !row.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_carries_filters_and_token() {
        let brief = BriefId::new("b-1");
        let frame = RealtimeFrame::join(
            "realtime:solutions:b-1",
            &[ChangeFilter::for_brief("solutions", &brief)],
            Some("jwt"),
            "3".to_string(),
        );
        let value = serde_json::to_value(&frame).expect("serialize");
        assert_eq!(value["event"], "phx_join");
        assert_eq!(value["ref"], "3");
        assert_eq!(value["join_ref"], "3");
        assert_eq!(value["payload"]["access_token"], "jwt");
        let change = &value["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["event"], "*");
        assert_eq!(change["table"], "solutions");
        assert_eq!(change["filter"], "brief_id=eq.b-1");
    }

    #[test]
    fn decodes_postgres_changes_update() {
        let frame: RealtimeFrame = serde_json::from_value(json!({
            "topic": "realtime:solutions:b-1",
            "event": "postgres_changes",
            "payload": {
                "ids": [42],
                "data": {
                    "type": "UPDATE",
                    "table": "solutions",
                    "schema": "public",
                    "record": {"id": "s1", "status": "validated"},
                    "old_record": {"id": "s1"},
                    "commit_timestamp": "2026-03-01T10:00:00Z"
                }
            },
            "ref": null
        }))
        .expect("frame should decode");

        let event = frame.change_event().expect("change event");
        assert_eq!(event.event_type, ChangeKind::Update);
        assert_eq!(event.row_id().as_deref(), Some("s1"));
        assert_eq!(event.new.expect("new row")["status"], "validated");
    }

    #[test]
    fn delete_without_new_record_keeps_old_id() {
        let frame: RealtimeFrame = serde_json::from_value(json!({
            "topic": "realtime:products:b-1",
            "event": "DELETE",
            "payload": {"type": "DELETE", "record": {}, "old_record": {"id": 9}},
            "ref": null
        }))
        .expect("frame should decode");

        let event = frame.change_event().expect("change event");
        assert_eq!(event.event_type, ChangeKind::Delete);
        assert!(event.new.is_none());
        assert_eq!(event.row_id().as_deref(), Some("9"));
    }

    #[test]
    fn replies_and_heartbeats_are_not_changes() {
        let reply: RealtimeFrame = serde_json::from_value(json!({
            "topic": "realtime:chat_messages:b-1",
            "event": "phx_reply",
            "payload": {"status": "ok", "response": {}},
            "ref": "1"
        }))
        .expect("reply should decode");
        assert_eq!(reply.reply_status(), Some("ok"));
        assert!(reply.change_event().is_none());
        assert!(RealtimeFrame::heartbeat("2".into()).change_event().is_none());
    }
}
