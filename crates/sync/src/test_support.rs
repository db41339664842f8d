// In-memory backend and change feed shared by unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use scout_common::protocol::realtime::{ChangeEvent, ChangeFilter};
use scout_common::protocol::rpc::{RpcEnvelope, RpcRequest};
use scout_common::types::BriefId;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::backend::Backend;
use crate::error::{Result, SyncError};
use crate::realtime::{ChangeFeed, Subscription};

enum Reply {
    Envelope(RpcEnvelope),
    Transport(String),
}

#[derive(Default)]
struct BackendState {
    rows: HashMap<String, Vec<Value>>,
    failing_tables: HashMap<String, String>,
    fetch_delays: HashMap<BriefId, Duration>,
    fetches: Vec<(String, BriefId)>,
    replies: HashMap<String, VecDeque<Reply>>,
    invoke_delays: HashMap<String, Duration>,
    calls: Vec<RpcRequest>,
}

/// Backend double: canned rows per table, queued replies per action.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_rows(&self, table: &str, rows: Vec<Value>) {
        self.state.lock().unwrap().rows.insert(table.to_string(), rows);
    }

    pub fn fail_table(&self, table: &str, message: &str) {
        self.state.lock().unwrap().failing_tables.insert(table.to_string(), message.to_string());
    }

    pub fn heal_table(&self, table: &str) {
        self.state.lock().unwrap().failing_tables.remove(table);
    }

    pub fn delay_fetches(&self, brief_id: &BriefId, delay: Duration) {
        self.state.lock().unwrap().fetch_delays.insert(brief_id.clone(), delay);
    }

    pub fn delay_action(&self, action: &str, delay: Duration) {
        self.state.lock().unwrap().invoke_delays.insert(action.to_string(), delay);
    }

    pub fn reply(&self, action: &str, envelope: RpcEnvelope) {
        self.push(action, Reply::Envelope(envelope));
    }

    pub fn fail_transport(&self, action: &str, message: &str) {
        self.push(action, Reply::Transport(message.to_string()));
    }

    fn push(&self, action: &str, reply: Reply) {
        self.state.lock().unwrap().replies.entry(action.to_string()).or_default().push_back(reply);
    }

    pub fn calls(&self) -> Vec<RpcRequest> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_for(&self, action: &str) -> Vec<RpcRequest> {
        self.calls().into_iter().filter(|call| call.action == action).collect()
    }

    pub fn fetch_count(&self, table: &str) -> usize {
        self.state.lock().unwrap().fetches.iter().filter(|(t, _)| t == table).count()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn fetch_rows(&self, table: &str, brief_id: &BriefId) -> Result<Vec<Value>> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.fetches.push((table.to_string(), brief_id.clone()));
            state.fetch_delays.get(brief_id).copied()
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();
        if let Some(message) = state.failing_tables.get(table) {
            return Err(SyncError::Transport(message.clone()));
        }
        Ok(state
            .rows
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.get("brief_id").and_then(Value::as_str) == Some(brief_id.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn invoke(&self, request: RpcRequest) -> Result<RpcEnvelope> {
        let (reply, delay) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(request.clone());
            let reply = state.replies.get_mut(&request.action).and_then(VecDeque::pop_front);
            (reply, state.invoke_delays.get(&request.action).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match reply {
            Some(Reply::Envelope(envelope)) => Ok(envelope),
            Some(Reply::Transport(message)) => Err(SyncError::Transport(message)),
            None => Ok(RpcEnvelope::ok(Value::Null)),
        }
    }
}

#[derive(Default)]
struct FeedState {
    senders: HashMap<String, mpsc::UnboundedSender<ChangeEvent>>,
    filters: Vec<(String, ChangeFilter)>,
    unsubscribed: Vec<String>,
    fail: bool,
}

/// Change feed double: tests push events by topic.
#[derive(Default)]
pub struct MockFeed {
    state: Mutex<FeedState>,
}

impl MockFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_subscribes(&self, fail: bool) {
        self.state.lock().unwrap().fail = fail;
    }

    /// Deliver `event` on `topic`. Returns false when nobody is subscribed.
    pub fn emit(&self, topic: &str, event: ChangeEvent) -> bool {
        let state = self.state.lock().unwrap();
        state.senders.get(topic).is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn subscribe_count(&self) -> usize {
        self.state.lock().unwrap().filters.len()
    }

    pub fn filters(&self) -> Vec<(String, ChangeFilter)> {
        self.state.lock().unwrap().filters.clone()
    }

    pub fn active_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> =
            self.state.lock().unwrap().senders.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.state.lock().unwrap().unsubscribed.clone()
    }
}

impl ChangeFeed for MockFeed {
    fn subscribe(&self, topic: &str, filter: ChangeFilter) -> Result<Subscription> {
        let mut state = self.state.lock().unwrap();
        if state.fail {
            return Err(SyncError::ChannelClosed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        assert!(
            state.senders.insert(topic.to_string(), tx).is_none(),
            "topic {topic} subscribed twice"
        );
        state.filters.push((topic.to_string(), filter));
        Ok(Subscription::new(topic, rx))
    }

    fn unsubscribe(&self, topic: &str) {
        let mut state = self.state.lock().unwrap();
        state.senders.remove(topic);
        state.unsubscribed.push(topic.to_string());
    }
}

/// Let spawned pump tasks drain what was emitted.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
