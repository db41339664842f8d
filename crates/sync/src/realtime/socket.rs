// Realtime socket client: one websocket, many topics.
//
// A background worker owns the socket. Subscribers talk to it through a
// command queue, so `subscribe`/`unsubscribe` never block and can be called
// from `Drop`. When the socket drops, the worker reconnects with exponential
// backoff and re-joins every topic that is still subscribed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::sink::Sink;
use futures_util::{SinkExt, StreamExt};
use scout_common::protocol::realtime::{
    ChangeEvent, ChangeFilter, RealtimeFrame, EVENT_CLOSE, EVENT_ERROR,
};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use super::{ChangeFeed, Subscription};
use crate::config::ReconnectConfig;
use crate::error::{Result, SyncError};
use crate::session::SessionTokenProvider;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Reconnect policy ────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { base_delay: Duration::from_millis(250), max_delay: Duration::from_secs(30) }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl ReconnectPolicy {
    /// Backoff before the next attempt after `consecutive_failures` failures.
    pub fn delay(&self, consecutive_failures: u32) -> Duration {
        let exp = consecutive_failures.min(7);
        let nanos = self.base_delay.as_nanos().saturating_mul(1u128 << exp);
        let delay = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        delay.min(self.max_delay)
    }
}

// ── Connection state ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket, either idle (no topics) or waiting out a backoff.
    Disconnected,
    Connecting,
    Connected,
}

enum Command {
    Join { topic: String, filter: ChangeFilter, events: mpsc::UnboundedSender<ChangeEvent> },
    Leave { topic: String },
}

// ── Client ──────────────────────────────────────────────────────────

/// Handle to the realtime worker. Obtain the shared instance through
/// [`shared_realtime`](super::shared_realtime).
pub struct RealtimeClient {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// Spawn the socket worker. The socket opens once the first topic is joined.
    pub fn start(
        url: Url,
        tokens: Arc<dyn SessionTokenProvider>,
        heartbeat: Duration,
        policy: ReconnectPolicy,
    ) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Disconnected);
        let worker = SocketWorker {
            url,
            heartbeat,
            policy,
            topics: HashMap::new(),
            next_ref: 1,
            failures: 0,
            state: state_tx,
        };
        let task = tokio::spawn(worker.run(commands_rx, tokens.subscribe()));
        Self { commands, state, task }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ChangeFeed for RealtimeClient {
    fn subscribe(&self, topic: &str, filter: ChangeFilter) -> Result<Subscription> {
        let (events, rx) = mpsc::unbounded_channel();
        self.commands
            .send(Command::Join { topic: topic.to_string(), filter, events })
            .map_err(|_| SyncError::ChannelClosed)?;
        Ok(Subscription::new(topic, rx))
    }

    fn unsubscribe(&self, topic: &str) {
        let _ = self.commands.send(Command::Leave { topic: topic.to_string() });
    }
}

// ── Worker ──────────────────────────────────────────────────────────

struct TopicEntry {
    filter: ChangeFilter,
    events: mpsc::UnboundedSender<ChangeEvent>,
}

enum SessionEnd {
    Shutdown,
    Dropped(String),
}

struct SocketWorker {
    url: Url,
    heartbeat: Duration,
    policy: ReconnectPolicy,
    topics: HashMap<String, TopicEntry>,
    next_ref: u64,
    failures: u32,
    state: watch::Sender<ConnectionState>,
}

impl SocketWorker {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut tokens: watch::Receiver<Option<String>>,
    ) {
        loop {
            if self.topics.is_empty() {
                match commands.recv().await {
                    Some(command) => self.apply_offline(command),
                    None => return,
                }
                continue;
            }

            self.state.send_replace(ConnectionState::Connecting);
            match connect_async(self.url.as_str()).await {
                Ok((socket, _)) => {
                    self.failures = 0;
                    self.state.send_replace(ConnectionState::Connected);
                    info!(topics = self.topics.len(), "realtime socket connected");
                    match self.session(socket, &mut commands, &mut tokens).await {
                        SessionEnd::Shutdown => {
                            self.state.send_replace(ConnectionState::Disconnected);
                            return;
                        }
                        SessionEnd::Dropped(reason) => warn!(%reason, "realtime socket dropped"),
                    }
                }
                Err(error) => warn!(%error, "realtime connect failed"),
            }

            self.state.send_replace(ConnectionState::Disconnected);
            self.failures = self.failures.saturating_add(1);
            let delay = self.policy.delay(self.failures);
            debug!(?delay, failures = self.failures, "realtime reconnect scheduled");
            if !self.wait_offline(delay, &mut commands).await {
                return;
            }
        }
    }

    /// Sleep out a backoff while still tracking joins/leaves.
    async fn wait_offline(
        &mut self,
        delay: Duration,
        commands: &mut mpsc::UnboundedReceiver<Command>,
    ) -> bool {
        let deadline = sleep(delay);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return true,
                command = commands.recv() => match command {
                    Some(command) => self.apply_offline(command),
                    None => return false,
                },
            }
        }
    }

    fn apply_offline(&mut self, command: Command) {
        match command {
            Command::Join { topic, filter, events } => {
                self.topics.insert(topic, TopicEntry { filter, events });
            }
            Command::Leave { topic } => {
                self.topics.remove(&topic);
            }
        }
    }

    async fn session(
        &mut self,
        socket: Socket,
        commands: &mut mpsc::UnboundedReceiver<Command>,
        tokens: &mut watch::Receiver<Option<String>>,
    ) -> SessionEnd {
        let (mut sink, mut stream) = socket.split();

        let token = tokens.borrow_and_update().clone();
        let rejoin: Vec<(String, ChangeFilter)> =
            self.topics.iter().map(|(topic, entry)| (topic.clone(), entry.filter.clone())).collect();
        for (topic, filter) in rejoin {
            let frame = self.join_frame(&topic, &filter, token.as_deref());
            if let Err(reason) = send_frame(&mut sink, &frame).await {
                return SessionEnd::Dropped(reason);
            }
        }

        let mut heartbeat = interval_at(Instant::now() + self.heartbeat, self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tokens_open = true;

        loop {
            let outgoing: Vec<RealtimeFrame> = tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        let _ = sink.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    };
                    self.apply_online(command, tokens.borrow().as_deref()).into_iter().collect()
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        self.handle_text(text.as_str()).into_iter().collect()
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return SessionEnd::Dropped("closed by server".to_string());
                    }
                    Some(Ok(_)) => Vec::new(),
                    Some(Err(error)) => return SessionEnd::Dropped(error.to_string()),
                },
                _ = heartbeat.tick() => vec![RealtimeFrame::heartbeat(self.bump_ref())],
                changed = tokens.changed(), if tokens_open => {
                    if changed.is_err() {
                        tokens_open = false;
                        Vec::new()
                    } else {
                        let token = tokens.borrow_and_update().clone();
                        self.reauthorize(token.as_deref())
                    }
                }
            };

            for frame in outgoing {
                if let Err(reason) = send_frame(&mut sink, &frame).await {
                    return SessionEnd::Dropped(reason);
                }
            }
        }
    }

    fn apply_online(&mut self, command: Command, token: Option<&str>) -> Option<RealtimeFrame> {
        match command {
            Command::Join { topic, filter, events } => {
                let frame = self.join_frame(&topic, &filter, token);
                self.topics.insert(topic, TopicEntry { filter, events });
                Some(frame)
            }
            Command::Leave { topic } => {
                self.topics.remove(&topic)?;
                Some(RealtimeFrame::leave(&topic, self.bump_ref()))
            }
        }
    }

    /// Route one inbound frame. Returns a leave frame when the topic's
    /// subscriber has gone away.
    fn handle_text(&mut self, text: &str) -> Option<RealtimeFrame> {
        let frame: RealtimeFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(error) => {
                debug!(%error, "ignoring undecodable realtime frame");
                return None;
            }
        };

        if let Some(status) = frame.reply_status() {
            if status != "ok" {
                warn!(topic = %frame.topic, status, payload = %frame.payload, "realtime request rejected");
            }
            return None;
        }
        if frame.event == EVENT_ERROR || frame.event == EVENT_CLOSE {
            warn!(topic = %frame.topic, event = %frame.event, "realtime channel closed by server");
            return None;
        }

        let event = frame.change_event()?;
        let entry = self.topics.get(&frame.topic)?;
        if entry.events.send(event).is_ok() {
            return None;
        }
        debug!(topic = %frame.topic, "subscriber gone; leaving topic");
        self.topics.remove(&frame.topic);
        Some(RealtimeFrame::leave(&frame.topic, self.bump_ref()))
    }

    fn reauthorize(&mut self, token: Option<&str>) -> Vec<RealtimeFrame> {
        let Some(token) = token else {
            return Vec::new();
        };
        let topics: Vec<String> = self.topics.keys().cloned().collect();
        topics
            .iter()
            .map(|topic| RealtimeFrame::access_token(topic, token, self.bump_ref()))
            .collect()
    }

    fn join_frame(&mut self, topic: &str, filter: &ChangeFilter, token: Option<&str>) -> RealtimeFrame {
        RealtimeFrame::join(topic, std::slice::from_ref(filter), token, self.bump_ref())
    }

    fn bump_ref(&mut self) -> String {
        let reference = self.next_ref;
        self.next_ref = self.next_ref.saturating_add(1);
        reference.to_string()
    }
}

async fn send_frame<S>(sink: &mut S, frame: &RealtimeFrame) -> std::result::Result<(), String>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let text = serde_json::to_string(frame).map_err(|error| error.to_string())?;
    sink.send(Message::Text(text.into())).await.map_err(|error| error.to_string())
}
