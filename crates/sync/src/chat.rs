// Chat sync with optimistic send.
//
// A send inserts a temporary row and clears the draft before the RPC is
// issued. When the RPC answers with the stored row, it replaces the temporary
// one. When it answers without a row, the temporary row stays until the feed
// delivers the echo of the same message, which then takes its place. A failed
// RPC removes the temporary row again.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use scout_common::protocol::actions::SEND_MESSAGE;
use scout_common::protocol::rpc::RpcRequest;
use scout_common::types::{BriefId, ChatMessage};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{call_action, Backend};
use crate::channel::ChannelManager;
use crate::collection::{CollectionSync, RowChange};
use crate::error::{Result, SyncError};
use crate::lock;

pub const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Error)]
pub enum SendError {
    #[error("message is empty")]
    Blank,
    #[error("a message is already being sent for this brief")]
    InFlight,
    #[error("brief {0} is not mounted")]
    NotMounted(BriefId),
    #[error(transparent)]
    Failed(#[from] SyncError),
}

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

#[derive(Debug, Clone)]
struct PendingEcho {
    temp_id: String,
    brief_id: BriefId,
    content: String,
    echoed: bool,
}

struct ChatShared {
    messages: CollectionSync<ChatMessage>,
    backend: Arc<dyn Backend>,
    draft: watch::Sender<String>,
    sending: watch::Sender<BTreeSet<BriefId>>,
    send_error: watch::Sender<Option<String>>,
    pending: Mutex<Vec<PendingEcho>>,
}

impl ChatShared {
    /// A feed insert that matches a pending temporary row replaces it.
    fn reconcile(&self, row: &ChatMessage) {
        if row.is_ai || is_temp_id(&row.id) {
            return;
        }
        let temp_id = {
            let mut pending = lock(&self.pending);
            let Some(entry) = pending
                .iter_mut()
                .find(|entry| !entry.echoed && entry.brief_id == row.brief_id && entry.content == row.content)
            else {
                return;
            };
            entry.echoed = true;
            entry.temp_id.clone()
        };
        if self.messages.remove_local(&temp_id).is_some() {
            debug!(temp_id, server_id = %row.id, "optimistic message confirmed by feed");
        }
        self.forget_settled();
    }

    fn forget_settled(&self) {
        lock(&self.pending).retain(|entry| !entry.echoed || self.messages.row(&entry.temp_id).is_some());
    }

    fn take_pending(&self, temp_id: &str) -> Option<PendingEcho> {
        let mut pending = lock(&self.pending);
        let index = pending.iter().position(|entry| entry.temp_id == temp_id)?;
        Some(pending.remove(index))
    }
}

/// Chat messages of the mounted brief plus the composer state.
#[derive(Clone)]
pub struct ChatSync {
    shared: Arc<ChatShared>,
}

impl ChatSync {
    /// Must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn Backend>, channels: ChannelManager) -> Self {
        let messages = CollectionSync::new(Arc::clone(&backend), channels);
        let changes = messages.changes();
        let shared = Arc::new(ChatShared {
            messages,
            backend,
            draft: watch::channel(String::new()).0,
            sending: watch::channel(BTreeSet::new()).0,
            send_error: watch::channel(None).0,
            pending: Mutex::new(Vec::new()),
        });
        tokio::spawn(reconcile_echoes(Arc::downgrade(&shared), changes));
        Self { shared }
    }

    pub fn messages(&self) -> &CollectionSync<ChatMessage> {
        &self.shared.messages
    }

    pub async fn mount(&self, brief_id: BriefId) -> Result<()> {
        self.shared.send_error.send_replace(None);
        self.shared.messages.mount(brief_id).await
    }

    pub async fn unmount(&self) {
        self.shared.messages.unmount().await;
        lock(&self.shared.pending).clear();
    }

    // ── Composer ────────────────────────────────────────────────────

    pub fn set_draft(&self, text: impl Into<String>) {
        self.shared.draft.send_replace(text.into());
    }

    pub fn draft(&self) -> String {
        self.shared.draft.borrow().clone()
    }

    pub fn watch_draft(&self) -> watch::Receiver<String> {
        self.shared.draft.subscribe()
    }

    /// True while a send for the mounted brief is outstanding.
    pub fn sending(&self) -> bool {
        self.shared
            .messages
            .scope()
            .is_some_and(|scope| self.shared.sending.borrow().contains(&scope))
    }

    /// Briefs with a send outstanding.
    pub fn watch_sending(&self) -> watch::Receiver<BTreeSet<BriefId>> {
        self.shared.sending.subscribe()
    }

    pub fn send_error(&self) -> Option<String> {
        self.shared.send_error.borrow().clone()
    }

    // ── Sending ─────────────────────────────────────────────────────

    /// Send the current draft.
    pub async fn send_draft(&self, brief_id: &BriefId) -> Result<ChatMessage, SendError> {
        let draft = self.draft();
        self.send_message(brief_id, &draft).await
    }

    /// Optimistically send `text` on `brief_id`.
    ///
    /// Returns the row that now represents the message: the stored row when
    /// the backend answered with one, the temporary row otherwise.
    pub async fn send_message(&self, brief_id: &BriefId, text: &str) -> Result<ChatMessage, SendError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(SendError::Blank);
        }
        if self.shared.messages.scope().as_ref() != Some(brief_id) {
            return Err(SendError::NotMounted(brief_id.clone()));
        }
        let _guard = InFlight::acquire(&self.shared, brief_id)?;

        let temp = ChatMessage {
            id: format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()),
            brief_id: brief_id.clone(),
            user_id: None,
            content: content.to_string(),
            is_ai: false,
            created_at: Utc::now(),
        };
        lock(&self.shared.pending).push(PendingEcho {
            temp_id: temp.id.clone(),
            brief_id: brief_id.clone(),
            content: temp.content.clone(),
            echoed: false,
        });
        self.shared.messages.insert_local(temp.clone());
        self.shared.draft.send_replace(String::new());
        self.shared.send_error.send_replace(None);

        let request = RpcRequest::new(SEND_MESSAGE)
            .with_brief(brief_id)
            .with_param("content", content);
        match call_action(self.shared.backend.as_ref(), request).await {
            Ok(data) => Ok(self.confirm(temp, &data)),
            Err(error) => {
                self.shared.take_pending(&temp.id);
                self.shared.messages.remove_local(&temp.id);
                warn!(brief_id = %brief_id, %error, "send_message failed; optimistic row rolled back");
                self.shared.send_error.send_replace(Some(error.to_string()));
                Err(SendError::Failed(error))
            }
        }
    }

    fn confirm(&self, temp: ChatMessage, data: &Value) -> ChatMessage {
        let Some(stored) = stored_row(data, &temp) else {
            debug!(temp_id = %temp.id, "send_message returned no row; awaiting feed echo");
            let echoed = lock(&self.shared.pending)
                .iter()
                .any(|entry| entry.temp_id == temp.id && entry.echoed);
            if echoed {
                self.shared.take_pending(&temp.id);
            }
            return temp;
        };

        self.shared.take_pending(&temp.id);
        if self.shared.messages.replace_local(&temp.id, stored.clone()).is_none() {
            self.shared.messages.insert_local(stored.clone());
        }
        stored
    }
}

/// The stored copy of `temp` in a `send_message` response, if present.
///
/// Other rows in the response (such as the AI reply) are left to the feed.
fn stored_row(data: &Value, temp: &ChatMessage) -> Option<ChatMessage> {
    [Some(data), data.get("user_message"), data.get("message")]
        .into_iter()
        .flatten()
        .filter_map(|value| serde_json::from_value::<ChatMessage>(value.clone()).ok())
        .find(|row| !row.is_ai && row.brief_id == temp.brief_id && row.content == temp.content)
}

async fn reconcile_echoes(shared: Weak<ChatShared>, mut changes: broadcast::Receiver<RowChange<ChatMessage>>) {
    loop {
        match changes.recv().await {
            Ok(RowChange::Inserted(row)) => {
                let Some(shared) = shared.upgrade() else { return };
                shared.reconcile(&row);
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "chat reconcile lagged behind the feed");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// At most one outstanding send per brief.
struct InFlight<'a> {
    shared: &'a ChatShared,
    brief_id: BriefId,
}

impl<'a> InFlight<'a> {
    fn acquire(shared: &'a ChatShared, brief_id: &BriefId) -> Result<Self, SendError> {
        if shared.sending.send_if_modified(|sending| sending.insert(brief_id.clone())) {
            Ok(Self { shared, brief_id: brief_id.clone() })
        } else {
            Err(SendError::InFlight)
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.shared.sending.send_if_modified(|sending| sending.remove(&self.brief_id));
    }
}
