// Change-feed transport.
//
// Every channel in the process multiplexes over one realtime socket. The
// socket is created lazily by `shared_realtime()` and never constructed
// anywhere else; concurrent first callers all receive the same client.

pub mod socket;

use std::future::Future;
use std::sync::Arc;

use scout_common::protocol::realtime::{ChangeEvent, ChangeFilter};
use tokio::sync::{mpsc, OnceCell};

use crate::config::{Endpoints, ReconnectConfig, SyncTuning};
use crate::error::Result;
use crate::session::SessionTokenProvider;

pub use socket::{ConnectionState, ReconnectPolicy, RealtimeClient};

/// Table-scoped change subscriptions.
pub trait ChangeFeed: Send + Sync {
    /// Start delivering changes matching `filter` on `topic`.
    fn subscribe(&self, topic: &str, filter: ChangeFilter) -> Result<Subscription>;

    /// Stop delivery on `topic` and release its transport resources.
    fn unsubscribe(&self, topic: &str);
}

/// Receiving end of one topic subscription.
#[derive(Debug)]
pub struct Subscription {
    topic: String,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, events: mpsc::UnboundedReceiver<ChangeEvent>) -> Self {
        Self { topic: topic.into(), events }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next change, or `None` once the transport dropped the topic.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

// ── Shared transport accessor ──────────────────────────────────────

/// A lazily constructed, process-wide value.
///
/// The first caller runs `init`; callers racing with it wait for that
/// construction and receive the same instance.
pub struct LazyShared<T> {
    cell: OnceCell<Arc<T>>,
}

impl<T> LazyShared<T> {
    pub const fn new() -> Self {
        Self { cell: OnceCell::const_new() }
    }

    pub async fn get_or_init<F, Fut>(&self, init: F) -> Arc<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.cell.get_or_init(|| async { Arc::new(init().await) }).await.clone()
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }
}

impl<T> Default for LazyShared<T> {
    fn default() -> Self {
        Self::new()
    }
}

static SHARED_REALTIME: LazyShared<RealtimeClient> = LazyShared::new();

/// The process-wide realtime client. Must be called from a tokio runtime.
pub async fn shared_realtime(
    endpoints: &Endpoints,
    tuning: &SyncTuning,
    reconnect: &ReconnectConfig,
    tokens: Arc<dyn SessionTokenProvider>,
) -> Result<Arc<RealtimeClient>> {
    let url = endpoints.realtime_url()?;
    let heartbeat = tuning.heartbeat_interval();
    let policy = ReconnectPolicy::from(reconnect);
    Ok(SHARED_REALTIME
        .get_or_init(move || async move { RealtimeClient::start(url, tokens, heartbeat, policy) })
        .await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_first_callers_share_one_instance() {
        static SLOT: LazyShared<usize> = LazyShared::new();
        static BUILDS: AtomicUsize = AtomicUsize::new(0);

        let init = || async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            BUILDS.fetch_add(1, Ordering::SeqCst)
        };

        let handles: Vec<_> =
            (0..8).map(|_| tokio::spawn(async move { SLOT.get_or_init(init).await })).collect();

        let mut instances = Vec::new();
        for handle in handles {
            instances.push(handle.await.expect("task should finish"));
        }

        assert_eq!(BUILDS.load(Ordering::SeqCst), 1);
        assert!(instances.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert!(Arc::ptr_eq(&SLOT.get().expect("initialized"), &instances[0]));
    }
}
