// Session token boundary.
//
// The auth provider lives outside this crate. The sync core only needs to
// fetch the current bearer token and to hear about token changes (refresh,
// sign-out) so the realtime socket can re-authorize its channels.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{Result, SyncError};

#[async_trait]
pub trait SessionTokenProvider: Send + Sync {
    /// Current bearer token. May refresh under the hood.
    async fn access_token(&self) -> Result<String>;

    /// Auth state changes: `Some(token)` after sign-in/refresh, `None` after sign-out.
    fn subscribe(&self) -> watch::Receiver<Option<String>>;
}

/// A token that never changes. Used by the CLI and by tests.
pub struct StaticTokenProvider {
    token: watch::Sender<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Arc<Self> {
        let (tx, _) = watch::channel(Some(token.into()));
        Arc::new(Self { token: tx })
    }
}

#[async_trait]
impl SessionTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        self.token.borrow().clone().ok_or(SyncError::Unauthenticated)
    }

    fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.token.subscribe()
    }
}

/// A token slot the embedding application updates on every auth event.
pub struct SharedTokenProvider {
    token: watch::Sender<Option<String>>,
}

impl SharedTokenProvider {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(None);
        Arc::new(Self { token: tx })
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.token.send_if_modified(|current| {
            if current.as_deref() == Some(token.as_str()) {
                return false;
            }
            *current = Some(token);
            true
        });
    }

    pub fn clear(&self) {
        self.token.send_if_modified(|current| current.take().is_some());
    }
}

#[async_trait]
impl SessionTokenProvider for SharedTokenProvider {
    async fn access_token(&self) -> Result<String> {
        self.token.borrow().clone().ok_or(SyncError::Unauthenticated)
    }

    fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.token.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_always_returns_its_token() {
        let provider = StaticTokenProvider::new("jwt");
        assert_eq!(provider.access_token().await.unwrap(), "jwt");
        assert_eq!(provider.subscribe().borrow().as_deref(), Some("jwt"));
    }

    #[tokio::test]
    async fn shared_provider_publishes_refresh_and_sign_out() {
        let provider = SharedTokenProvider::new();
        let mut changes = provider.subscribe();
        assert!(matches!(provider.access_token().await, Err(SyncError::Unauthenticated)));

        provider.set_token("first");
        changes.changed().await.unwrap();
        assert_eq!(changes.borrow_and_update().as_deref(), Some("first"));

        provider.set_token("first");
        assert!(!changes.has_changed().unwrap(), "same token is not a change");

        provider.clear();
        changes.changed().await.unwrap();
        assert!(changes.borrow_and_update().is_none());
        assert!(matches!(provider.access_token().await, Err(SyncError::Unauthenticated)));
    }
}
