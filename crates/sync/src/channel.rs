// Channel lifecycle: at most one open change-feed channel per (entity, brief).

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use scout_common::protocol::realtime::{channel_topic, ChangeEvent, ChangeFilter};
use scout_common::types::BriefId;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::lock;
use crate::realtime::{ChangeFeed, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ChannelKey {
    entity: String,
    brief_id: BriefId,
}

/// Opens and tracks channels over a shared change feed.
#[derive(Clone)]
pub struct ChannelManager {
    feed: Arc<dyn ChangeFeed>,
    open: Arc<Mutex<HashSet<ChannelKey>>>,
}

impl ChannelManager {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self { feed, open: Arc::new(Mutex::new(HashSet::new())) }
    }

    /// Open the channel for `(entity, brief_id)`.
    ///
    /// Fails with [`SyncError::ChannelAlreadyOpen`] while a previous channel
    /// for the same pair has not been closed.
    pub fn open(&self, entity: &str, brief_id: &BriefId, filter: ChangeFilter) -> Result<Channel> {
        let key = ChannelKey { entity: entity.to_string(), brief_id: brief_id.clone() };
        if !lock(&self.open).insert(key.clone()) {
            return Err(SyncError::ChannelAlreadyOpen {
                entity: key.entity,
                brief_id: key.brief_id,
            });
        }

        let topic = channel_topic(entity, brief_id);
        let events = match self.feed.subscribe(&topic, filter) {
            Ok(events) => events,
            Err(error) => {
                lock(&self.open).remove(&key);
                return Err(error);
            }
        };

        debug!(entity, brief_id = %brief_id, topic, "channel opened");
        Ok(Channel {
            key,
            events,
            feed: Arc::clone(&self.feed),
            registry: Arc::clone(&self.open),
            open: true,
        })
    }

    pub fn open_count(&self) -> usize {
        lock(&self.open).len()
    }

    pub fn is_open(&self, entity: &str, brief_id: &BriefId) -> bool {
        let key = ChannelKey { entity: entity.to_string(), brief_id: brief_id.clone() };
        lock(&self.open).contains(&key)
    }
}

/// One open subscription. Closed by [`Channel::close`] or on drop, exactly once.
pub struct Channel {
    key: ChannelKey,
    events: Subscription,
    feed: Arc<dyn ChangeFeed>,
    registry: Arc<Mutex<HashSet<ChannelKey>>>,
    open: bool,
}

impl Channel {
    pub fn entity(&self) -> &str {
        &self.key.entity
    }

    pub fn brief_id(&self) -> &BriefId {
        &self.key.brief_id
    }

    pub fn topic(&self) -> &str {
        self.events.topic()
    }

    /// Next change on this channel; `None` once the transport dropped it.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        if !self.open {
            return None;
        }
        self.events.recv().await
    }

    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.feed.unsubscribe(self.events.topic());
        lock(&self.registry).remove(&self.key);
        debug!(entity = %self.key.entity, brief_id = %self.key.brief_id, "channel closed");
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockFeed;
    use scout_common::protocol::actions::TABLE_SOLUTIONS;

    fn filter(brief: &BriefId) -> ChangeFilter {
        ChangeFilter::for_brief(TABLE_SOLUTIONS, brief)
    }

    #[test]
    fn second_open_for_same_pair_is_rejected_until_closed() {
        let feed = MockFeed::new();
        let manager = ChannelManager::new(feed.clone());
        let brief = BriefId::new("brief-1");

        let first = manager.open(TABLE_SOLUTIONS, &brief, filter(&brief)).unwrap();
        let err = manager.open(TABLE_SOLUTIONS, &brief, filter(&brief)).err().unwrap();
        assert!(matches!(err, SyncError::ChannelAlreadyOpen { .. }));
        assert_eq!(feed.subscribe_count(), 1);

        first.close();
        assert!(!manager.is_open(TABLE_SOLUTIONS, &brief));
        assert_eq!(feed.unsubscribed(), vec!["realtime:solutions:brief-1".to_string()]);

        let reopened = manager.open(TABLE_SOLUTIONS, &brief, filter(&brief));
        assert!(reopened.is_ok());
    }

    #[test]
    fn different_briefs_get_independent_channels() {
        let feed = MockFeed::new();
        let manager = ChannelManager::new(feed);
        let a = BriefId::new("a");
        let b = BriefId::new("b");

        let _ca = manager.open(TABLE_SOLUTIONS, &a, filter(&a)).unwrap();
        let _cb = manager.open(TABLE_SOLUTIONS, &b, filter(&b)).unwrap();
        assert_eq!(manager.open_count(), 2);
    }

    #[test]
    fn drop_closes_exactly_once() {
        let feed = MockFeed::new();
        let manager = ChannelManager::new(feed.clone());
        let brief = BriefId::new("brief-1");

        {
            let _channel = manager.open(TABLE_SOLUTIONS, &brief, filter(&brief)).unwrap();
            assert_eq!(manager.open_count(), 1);
        }
        assert_eq!(manager.open_count(), 0);
        assert_eq!(feed.unsubscribed().len(), 1);
    }

    #[test]
    fn failed_subscribe_does_not_leave_the_pair_marked_open() {
        let feed = MockFeed::new();
        feed.fail_subscribes(true);
        let manager = ChannelManager::new(feed);
        let brief = BriefId::new("brief-1");

        assert!(manager.open(TABLE_SOLUTIONS, &brief, filter(&brief)).is_err());
        assert!(!manager.is_open(TABLE_SOLUTIONS, &brief));
    }

    #[tokio::test]
    async fn events_are_delivered_to_the_open_channel() {
        let feed = MockFeed::new();
        let manager = ChannelManager::new(feed.clone());
        let brief = BriefId::new("brief-1");
        let mut channel = manager.open(TABLE_SOLUTIONS, &brief, filter(&brief)).unwrap();

        assert!(feed.emit(
            "realtime:solutions:brief-1",
            ChangeEvent::insert(serde_json::json!({"id": "s1"}))
        ));
        let event = channel.recv().await.unwrap();
        assert_eq!(event.row_id().as_deref(), Some("s1"));
    }
}
