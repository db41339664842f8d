// Remote-backed collection sync.
//
// `CollectionSync<T>` owns the local cache of one entity scoped to a brief.
// It fills the cache with a one-shot fetch and keeps it live from a change
// feed channel. Exactly one pump task per collection applies feed events, so
// event application is serialized. Mutators edit the cache through the
// `*_local` methods; the cache mutex is never held across an await.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use scout_common::protocol::actions::{
    TABLE_CHAT_MESSAGES, TABLE_PRODUCTS, TABLE_SOLUTIONS, TABLE_SUPPLIERS,
};
use scout_common::protocol::realtime::{ChangeEvent, ChangeFilter, ChangeKind};
use scout_common::types::{BriefId, ChatMessage, Product, Solution, Supplier};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::{decode_rows, Backend};
use crate::channel::{Channel, ChannelManager};
use crate::error::{Result, SyncError};
use crate::lock;

const CHANGE_BUFFER: usize = 256;

/// A row that lives in a brief-scoped table.
pub trait SyncRow: Clone + PartialEq + Send + Sync + DeserializeOwned + 'static {
    const TABLE: &'static str;

    fn id(&self) -> &str;
    fn brief_id(&self) -> &BriefId;
    fn created_at(&self) -> DateTime<Utc>;
}

macro_rules! sync_row {
    ($row:ty, $table:expr) => {
        impl SyncRow for $row {
            const TABLE: &'static str = $table;

            fn id(&self) -> &str {
                &self.id
            }

            fn brief_id(&self) -> &BriefId {
                &self.brief_id
            }

            fn created_at(&self) -> DateTime<Utc> {
                self.created_at
            }
        }
    };
}

sync_row!(ChatMessage, TABLE_CHAT_MESSAGES);
sync_row!(Solution, TABLE_SOLUTIONS);
sync_row!(Supplier, TABLE_SUPPLIERS);
sync_row!(Product, TABLE_PRODUCTS);

fn sort_key<T: SyncRow>(row: &T) -> (DateTime<Utc>, &str) {
    (row.created_at(), row.id())
}

/// What one applied event or local mutation did to the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange<T> {
    Inserted(T),
    Updated { before: T, after: T },
    Deleted(T),
    /// The whole cache was replaced by a load or a scope change.
    Reloaded,
    Ignored,
}

/// Published view of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot<T> {
    pub scope: Option<BriefId>,
    pub rows: Vec<T>,
    pub loading: bool,
    pub error: Option<String>,
}

impl<T> Default for CollectionSnapshot<T> {
    fn default() -> Self {
        Self { scope: None, rows: Vec::new(), loading: false, error: None }
    }
}

/// Result of a `load` that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied { rows: usize },
    /// A newer scope or a newer load superseded this one.
    Stale,
}

struct State<T> {
    scope: Option<BriefId>,
    rows: Vec<T>,
    loading: bool,
    error: Option<String>,
    epoch: u64,
    load_seq: u64,
}

impl<T: SyncRow> State<T> {
    fn position(&self, id: &str) -> Option<usize> {
        self.rows.iter().position(|row| row.id() == id)
    }

    fn insert_sorted(&mut self, row: T) {
        let at = self.rows.partition_point(|existing| sort_key(existing) <= sort_key(&row));
        self.rows.insert(at, row);
    }

    fn in_scope(&self, row: &T) -> bool {
        self.scope.as_ref() == Some(row.brief_id())
    }

    fn insert(&mut self, row: T) -> RowChange<T> {
        if !self.in_scope(&row) || self.position(row.id()).is_some() {
            return RowChange::Ignored;
        }
        self.insert_sorted(row.clone());
        RowChange::Inserted(row)
    }

    fn update(&mut self, row: T) -> RowChange<T> {
        if !self.in_scope(&row) {
            return RowChange::Ignored;
        }
        let Some(index) = self.position(row.id()) else {
            return RowChange::Ignored;
        };
        let before = self.rows.remove(index);
        self.insert_sorted(row.clone());
        RowChange::Updated { before, after: row }
    }

    fn delete(&mut self, id: &str) -> RowChange<T> {
        match self.position(id) {
            Some(index) => RowChange::Deleted(self.rows.remove(index)),
            None => RowChange::Ignored,
        }
    }

    fn snapshot(&self) -> CollectionSnapshot<T> {
        CollectionSnapshot {
            scope: self.scope.clone(),
            rows: self.rows.clone(),
            loading: self.loading,
            error: self.error.clone(),
        }
    }
}

struct Pump {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl Pump {
    /// Stop the pump and wait until its channel is closed.
    async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(error) = self.task.await {
            debug!(%error, "collection pump ended abnormally");
        }
    }
}

struct Inner<T> {
    backend: Arc<dyn Backend>,
    channels: ChannelManager,
    state: Mutex<State<T>>,
    snapshot: watch::Sender<CollectionSnapshot<T>>,
    changes: broadcast::Sender<RowChange<T>>,
    version: watch::Sender<u64>,
    pump: tokio::sync::Mutex<Option<Pump>>,
}

/// Live cache of one entity for the mounted brief.
pub struct CollectionSync<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for CollectionSync<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T: SyncRow> CollectionSync<T> {
    pub fn new(backend: Arc<dyn Backend>, channels: ChannelManager) -> Self {
        let (snapshot, _) = watch::channel(CollectionSnapshot::default());
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let (version, _) = watch::channel(0);
        let state = State {
            scope: None,
            rows: Vec::new(),
            loading: false,
            error: None,
            epoch: 0,
            load_seq: 0,
        };
        Self {
            inner: Arc::new(Inner {
                backend,
                channels,
                state: Mutex::new(state),
                snapshot,
                changes,
                version,
                pump: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn entity(&self) -> &'static str {
        T::TABLE
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Scope the collection to `brief_id`: close the previous channel, reset
    /// the cache, load, then open the channel for the new scope.
    ///
    /// A failed load is recorded on the snapshot and does not stop the channel
    /// from opening. Only a channel failure is returned.
    pub async fn mount(&self, brief_id: BriefId) -> Result<()> {
        let epoch = {
            let mut pump = self.inner.pump.lock().await;
            if let Some(previous) = pump.take() {
                previous.stop().await;
            }
            self.begin_scope(Some(brief_id.clone()))
        };

        if let Err(error) = self.load_in(&brief_id, epoch).await {
            warn!(entity = T::TABLE, brief_id = %brief_id, %error, "initial load failed");
        }

        let mut pump = self.inner.pump.lock().await;
        if self.current_epoch() != epoch {
            debug!(entity = T::TABLE, brief_id = %brief_id, "mount superseded by a newer scope");
            return Ok(());
        }
        if let Some(previous) = pump.take() {
            previous.stop().await;
        }
        let channel = self.inner.channels.open(
            T::TABLE,
            &brief_id,
            ChangeFilter::for_brief(T::TABLE, &brief_id),
        )?;
        *pump = Some(spawn_pump(Arc::downgrade(&self.inner), channel));
        Ok(())
    }

    /// Close the channel and drop the cache.
    pub async fn unmount(&self) {
        let mut pump = self.inner.pump.lock().await;
        if let Some(previous) = pump.take() {
            previous.stop().await;
        }
        self.begin_scope(None);
    }

    fn begin_scope(&self, scope: Option<BriefId>) -> u64 {
        let mut state = lock(&self.inner.state);
        state.epoch = state.epoch.wrapping_add(1);
        state.scope = scope;
        state.rows.clear();
        state.loading = false;
        state.error = None;
        self.commit(&state, RowChange::Reloaded);
        state.epoch
    }

    fn current_epoch(&self) -> u64 {
        lock(&self.inner.state).epoch
    }

    pub fn scope(&self) -> Option<BriefId> {
        lock(&self.inner.state).scope.clone()
    }

    pub fn has_channel(&self) -> bool {
        self.scope().is_some_and(|brief| self.inner.channels.is_open(T::TABLE, &brief))
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Fetch every current row for `brief_id`.
    ///
    /// Fails with `NotMounted` unless `brief_id` is the active scope. A
    /// response that lands after the scope changed, or after a newer load
    /// started, is discarded. On error the cache keeps its last value.
    pub async fn load(&self, brief_id: &BriefId) -> Result<LoadOutcome> {
        let epoch = {
            let state = lock(&self.inner.state);
            if state.scope.as_ref() != Some(brief_id) {
                return Err(SyncError::NotMounted);
            }
            state.epoch
        };
        self.load_in(brief_id, epoch).await
    }

    /// Re-run `load` for the active scope.
    pub async fn refresh(&self) -> Result<LoadOutcome> {
        let brief_id = self.scope().ok_or(SyncError::NotMounted)?;
        self.load(&brief_id).await
    }

    async fn load_in(&self, brief_id: &BriefId, epoch: u64) -> Result<LoadOutcome> {
        let seq = {
            let mut state = lock(&self.inner.state);
            if state.epoch != epoch {
                return Ok(LoadOutcome::Stale);
            }
            state.load_seq = state.load_seq.wrapping_add(1);
            state.loading = true;
            self.publish(&state);
            state.load_seq
        };

        let fetched = self.inner.backend.fetch_rows(T::TABLE, brief_id).await;

        let mut state = lock(&self.inner.state);
        if state.epoch != epoch || state.load_seq != seq {
            debug!(entity = T::TABLE, brief_id = %brief_id, "discarding stale load response");
            return Ok(LoadOutcome::Stale);
        }
        state.loading = false;
        match fetched {
            Ok(values) => {
                let rows = normalize_rows::<T>(brief_id, values);
                let count = rows.len();
                state.rows = rows;
                state.error = None;
                self.commit(&state, RowChange::Reloaded);
                debug!(entity = T::TABLE, brief_id = %brief_id, rows = count, "collection loaded");
                Ok(LoadOutcome::Applied { rows: count })
            }
            Err(error) => {
                state.error = Some(error.to_string());
                self.publish(&state);
                Err(error)
            }
        }
    }

    // ── Feed events ─────────────────────────────────────────────────

    /// Apply one change-feed event to the cache.
    pub fn apply(&self, event: &ChangeEvent) -> RowChange<T> {
        let mut state = lock(&self.inner.state);
        let change = match event.event_type {
            ChangeKind::Insert => match decode_event_row::<T>(event.new.as_ref()) {
                Some(row) => state.insert(row),
                None => RowChange::Ignored,
            },
            ChangeKind::Update => match decode_event_row::<T>(event.new.as_ref()) {
                Some(row) => state.update(row),
                None => RowChange::Ignored,
            },
            ChangeKind::Delete => match event.row_id() {
                Some(id) => state.delete(&id),
                None => RowChange::Ignored,
            },
            ChangeKind::All => RowChange::Ignored,
        };
        if !matches!(change, RowChange::Ignored) {
            self.commit(&state, change.clone());
        }
        change
    }

    // ── Local mutations ─────────────────────────────────────────────

    /// Insert a locally fabricated row. False if its id is present or it is
    /// out of scope.
    pub fn insert_local(&self, row: T) -> bool {
        self.mutate(|state| state.insert(row))
    }

    /// Remove `id` and insert `row` in one step. Returns the removed row.
    pub fn replace_local(&self, id: &str, row: T) -> Option<T> {
        let mut state = lock(&self.inner.state);
        let index = state.position(id)?;
        let before = state.rows.remove(index);
        if state.in_scope(&row) && state.position(row.id()).is_none() {
            state.insert_sorted(row.clone());
            self.commit(&state, RowChange::Updated { before: before.clone(), after: row });
        } else {
            self.commit(&state, RowChange::Deleted(before.clone()));
        }
        Some(before)
    }

    pub fn remove_local(&self, id: &str) -> Option<T> {
        let mut state = lock(&self.inner.state);
        match state.delete(id) {
            RowChange::Deleted(row) => {
                self.commit(&state, RowChange::Deleted(row.clone()));
                Some(row)
            }
            _ => None,
        }
    }

    /// Edit row `id` in place. Returns `(before, after)`.
    pub fn update_local(&self, id: &str, edit: impl FnOnce(&mut T)) -> Option<(T, T)> {
        let mut state = lock(&self.inner.state);
        let mut after = state.rows.get(state.position(id)?)?.clone();
        edit(&mut after);
        match state.update(after) {
            RowChange::Updated { before, after } => {
                self.commit(&state, RowChange::Updated { before: before.clone(), after: after.clone() });
                Some((before, after))
            }
            _ => None,
        }
    }

    fn mutate(&self, f: impl FnOnce(&mut State<T>) -> RowChange<T>) -> bool {
        let mut state = lock(&self.inner.state);
        let change = f(&mut state);
        if matches!(change, RowChange::Ignored) {
            return false;
        }
        self.commit(&state, change);
        true
    }

    // ── Reads and observation ───────────────────────────────────────

    pub fn row(&self, id: &str) -> Option<T> {
        let state = lock(&self.inner.state);
        state.position(id).map(|index| state.rows[index].clone())
    }

    pub fn rows(&self) -> Vec<T> {
        lock(&self.inner.state).rows.clone()
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        lock(&self.inner.state).rows.iter().find(|row| predicate(row)).cloned()
    }

    pub fn snapshot(&self) -> CollectionSnapshot<T> {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot<T>> {
        self.inner.snapshot.subscribe()
    }

    pub fn changes(&self) -> broadcast::Receiver<RowChange<T>> {
        self.inner.changes.subscribe()
    }

    /// Counter bumped on every cache change, for type-erased triggers.
    pub fn version(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    fn publish(&self, state: &State<T>) {
        self.inner.snapshot.send_replace(state.snapshot());
    }

    fn commit(&self, state: &State<T>, change: RowChange<T>) {
        self.publish(state);
        self.inner.version.send_modify(|version| *version = version.wrapping_add(1));
        let _ = self.inner.changes.send(change);
    }
}

impl<T: SyncRow> Inner<T> {
    fn handle(self: Arc<Self>) -> CollectionSync<T> {
        CollectionSync { inner: self }
    }
}

fn spawn_pump<T: SyncRow>(inner: Weak<Inner<T>>, mut channel: Channel) -> Pump {
    let (stop, mut stopped) = oneshot::channel();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = &mut stopped => break,
                event = channel.recv() => {
                    let Some(event) = event else {
                        debug!(entity = T::TABLE, "change feed ended");
                        break;
                    };
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    inner.handle().apply(&event);
                }
            }
        }
        channel.close();
    });
    Pump { stop, task }
}

fn decode_event_row<T: SyncRow>(row: Option<&Value>) -> Option<T> {
    let row = row?;
    match serde_json::from_value::<T>(row.clone()) {
        Ok(row) => Some(row),
        Err(error) => {
            warn!(entity = T::TABLE, %error, "ignoring change event with undecodable row");
            None
        }
    }
}

/// Decode, scope-filter, de-duplicate and order a fetched row set.
fn normalize_rows<T: SyncRow>(brief_id: &BriefId, values: Vec<Value>) -> Vec<T> {
    let mut seen = HashSet::new();
    let mut rows: Vec<T> = decode_rows::<T>(T::TABLE, values)
        .into_iter()
        .filter(|row| row.brief_id() == brief_id)
        .filter(|row| seen.insert(row.id().to_string()))
        .collect();
    rows.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{settle, MockBackend, MockFeed};
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn message(id: &str, brief: &str, secs: i64) -> Value {
        json!({
            "id": id,
            "brief_id": brief,
            "content": format!("message {id}"),
            "is_ai": false,
            "created_at": DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
        })
    }

    fn fixture() -> (Arc<MockBackend>, Arc<MockFeed>, CollectionSync<ChatMessage>) {
        let backend = MockBackend::new();
        let feed = MockFeed::new();
        let sync = CollectionSync::new(backend.clone(), ChannelManager::new(feed.clone()));
        (backend, feed, sync)
    }

    fn ids(sync: &CollectionSync<ChatMessage>) -> Vec<String> {
        sync.rows().into_iter().map(|row| row.id).collect()
    }

    #[tokio::test]
    async fn mount_loads_in_created_order_then_opens_channel() {
        let (backend, feed, sync) = fixture();
        backend.set_rows(
            TABLE_CHAT_MESSAGES,
            vec![message("b", "brief-1", 2), message("a", "brief-1", 1), message("x", "other", 0)],
        );

        sync.mount(BriefId::new("brief-1")).await.unwrap();

        assert_eq!(ids(&sync), vec!["a", "b"]);
        assert_eq!(feed.active_topics(), vec!["realtime:chat_messages:brief-1"]);
        let (_, filter) = &feed.filters()[0];
        assert_eq!(filter.filter.as_deref(), Some("brief_id=eq.brief-1"));
        assert!(sync.has_channel());
    }

    #[tokio::test]
    async fn feed_insert_update_delete_are_applied() {
        let (_backend, feed, sync) = fixture();
        sync.mount(BriefId::new("brief-1")).await.unwrap();
        let topic = "realtime:chat_messages:brief-1";

        feed.emit(topic, ChangeEvent::insert(message("m2", "brief-1", 20)));
        feed.emit(topic, ChangeEvent::insert(message("m1", "brief-1", 10)));
        settle().await;
        assert_eq!(ids(&sync), vec!["m1", "m2"]);

        let mut edited = message("m1", "brief-1", 10);
        edited["content"] = json!("edited");
        feed.emit(topic, ChangeEvent::update(None, edited));
        feed.emit(topic, ChangeEvent::update(None, message("ghost", "brief-1", 5)));
        settle().await;
        assert_eq!(sync.row("m1").unwrap().content, "edited");
        assert!(sync.row("ghost").is_none());

        feed.emit(topic, ChangeEvent::delete(json!({"id": "m2"})));
        settle().await;
        assert_eq!(ids(&sync), vec!["m1"]);
    }

    #[tokio::test]
    async fn events_for_another_brief_are_ignored() {
        let (_backend, _feed, sync) = fixture();
        sync.mount(BriefId::new("brief-1")).await.unwrap();
        let change = sync.apply(&ChangeEvent::insert(message("m1", "brief-2", 1)));
        assert_eq!(change, RowChange::Ignored);
        assert!(sync.rows().is_empty());
    }

    #[tokio::test]
    async fn remount_closes_previous_channel_before_opening_next() {
        let (_backend, feed, sync) = fixture();
        sync.mount(BriefId::new("a")).await.unwrap();
        sync.mount(BriefId::new("b")).await.unwrap();

        assert_eq!(feed.unsubscribed(), vec!["realtime:chat_messages:a"]);
        assert_eq!(feed.active_topics(), vec!["realtime:chat_messages:b"]);
        assert!(!feed.emit("realtime:chat_messages:a", ChangeEvent::insert(message("m", "a", 1))));

        sync.unmount().await;
        assert!(feed.active_topics().is_empty());
        assert_eq!(sync.scope(), None);
    }

    #[tokio::test]
    async fn failed_load_keeps_last_rows_and_surfaces_error() {
        let (backend, feed, sync) = fixture();
        backend.set_rows(TABLE_CHAT_MESSAGES, vec![message("a", "brief-1", 1)]);
        sync.mount(BriefId::new("brief-1")).await.unwrap();

        backend.fail_table(TABLE_CHAT_MESSAGES, "connection reset");
        assert!(sync.refresh().await.is_err());
        let snapshot = sync.snapshot();
        assert_eq!(snapshot.rows.len(), 1);
        assert!(snapshot.error.unwrap().contains("connection reset"));
        assert!(!snapshot.loading);

        backend.heal_table(TABLE_CHAT_MESSAGES);
        assert_eq!(sync.refresh().await.unwrap(), LoadOutcome::Applied { rows: 1 });
        assert!(sync.snapshot().error.is_none());
        assert_eq!(feed.subscribe_count(), 1);
    }

    #[tokio::test]
    async fn failed_initial_load_still_opens_channel() {
        let (backend, feed, sync) = fixture();
        backend.fail_table(TABLE_CHAT_MESSAGES, "boom");
        sync.mount(BriefId::new("brief-1")).await.unwrap();
        assert!(sync.snapshot().error.is_some());
        assert_eq!(feed.active_topics().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_scope_response_is_discarded() {
        let (backend, _feed, sync) = fixture();
        let a = BriefId::new("a");
        let b = BriefId::new("b");
        backend.set_rows(TABLE_CHAT_MESSAGES, vec![message("from-a", "a", 1), message("from-b", "b", 1)]);
        backend.delay_fetches(&a, Duration::from_millis(500));
        backend.delay_fetches(&b, Duration::from_millis(10));

        let slow = {
            let sync = sync.clone();
            let a = a.clone();
            tokio::spawn(async move { sync.mount(a).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        sync.mount(b.clone()).await.unwrap();
        slow.await.unwrap().unwrap();

        assert_eq!(sync.scope(), Some(b.clone()));
        assert_eq!(ids(&sync), vec!["from-b"]);
        assert!(sync.inner.channels.is_open(TABLE_CHAT_MESSAGES, &b));
        assert!(!sync.inner.channels.is_open(TABLE_CHAT_MESSAGES, &a));
    }

    #[tokio::test(start_paused = true)]
    async fn older_load_in_same_scope_does_not_clobber_newer() {
        let (backend, _feed, sync) = fixture();
        let brief = BriefId::new("brief-1");
        sync.mount(brief.clone()).await.unwrap();

        backend.delay_fetches(&brief, Duration::from_millis(100));
        let first = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.refresh().await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        let second = {
            let sync = sync.clone();
            tokio::spawn(async move { sync.refresh().await })
        };

        assert_eq!(first.await.unwrap().unwrap(), LoadOutcome::Stale);
        assert_eq!(second.await.unwrap().unwrap(), LoadOutcome::Applied { rows: 0 });
        assert!(!sync.snapshot().loading);
    }

    #[tokio::test]
    async fn load_for_a_brief_that_is_not_mounted_is_rejected() {
        let (_backend, _feed, sync) = fixture();
        sync.mount(BriefId::new("a")).await.unwrap();
        assert!(matches!(sync.load(&BriefId::new("b")).await, Err(SyncError::NotMounted)));
    }

    #[tokio::test]
    async fn local_mutations_publish_changes() {
        let (_backend, _feed, sync) = fixture();
        sync.mount(BriefId::new("brief-1")).await.unwrap();
        let mut changes = sync.changes();
        let version = *sync.version().borrow();

        let row: ChatMessage = serde_json::from_value(message("temp-1", "brief-1", 1)).unwrap();
        assert!(sync.insert_local(row.clone()));
        assert!(!sync.insert_local(row.clone()));
        assert!(matches!(changes.recv().await.unwrap(), RowChange::Inserted(_)));

        let server: ChatMessage = serde_json::from_value(message("srv-1", "brief-1", 1)).unwrap();
        assert_eq!(sync.replace_local("temp-1", server).map(|r| r.id), Some("temp-1".into()));
        assert_eq!(ids(&sync), vec!["srv-1"]);

        assert!(sync.remove_local("srv-1").is_some());
        assert!(sync.rows().is_empty());
        assert_eq!(*sync.version().borrow(), version + 3);
    }

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap()
    }

    proptest! {
        #[test]
        fn repeated_inserts_keep_one_row_per_id(
            events in proptest::collection::vec((0u8..6, 0i64..50), 1..40)
        ) {
            let rt = runtime();
            rt.block_on(async {
                let (_backend, _feed, sync) = fixture();
                sync.mount(BriefId::new("brief-1")).await.unwrap();
                for (id, secs) in &events {
                    sync.apply(&ChangeEvent::insert(message(&format!("m{id}"), "brief-1", *secs)));
                }
                let rows = ids(&sync);
                let unique: HashSet<&String> = rows.iter().collect();
                assert_eq!(unique.len(), rows.len());
                let expected: HashSet<String> =
                    events.iter().map(|(id, _)| format!("m{id}")).collect();
                assert_eq!(unique.len(), expected.len());
            });
        }

        #[test]
        fn rows_stay_ordered_by_created_at(
            stamps in proptest::collection::vec(0i64..1_000, 1..40)
        ) {
            let rt = runtime();
            rt.block_on(async {
                let (_backend, _feed, sync) = fixture();
                sync.mount(BriefId::new("brief-1")).await.unwrap();
                for (n, secs) in stamps.iter().enumerate() {
                    sync.apply(&ChangeEvent::insert(message(&format!("m{n}"), "brief-1", *secs)));
                }
                let rows = sync.rows();
                assert!(rows.windows(2).all(|pair| pair[0].created_at <= pair[1].created_at));
            });
        }
    }
}
