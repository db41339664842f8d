// Solution sync: optimistic validation, refund notices, search activity.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use chrono::Utc;
use scout_common::protocol::actions::{LAUNCH_FAST_SEARCH, VALIDATE_SOLUTION};
use scout_common::protocol::rpc::RpcRequest;
use scout_common::solution::{SolutionStatus, TransitionError, TransitionOrigin};
use scout_common::types::{BriefId, Solution};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::backend::{call_action, Backend};
use crate::channel::ChannelManager;
use crate::collection::{CollectionSnapshot, CollectionSync, RowChange};
use crate::error::{Result, SyncError};
use crate::lock;

const NOTICE_BUFFER: usize = 32;

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error("solution {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("solution {0} is already being updated")]
    InFlight(String),
    #[error("solution {id} is {status}; a fast search needs a validated solution")]
    NotValidated { id: String, status: SolutionStatus },
    #[error(transparent)]
    Failed(#[from] SyncError),
}

/// A fast search quota unit was given back for this solution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefundNotice {
    pub solution_id: String,
    pub brief_id: BriefId,
    pub title: String,
}

struct SolutionShared {
    solutions: CollectionSync<Solution>,
    backend: Arc<dyn Backend>,
    busy: Mutex<HashSet<String>>,
    launched: Mutex<HashSet<String>>,
    notified: Mutex<HashSet<String>>,
    /// Rows restored by a local rollback, not yet seen on the change stream.
    reverted: Mutex<Vec<Solution>>,
    refunds: broadcast::Sender<RefundNotice>,
    search_active: watch::Sender<bool>,
}

impl SolutionShared {
    fn observe(&self, change: &RowChange<Solution>) {
        if let RowChange::Updated { before, after } = change {
            if let Some(error) = self.transition_anomaly(before, after) {
                warn!(solution_id = %after.id, %error, "server applied a status change outside the transition table");
            }
            if !before.fast_search_refunded && after.fast_search_refunded {
                if before.status.can_be_refunded() {
                    self.notify_refund(after);
                } else {
                    warn!(solution_id = %after.id, status = %before.status, "refund flag set on a solution without a search; ignoring");
                }
            }
        }
        self.recompute_search_active();
    }

    /// A status change the server made that the transition table does not allow.
    ///
    /// Changes made locally (optimistic writes and their rollbacks) are not checked.
    fn transition_anomaly(&self, before: &Solution, after: &Solution) -> Option<TransitionError> {
        if before.status == after.status {
            return None;
        }
        {
            let mut reverted = lock(&self.reverted);
            if let Some(index) = reverted.iter().position(|row| row == after) {
                reverted.remove(index);
                return None;
            }
        }
        if lock(&self.busy).contains(&after.id) {
            return None;
        }
        before.status.check_transition(after.status, TransitionOrigin::Server).err()
    }

    fn notify_refund(&self, solution: &Solution) {
        if !lock(&self.notified).insert(solution.id.clone()) {
            return;
        }
        lock(&self.launched).remove(&solution.id);
        info!(solution_id = %solution.id, "fast search refunded");
        let _ = self.refunds.send(RefundNotice {
            solution_id: solution.id.clone(),
            brief_id: solution.brief_id.clone(),
            title: solution.title.clone(),
        });
    }

    fn recompute_search_active(&self) {
        let rows = self.solutions.rows();
        let active = {
            let mut launched = lock(&self.launched);
            launched.retain(|id| {
                rows.iter().any(|row| {
                    &row.id == id && row.status == SolutionStatus::Validated && !row.fast_search_refunded
                })
            });
            !launched.is_empty() || rows.iter().any(|row| row.status == SolutionStatus::InProgress)
        };
        self.search_active.send_if_modified(|current| {
            let changed = *current != active;
            *current = active;
            changed
        });
    }
}

/// Solutions of the mounted brief.
#[derive(Clone)]
pub struct SolutionSync {
    shared: Arc<SolutionShared>,
}

impl SolutionSync {
    /// Must be called inside a tokio runtime.
    pub fn new(backend: Arc<dyn Backend>, channels: ChannelManager) -> Self {
        let solutions = CollectionSync::new(Arc::clone(&backend), channels);
        let changes = solutions.changes();
        let shared = Arc::new(SolutionShared {
            solutions,
            backend,
            busy: Mutex::new(HashSet::new()),
            launched: Mutex::new(HashSet::new()),
            notified: Mutex::new(HashSet::new()),
            reverted: Mutex::new(Vec::new()),
            refunds: broadcast::channel(NOTICE_BUFFER).0,
            search_active: watch::channel(false).0,
        });
        tokio::spawn(watch_changes(Arc::downgrade(&shared), changes));
        Self { shared }
    }

    pub fn solutions(&self) -> &CollectionSync<Solution> {
        &self.shared.solutions
    }

    pub fn subscribe(&self) -> watch::Receiver<CollectionSnapshot<Solution>> {
        self.shared.solutions.subscribe()
    }

    pub async fn mount(&self, brief_id: BriefId) -> Result<()> {
        self.reset();
        self.shared.solutions.mount(brief_id).await
    }

    pub async fn unmount(&self) {
        self.shared.solutions.unmount().await;
        self.reset();
    }

    fn reset(&self) {
        lock(&self.shared.notified).clear();
        lock(&self.shared.launched).clear();
        lock(&self.shared.reverted).clear();
        self.shared.search_active.send_replace(false);
    }

    /// One notice per refunded solution, however often the update is delivered.
    pub fn refund_notices(&self) -> broadcast::Receiver<RefundNotice> {
        self.shared.refunds.subscribe()
    }

    /// True while a fast search is launched or running for any solution.
    pub fn watch_search_active(&self) -> watch::Receiver<bool> {
        self.shared.search_active.subscribe()
    }

    pub fn is_busy(&self, solution_id: &str) -> bool {
        lock(&self.shared.busy).contains(solution_id)
    }

    /// Validate a proposed solution.
    ///
    /// The row shows `validated` immediately. If the RPC fails the row is
    /// restored to exactly what it was before.
    pub async fn validate(&self, solution_id: &str) -> Result<Solution, ValidateError> {
        let current = self
            .shared
            .solutions
            .row(solution_id)
            .ok_or_else(|| ValidateError::NotFound(solution_id.to_string()))?;
        current.status.check_transition(SolutionStatus::Validated, TransitionOrigin::Client)?;
        let _busy = Busy::acquire(&self.shared, solution_id)?;

        let now = Utc::now();
        let Some((before, optimistic)) = self.shared.solutions.update_local(solution_id, |row| {
            row.status = SolutionStatus::Validated;
            row.updated_at = now;
        }) else {
            return Err(ValidateError::NotFound(solution_id.to_string()));
        };

        let request = RpcRequest::new(VALIDATE_SOLUTION)
            .with_brief(&before.brief_id)
            .with_param("solution_id", solution_id);
        match call_action(self.shared.backend.as_ref(), request).await {
            Ok(data) => Ok(self.confirm(optimistic, &data)),
            Err(error) => {
                lock(&self.shared.reverted).push(before.clone());
                let restored = self.shared.solutions.update_local(solution_id, |row| {
                    if *row == optimistic {
                        *row = before.clone();
                    }
                });
                if !restored.is_some_and(|(_, after)| after == before) {
                    let mut reverted = lock(&self.shared.reverted);
                    if let Some(index) = reverted.iter().position(|row| *row == before) {
                        reverted.remove(index);
                    }
                    debug!(solution_id, "row changed during validation; keeping the newer state");
                }
                warn!(solution_id, %error, "validate_solution failed; rolled back");
                Err(ValidateError::Failed(error))
            }
        }
    }

    fn confirm(&self, optimistic: Solution, data: &Value) -> Solution {
        let stored = [Some(data), data.get("solution")]
            .into_iter()
            .flatten()
            .find_map(|value| serde_json::from_value::<Solution>(value.clone()).ok())
            .filter(|row| row.id == optimistic.id);
        let Some(stored) = stored else {
            return optimistic;
        };
        let replacement = stored.clone();
        self.shared.solutions.update_local(&optimistic.id, move |row| *row = replacement);
        stored
    }

    /// Ask the backend to start a fast search for a validated solution.
    ///
    /// The `in_progress` status is left to the feed; the solution only counts
    /// as searching so the supplier poller starts right away.
    pub async fn launch_fast_search(&self, solution_id: &str) -> Result<Value, ValidateError> {
        let current = self
            .shared
            .solutions
            .row(solution_id)
            .ok_or_else(|| ValidateError::NotFound(solution_id.to_string()))?;
        if current.status != SolutionStatus::Validated {
            return Err(ValidateError::NotValidated {
                id: solution_id.to_string(),
                status: current.status,
            });
        }
        let _busy = Busy::acquire(&self.shared, solution_id)?;

        let request = RpcRequest::new(LAUNCH_FAST_SEARCH)
            .with_brief(&current.brief_id)
            .with_param("solution_id", solution_id);
        let data = call_action(self.shared.backend.as_ref(), request).await?;
        lock(&self.shared.launched).insert(solution_id.to_string());
        self.shared.recompute_search_active();
        info!(solution_id, "fast search launched");
        Ok(data)
    }
}

async fn watch_changes(shared: Weak<SolutionShared>, mut changes: broadcast::Receiver<RowChange<Solution>>) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                let Some(shared) = shared.upgrade() else { return };
                shared.observe(&change);
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "solution watcher lagged; refund notices may be missed");
                let Some(shared) = shared.upgrade() else { return };
                shared.recompute_search_active();
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

struct Busy<'a> {
    shared: &'a SolutionShared,
    id: String,
}

impl<'a> Busy<'a> {
    fn acquire(shared: &'a SolutionShared, id: &str) -> Result<Self, ValidateError> {
        if !lock(&shared.busy).insert(id.to_string()) {
            return Err(ValidateError::InFlight(id.to_string()));
        }
        Ok(Self { shared, id: id.to_string() })
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        lock(&self.shared.busy).remove(&self.id);
    }
}
