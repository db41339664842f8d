// KPI aggregate sync.
//
// KPIs are not a source of truth. They are re-fetched from the server
// aggregate whenever an attached collection changes. The previous value is
// kept as a shadow so a view can highlight what moved.

use std::sync::{Arc, Mutex, Weak};

use scout_common::protocol::actions::GET_KPIS;
use scout_common::protocol::rpc::RpcRequest;
use scout_common::types::{BriefId, KpiAggregate};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::backend::{call_action, Backend};
use crate::collection::LoadOutcome;
use crate::error::{Result, SyncError};
use crate::lock;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiState {
    pub current: Option<KpiAggregate>,
    pub previous: Option<KpiAggregate>,
    pub loading: bool,
    pub error: Option<String>,
}

impl KpiState {
    /// Fields whose current value differs from the shadow.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let (Some(current), Some(previous)) = (self.current, self.previous) else {
            return Vec::new();
        };
        [
            ("solutions_count", current.solutions_count != previous.solutions_count),
            ("suppliers_count", current.suppliers_count != previous.suppliers_count),
            ("products_count", current.products_count != previous.products_count),
            ("fast_searches_used", current.fast_searches_used != previous.fast_searches_used),
        ]
        .into_iter()
        .filter_map(|(field, changed)| changed.then_some(field))
        .collect()
    }
}

#[derive(Default)]
struct Scope {
    brief_id: Option<BriefId>,
    epoch: u64,
    load_seq: u64,
}

struct KpiShared {
    backend: Arc<dyn Backend>,
    scope: Mutex<Scope>,
    state: watch::Sender<KpiState>,
}

impl KpiShared {
    async fn load_in(&self, brief_id: &BriefId, epoch: u64) -> Result<LoadOutcome> {
        let seq = {
            let mut scope = lock(&self.scope);
            if scope.epoch != epoch {
                return Ok(LoadOutcome::Stale);
            }
            scope.load_seq = scope.load_seq.wrapping_add(1);
            scope.load_seq
        };
        self.state.send_modify(|state| state.loading = true);

        let request = RpcRequest::new(GET_KPIS).with_brief(brief_id);
        let fetched = call_action(self.backend.as_ref(), request).await.and_then(decode_kpis);

        let scope = lock(&self.scope);
        if scope.epoch != epoch || scope.load_seq != seq {
            debug!(brief_id = %brief_id, "discarding stale kpi response");
            return Ok(LoadOutcome::Stale);
        }
        match fetched {
            Ok(aggregate) => {
                self.state.send_modify(|state| {
                    state.previous = state.current.or(Some(aggregate));
                    state.current = Some(aggregate);
                    state.loading = false;
                    state.error = None;
                });
                Ok(LoadOutcome::Applied { rows: 1 })
            }
            Err(error) => {
                self.state.send_modify(|state| {
                    state.loading = false;
                    state.error = Some(error.to_string());
                });
                Err(error)
            }
        }
    }

    async fn refresh(&self) -> Result<LoadOutcome> {
        let (brief_id, epoch) = {
            let scope = lock(&self.scope);
            (scope.brief_id.clone().ok_or(SyncError::NotMounted)?, scope.epoch)
        };
        self.load_in(&brief_id, epoch).await
    }
}

fn decode_kpis(data: Value) -> Result<KpiAggregate> {
    let payload = match data.get("kpis") {
        Some(inner) => inner.clone(),
        None => data,
    };
    serde_json::from_value(payload).map_err(|error| SyncError::decode("get_kpis response", error))
}

/// KPI aggregate for the mounted brief.
#[derive(Clone)]
pub struct KpiSync {
    shared: Arc<KpiShared>,
}

impl KpiSync {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            shared: Arc::new(KpiShared {
                backend,
                scope: Mutex::new(Scope::default()),
                state: watch::channel(KpiState::default()).0,
            }),
        }
    }

    pub async fn mount(&self, brief_id: BriefId) -> Result<LoadOutcome> {
        let epoch = self.begin_scope(Some(brief_id.clone()));
        self.shared.load_in(&brief_id, epoch).await
    }

    pub fn unmount(&self) {
        self.begin_scope(None);
    }

    fn begin_scope(&self, brief_id: Option<BriefId>) -> u64 {
        let mut scope = lock(&self.shared.scope);
        scope.epoch = scope.epoch.wrapping_add(1);
        scope.brief_id = brief_id;
        self.shared.state.send_replace(KpiState::default());
        scope.epoch
    }

    /// Fetch the aggregate for `brief_id`; it must be the mounted brief.
    pub async fn load(&self, brief_id: &BriefId) -> Result<LoadOutcome> {
        let epoch = {
            let scope = lock(&self.shared.scope);
            if scope.brief_id.as_ref() != Some(brief_id) {
                return Err(SyncError::NotMounted);
            }
            scope.epoch
        };
        self.shared.load_in(brief_id, epoch).await
    }

    pub async fn refresh(&self) -> Result<LoadOutcome> {
        self.shared.refresh().await
    }

    pub fn state(&self) -> KpiState {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<KpiState> {
        self.shared.state.subscribe()
    }

    /// Reload whenever `trigger` changes. Must be called inside a tokio runtime.
    pub fn attach(&self, mut trigger: watch::Receiver<u64>) {
        let weak: Weak<KpiShared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            while trigger.changed().await.is_ok() {
                trigger.borrow_and_update();
                let Some(shared) = weak.upgrade() else { return };
                match shared.refresh().await {
                    Ok(_) | Err(SyncError::NotMounted) => {}
                    Err(error) => warn!(%error, "kpi reload failed"),
                }
            }
        });
    }
}
