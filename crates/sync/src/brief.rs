// Brief session: every sync unit of one view, scoped to one brief.

use std::sync::Arc;
use std::time::Duration;

use scout_common::types::{BriefId, ChatMessage, Solution, UserRole};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend::{Backend, HttpBackend};
use crate::channel::ChannelManager;
use crate::chat::ChatSync;
use crate::config::{ClientConfig, SyncTuning};
use crate::error::{Result, SyncError};
use crate::kpi::{KpiState, KpiSync};
use crate::realtime::{shared_realtime, ChangeFeed};
use crate::role::fetch_user_role;
use crate::session::SessionTokenProvider;
use crate::solutions::SolutionSync;
use crate::suppliers::{SupplierGroup, SupplierSync};

/// Everything a brief session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub backend: Arc<dyn Backend>,
    pub feed: Arc<dyn ChangeFeed>,
    pub poll_interval: Duration,
    pub role_lookup_timeout: Duration,
}

impl SessionDeps {
    pub fn new(backend: Arc<dyn Backend>, feed: Arc<dyn ChangeFeed>, tuning: &SyncTuning) -> Self {
        Self {
            backend,
            feed,
            poll_interval: tuning.poll_interval(),
            role_lookup_timeout: tuning.role_lookup_timeout(),
        }
    }

    /// HTTP backend plus the process-wide realtime client.
    pub async fn connect(config: &ClientConfig, tokens: Arc<dyn SessionTokenProvider>) -> Result<Self> {
        let endpoints = config.endpoints()?;
        let backend = HttpBackend::new(endpoints.clone(), Arc::clone(&tokens))?;
        let realtime = shared_realtime(&endpoints, &config.sync, &config.reconnect, tokens).await?;
        Ok(Self::new(Arc::new(backend), realtime, &config.sync))
    }
}

/// Serializable state of a mounted brief.
#[derive(Debug, Clone, Serialize)]
pub struct BriefView {
    pub brief_id: Option<BriefId>,
    pub messages: Vec<ChatMessage>,
    pub solutions: Vec<Solution>,
    pub supplier_groups: Vec<SupplierGroup>,
    pub kpis: KpiState,
    /// Per-collection load errors, keyed by entity.
    pub errors: Vec<(String, String)>,
}

/// Chat, solutions, suppliers and KPIs for one brief at a time.
pub struct BriefSession {
    deps: SessionDeps,
    channels: ChannelManager,
    chat: ChatSync,
    solutions: SolutionSync,
    suppliers: SupplierSync,
    kpis: KpiSync,
    scope: Mutex<Option<BriefId>>,
}

impl BriefSession {
    /// Must be called inside a tokio runtime.
    pub fn new(deps: SessionDeps) -> Self {
        let channels = ChannelManager::new(Arc::clone(&deps.feed));
        let chat = ChatSync::new(Arc::clone(&deps.backend), channels.clone());
        let solutions = SolutionSync::new(Arc::clone(&deps.backend), channels.clone());
        let suppliers = SupplierSync::new(
            Arc::clone(&deps.backend),
            channels.clone(),
            &solutions,
            deps.poll_interval,
        );
        let kpis = KpiSync::new(Arc::clone(&deps.backend));
        kpis.attach(solutions.solutions().version());
        kpis.attach(suppliers.suppliers().version());
        kpis.attach(suppliers.products().version());

        Self { deps, channels, chat, solutions, suppliers, kpis, scope: Mutex::new(None) }
    }

    pub fn chat(&self) -> &ChatSync {
        &self.chat
    }

    pub fn solutions(&self) -> &SolutionSync {
        &self.solutions
    }

    pub fn suppliers(&self) -> &SupplierSync {
        &self.suppliers
    }

    pub fn kpis(&self) -> &KpiSync {
        &self.kpis
    }

    pub fn channels(&self) -> &ChannelManager {
        &self.channels
    }

    pub async fn scope(&self) -> Option<BriefId> {
        self.scope.lock().await.clone()
    }

    /// Mount every unit on `brief_id`, tearing down any previous scope first.
    ///
    /// Units mount independently: one failing does not stop the others. Load
    /// failures stay on each unit's state; the first channel failure is
    /// returned after all units ran.
    pub async fn mount(&self, brief_id: BriefId) -> Result<()> {
        let mut scope = self.scope.lock().await;
        if scope.is_some() {
            self.teardown().await;
        }
        *scope = Some(brief_id.clone());
        info!(brief_id = %brief_id, "mounting brief");

        let (chat, solutions, suppliers, kpis) = tokio::join!(
            self.chat.mount(brief_id.clone()),
            self.solutions.mount(brief_id.clone()),
            self.suppliers.mount(brief_id.clone()),
            self.kpis.mount(brief_id.clone()),
        );
        if let Err(error) = kpis {
            warn!(brief_id = %brief_id, %error, "kpi load failed");
        }

        let mut first_error = None;
        for (unit, outcome) in [("chat", chat), ("solutions", solutions), ("suppliers", suppliers)] {
            if let Err(error) = outcome {
                warn!(brief_id = %brief_id, unit, %error, "unit failed to mount");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Switch to another brief. Alias of [`mount`](Self::mount).
    pub async fn switch(&self, brief_id: BriefId) -> Result<()> {
        self.mount(brief_id).await
    }

    pub async fn unmount(&self) {
        let mut scope = self.scope.lock().await;
        if scope.take().is_some() {
            self.teardown().await;
        }
    }

    async fn teardown(&self) {
        tokio::join!(self.chat.unmount(), self.solutions.unmount(), self.suppliers.unmount());
        self.kpis.unmount();
    }

    /// Re-fetch every collection and the KPIs for the mounted brief.
    pub async fn refresh_all(&self) -> Result<()> {
        if self.scope.lock().await.is_none() {
            return Err(SyncError::NotMounted);
        }
        let (chat, solutions, _, kpis) = tokio::join!(
            self.chat.messages().refresh(),
            self.solutions.solutions().refresh(),
            self.suppliers.refresh(),
            self.kpis.refresh(),
        );
        chat.and(solutions).and(kpis).map(|_| ())
    }

    pub async fn user_role(&self) -> UserRole {
        fetch_user_role(self.deps.backend.as_ref(), self.deps.role_lookup_timeout).await
    }

    pub async fn view(&self) -> BriefView {
        let chat = self.chat.messages().snapshot();
        let solutions = self.solutions.solutions().snapshot();
        let suppliers = self.suppliers.suppliers().snapshot();
        let products = self.suppliers.products().snapshot();
        let errors = [
            ("chat_messages", chat.error),
            ("solutions", solutions.error),
            ("suppliers", suppliers.error),
            ("products", products.error),
        ]
        .into_iter()
        .filter_map(|(entity, error)| error.map(|error| (entity.to_string(), error)))
        .collect();

        BriefView {
            brief_id: self.scope().await,
            messages: chat.rows,
            solutions: solutions.rows,
            supplier_groups: self.suppliers.groups(),
            kpis: self.kpis.state(),
            errors,
        }
    }
}
