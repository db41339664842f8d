// Backend wiring for one CLI invocation.
//
// Configuration comes from `~/.scout/config.toml` plus SCOUT_* environment
// overrides. The session token is taken as-is from SCOUT_ACCESS_TOKEN; the
// CLI never signs in on its own.

use std::sync::Arc;

use anyhow::{Context, Result};
use scout_common::types::BriefId;
use scout_sync::backend::{Backend, HttpBackend};
use scout_sync::config::{ClientConfig, ENV_ACCESS_TOKEN};
use scout_sync::session::{SessionTokenProvider, StaticTokenProvider};
use scout_sync::{BriefSession, SessionDeps, SyncError};

/// Resolved configuration plus the token provider built from it.
pub struct CliContext {
    pub config: ClientConfig,
    pub tokens: Arc<dyn SessionTokenProvider>,
}

impl CliContext {
    pub fn load() -> Result<Self> {
        Self::from_config(ClientConfig::load())
    }

    pub fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate().context("backend is not configured")?;
        let token = config
            .access_token
            .clone()
            .filter(|token| !token.trim().is_empty())
            .ok_or(SyncError::Unauthenticated)
            .with_context(|| format!("set {ENV_ACCESS_TOKEN} to a session token"))?;
        Ok(Self { config, tokens: StaticTokenProvider::new(token) })
    }

    /// Request/response access only; no realtime socket is opened.
    pub fn backend(&self) -> Result<Arc<dyn Backend>> {
        let endpoints = self.config.endpoints()?;
        let backend = HttpBackend::new(endpoints, Arc::clone(&self.tokens))
            .context("failed to build backend client")?;
        Ok(Arc::new(backend))
    }

    /// A brief session mounted on `brief_id`.
    pub async fn mount(&self, brief_id: &BriefId) -> Result<BriefSession> {
        let deps = SessionDeps::connect(&self.config, Arc::clone(&self.tokens))
            .await
            .context("failed to connect to backend")?;
        let session = BriefSession::new(deps);
        session
            .mount(brief_id.clone())
            .await
            .with_context(|| format!("failed to open brief `{brief_id}`"))?;
        Ok(session)
    }
}
