// Client configuration.
//
// File: `~/.scout/config.toml`
// Environment overrides: SCOUT_BACKEND_URL, SCOUT_API_KEY, SCOUT_ACCESS_TOKEN.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scout_common::protocol::realtime::PROTOCOL_VSN;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::error::SyncError;

pub const ENV_BACKEND_URL: &str = "SCOUT_BACKEND_URL";
pub const ENV_API_KEY: &str = "SCOUT_API_KEY";
pub const ENV_ACCESS_TOKEN: &str = "SCOUT_ACCESS_TOKEN";

/// Root directory for scout client state: `~/.scout/`.
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".scout"))
}

/// Path to the config file: `~/.scout/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

// ── Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Backend project URL (e.g. `https://abc.backend.example`).
    pub backend_url: Option<String>,
    /// Public (anon) API key sent as `apikey` on every request.
    pub api_key: Option<String>,
    /// Session token. Normally supplied through the environment, not the file.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Name of the action-dispatch function.
    pub function: String,
    pub sync: SyncTuning,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            api_key: None,
            access_token: None,
            function: "brief-operations".into(),
            sync: SyncTuning::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Timers used by the synchronization core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncTuning {
    /// Supplier/product poll cadence while a fast search is running.
    pub poll_interval_ms: u64,
    /// Upper bound on the role lookup before falling back to `user`.
    pub role_lookup_timeout_ms: u64,
    /// Realtime heartbeat cadence.
    pub heartbeat_interval_ms: u64,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self { poll_interval_ms: 5_000, role_lookup_timeout_ms: 5_000, heartbeat_interval_ms: 25_000 }
    }
}

impl SyncTuning {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn role_lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.role_lookup_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }
}

/// Realtime reconnect backoff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self { base_delay_ms: 250, max_delay_ms: 30_000 }
    }
}

impl ClientConfig {
    /// Load `~/.scout/config.toml` (defaults if absent or unparsable), then
    /// apply environment overrides.
    pub fn load() -> Self {
        let from_file =
            config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default();
        from_file.with_overrides(|key| std::env::var(key).ok())
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        if let Some(url) = non_empty(ENV_BACKEND_URL) {
            self.backend_url = Some(url);
        }
        if let Some(key) = non_empty(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
            self.access_token = Some(token);
        }
        self
    }

    /// Check that the backend can be addressed: URL and API key are present
    /// and the URL is https (or http on a loopback host).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoints().map(|_| ())
    }

    /// Resolve and validate the backend endpoints.
    pub fn endpoints(&self) -> Result<Endpoints, ConfigError> {
        let raw = self.backend_url.as_deref().ok_or(ConfigError::Missing("backend_url"))?;
        let api_key = self
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::Missing("api_key"))?;
        let base = validate_backend_url(raw)?;
        Ok(Endpoints { base, api_key, function: self.function.clone() })
    }
}

// ── Endpoints ──────────────────────────────────────────────────────

/// Validated backend addresses derived from [`ClientConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: Url,
    api_key: String,
    function: String,
}

impl Endpoints {
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// `{base}/rest/v1/{table}`
    pub fn rest_url(&self, table: &str) -> Result<Url, ConfigError> {
        self.join(&format!("rest/v1/{table}"))
    }

    /// `{base}/functions/v1/{function}`
    pub fn function_url(&self) -> Result<Url, ConfigError> {
        self.join(&format!("functions/v1/{}", self.function))
    }

    /// `wss://{host}/realtime/v1/websocket?apikey=…&vsn=…`
    pub fn realtime_url(&self) -> Result<Url, ConfigError> {
        let mut url = self.join("realtime/v1/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::InvalidUrl(format!("cannot use scheme {scheme}")))?;
        url.query_pairs_mut().append_pair("apikey", &self.api_key).append_pair("vsn", PROTOCOL_VSN);
        Ok(url)
    }

    fn join(&self, path: &str) -> Result<Url, ConfigError> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path).map_err(|error| ConfigError::InvalidUrl(error.to_string()))
    }
}

fn validate_backend_url(value: &str) -> Result<Url, ConfigError> {
    let parsed = Url::parse(value)
        .map_err(|error| ConfigError::InvalidUrl(format!("`{value}`: {error}")))?;
    match parsed.scheme() {
        "https" => Ok(parsed),
        "http" if is_loopback_host(parsed.host_str()) => Ok(parsed),
        _ => Err(ConfigError::InvalidUrl(
            "backend_url must use https (http is allowed only for localhost testing)".into(),
        )),
    }
}

fn is_loopback_host(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    trimmed.parse::<IpAddr>().is_ok_and(|addr| addr.is_loopback())
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(std::io::Error),
    #[error("config parse error: {0}")]
    Parse(toml::de::Error),
    #[error("config serialize error: {0}")]
    Serialize(toml::ser::Error),
    #[error("missing `{0}` (set it in ~/.scout/config.toml or the environment)")]
    Missing(&'static str),
    #[error("invalid backend url {0}")]
    InvalidUrl(String),
}

impl From<ConfigError> for SyncError {
    fn from(error: ConfigError) -> Self {
        SyncError::Config(error.to_string())
    }
}
