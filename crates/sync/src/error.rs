use scout_common::protocol::rpc::RpcFailure;
use scout_common::types::BriefId;
use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

/// Errors produced by the synchronization core.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no session token available")]
    Unauthenticated,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error(transparent)]
    Rpc(#[from] RpcFailure),
    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("channel `{entity}` for brief {brief_id} is already open")]
    ChannelAlreadyOpen { entity: String, brief_id: BriefId },
    #[error("realtime transport is closed")]
    ChannelClosed,
    #[error("no brief is mounted")]
    NotMounted,
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl SyncError {
    pub fn decode(what: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode { what: what.into(), source }
    }

    /// Network-level failures worth a user-triggered retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::ChannelClosed => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(error: reqwest::Error) -> Self {
        Self::Transport(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        assert!(SyncError::Http { status: 503, body: String::new() }.is_transient());
        assert!(SyncError::Http { status: 429, body: String::new() }.is_transient());
        assert!(!SyncError::Http { status: 401, body: String::new() }.is_transient());
        assert!(SyncError::Transport("reset".into()).is_transient());
        assert!(!SyncError::NotMounted.is_transient());
    }

    #[test]
    fn rpc_failure_message_passes_through() {
        let error: SyncError =
            RpcFailure { action: "validate_solution".into(), message: "forbidden".into() }.into();
        assert_eq!(error.to_string(), "validate_solution failed: forbidden");
    }
}
