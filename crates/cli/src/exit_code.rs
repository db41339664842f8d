// Consistent exit codes for the scout CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = backend not configured
//   11 = authentication error
//   12 = state conflict (illegal transition, request already in flight)
//   13 = network error

use std::process;

use scout_sync::chat::SendError;
use scout_sync::config::ConfigError;
use scout_sync::solutions::ValidateError;
use scout_sync::SyncError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    NotConfigured = 10,
    Auth = 11,
    Conflict = 12,
    Network = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<ConfigError>().is_some() {
                return Self::NotConfigured;
            }
            if let Some(send) = cause.downcast_ref::<SendError>() {
                return match send {
                    SendError::Blank | SendError::NotMounted(_) => Self::Usage,
                    SendError::InFlight => Self::Conflict,
                    SendError::Failed(sync) => Self::from_sync(sync),
                };
            }
            if let Some(validate) = cause.downcast_ref::<ValidateError>() {
                return match validate {
                    ValidateError::NotFound(_) => Self::Usage,
                    ValidateError::Transition(_)
                    | ValidateError::InFlight(_)
                    | ValidateError::NotValidated { .. } => Self::Conflict,
                    ValidateError::Failed(sync) => Self::from_sync(sync),
                };
            }
            if let Some(sync) = cause.downcast_ref::<SyncError>() {
                return Self::from_sync(sync);
            }
        }
        Self::Error
    }

    pub fn from_sync(error: &SyncError) -> Self {
        match error {
            SyncError::Config(_) => Self::NotConfigured,
            SyncError::Unauthenticated => Self::Auth,
            SyncError::Http { status: 401 | 403, .. } => Self::Auth,
            SyncError::ChannelAlreadyOpen { .. } => Self::Conflict,
            other if other.is_transient() => Self::Network,
            _ => Self::Error,
        }
    }
}

/// The sync failure behind `err`, looking through mutator error wrappers.
pub fn sync_cause(err: &anyhow::Error) -> Option<&SyncError> {
    err.chain().find_map(|cause| {
        if let Some(sync) = cause.downcast_ref::<SyncError>() {
            return Some(sync);
        }
        if let Some(SendError::Failed(sync)) = cause.downcast_ref::<SendError>() {
            return Some(sync);
        }
        match cause.downcast_ref::<ValidateError>() {
            Some(ValidateError::Failed(sync)) => Some(sync),
            _ => None,
        }
    })
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use scout_common::solution::{SolutionStatus, TransitionError};
    use std::time::Duration;

    #[test]
    fn exit_code_values() {
        assert_eq!(ExitCode::Success.code(), 0);
        assert_eq!(ExitCode::Error.code(), 1);
        assert_eq!(ExitCode::Usage.code(), 2);
        assert_eq!(ExitCode::NotConfigured.code(), 10);
        assert_eq!(ExitCode::Auth.code(), 11);
        assert_eq!(ExitCode::Conflict.code(), 12);
        assert_eq!(ExitCode::Network.code(), 13);
    }

    #[test]
    fn sync_errors_map_by_kind() {
        assert_eq!(ExitCode::from_sync(&SyncError::Unauthenticated), ExitCode::Auth);
        assert_eq!(
            ExitCode::from_sync(&SyncError::Http { status: 401, body: String::new() }),
            ExitCode::Auth
        );
        assert_eq!(
            ExitCode::from_sync(&SyncError::Http { status: 502, body: String::new() }),
            ExitCode::Network
        );
        assert_eq!(ExitCode::from_sync(&SyncError::Timeout(Duration::from_secs(5))), ExitCode::Network);
        assert_eq!(ExitCode::from_sync(&SyncError::NotMounted), ExitCode::Error);
    }

    #[test]
    fn wrapped_errors_are_found_in_the_chain() {
        let err = anyhow::Error::new(SyncError::Transport("connection reset".into()))
            .context("failed to open brief `b-1`");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Network);

        let err: anyhow::Result<()> = Err(ConfigError::Missing("backend_url")).context("not configured");
        assert_eq!(ExitCode::from_error(&err.unwrap_err()), ExitCode::NotConfigured);
    }

    #[test]
    fn mutator_errors_map_to_usage_or_conflict() {
        let blank = anyhow::Error::new(SendError::Blank);
        assert_eq!(ExitCode::from_error(&blank), ExitCode::Usage);

        let illegal = anyhow::Error::new(ValidateError::Transition(TransitionError::Illegal {
            from: SolutionStatus::Finished,
            to: SolutionStatus::Validated,
        }));
        assert_eq!(ExitCode::from_error(&illegal), ExitCode::Conflict);

        let failed = anyhow::Error::new(SendError::Failed(SyncError::Unauthenticated));
        assert_eq!(ExitCode::from_error(&failed), ExitCode::Auth);
    }

    #[test]
    fn generic_errors_are_general() {
        let err = anyhow::anyhow!("something went wrong");
        assert_eq!(ExitCode::from_error(&err), ExitCode::Error);
    }
}
