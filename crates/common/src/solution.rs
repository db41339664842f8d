// Solution status state machine.
//
// Status transitions:
//   proposed → validated → in_progress → finished   (happy path)
//   proposed → rejected                              (terminal)
//
// The only transition a client may initiate is proposed → validated.
// validated → in_progress and in_progress → finished are driven by the
// search pipeline and observed through the change feed.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle state of a [`Solution`](crate::types::Solution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolutionStatus {
    Proposed,
    Validated,
    Rejected,
    InProgress,
    Finished,
}

/// Who is attempting a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOrigin {
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("solution cannot move from {from} to {to}")]
    Illegal { from: SolutionStatus, to: SolutionStatus },
    #[error("transition from {from} to {to} is server-driven")]
    ServerOnly { from: SolutionStatus, to: SolutionStatus },
}

const TRANSITIONS: &[(SolutionStatus, SolutionStatus, TransitionOrigin)] = &[
    (SolutionStatus::Proposed, SolutionStatus::Validated, TransitionOrigin::Client),
    (SolutionStatus::Proposed, SolutionStatus::Rejected, TransitionOrigin::Server),
    (SolutionStatus::Validated, SolutionStatus::InProgress, TransitionOrigin::Server),
    (SolutionStatus::InProgress, SolutionStatus::Finished, TransitionOrigin::Server),
];

impl SolutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "proposed" => Some(Self::Proposed),
            "validated" => Some(Self::Validated),
            "rejected" => Some(Self::Rejected),
            "in_progress" => Some(Self::InProgress),
            "finished" => Some(Self::Finished),
            _ => None,
        }
    }

    /// Check `self → to` against the transition table.
    ///
    /// Server-origin attempts may take any edge in the table. Client-origin
    /// attempts may only take edges marked as client-initiated.
    pub fn check_transition(
        self,
        to: SolutionStatus,
        origin: TransitionOrigin,
    ) -> Result<(), TransitionError> {
        let edge = TRANSITIONS.iter().find(|(from, target, _)| *from == self && *target == to);
        match (edge, origin) {
            (None, _) => Err(TransitionError::Illegal { from: self, to }),
            (Some((_, _, TransitionOrigin::Server)), TransitionOrigin::Client) => {
                Err(TransitionError::ServerOnly { from: self, to })
            }
            (Some(_), _) => Ok(()),
        }
    }

    /// A validated or running solution may have its fast search refunded.
    pub fn can_be_refunded(self) -> bool {
        matches!(self, Self::Validated | Self::InProgress)
    }
}

impl std::fmt::Display for SolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
