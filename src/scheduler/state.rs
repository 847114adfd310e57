//! Job execution state as reported by the scheduler.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SubmitError;

/// State of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    /// Waiting for a worker slot.
    Enqueued,
    /// A worker is executing the job.
    Running,
    /// Waiting on a prerequisite job in the same unique chain.
    Blocked,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure result.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl ExecutionState {
    pub const ALL: [ExecutionState; 6] = [
        Self::Enqueued,
        Self::Running,
        Self::Blocked,
        Self::Succeeded,
        Self::Failed,
        Self::Cancelled,
    ];

    pub const IN_PROGRESS: [ExecutionState; 3] = [Self::Enqueued, Self::Running, Self::Blocked];

    pub const TERMINAL: [ExecutionState; 3] = [Self::Succeeded, Self::Failed, Self::Cancelled];

    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: ExecutionState) -> bool {
        use ExecutionState::*;

        matches!(
            (self, target),
            (Blocked, Enqueued) | (Blocked, Failed) | (Blocked, Cancelled) |
            (Enqueued, Running) | (Enqueued, Cancelled) |
            (Running, Succeeded) | (Running, Failed) | (Running, Cancelled) |
            // Interrupted runs are rescheduled on restart
            (Running, Enqueued)
        )
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Enqueued, running or blocked.
    pub fn is_in_progress(&self) -> bool {
        !self.is_terminal()
    }

    /// Wire name, e.g. `RUNNING`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "ENQUEUED",
            Self::Running => "RUNNING",
            Self::Blocked => "BLOCKED",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse a list of wire names into a state set.
    pub fn parse_set<S: AsRef<str>>(names: &[S]) -> Result<HashSet<ExecutionState>, SubmitError> {
        names.iter().map(|n| n.as_ref().parse()).collect()
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionState {
    type Err = SubmitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == upper)
            .ok_or_else(|| SubmitError::UnknownState(s.to_string()))
    }
}
