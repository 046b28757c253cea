//! Run state definitions for the orchestrator's lifecycle
//!
//! A run moves `Idle → Running → Draining → Done`. It fails from `Running`
//! when the store is lost for good, or from `Draining` when the final flush
//! is what pushes the store over that line.

use std::fmt;

/// Represents the current state of a harvest run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunState {
    /// Run has been created but no worker has started
    Idle,

    /// Workers are pulling from the frontier
    Running,

    /// Frontier is exhausted (or the run was cancelled); buffers are being flushed
    Draining,

    // ===== Terminal States =====
    /// Run finished; every buffered record was handed to the store or reported lost
    Done,

    /// Run stopped on a fatal, non-recoverable condition
    Failed,
}

impl RunState {
    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Returns true if this transition is part of the run lifecycle
    pub fn can_transition_to(&self, next: RunState) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running)
                | (Self::Running, Self::Draining)
                | (Self::Running, Self::Failed)
                | (Self::Draining, Self::Done)
                | (Self::Draining, Self::Failed)
        )
    }

    /// Converts the run state to a database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// Parses a run state from a database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "draining" => Some(Self::Draining),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Returns all possible run states
    pub fn all_states() -> Vec<Self> {
        vec![
            Self::Idle,
            Self::Running,
            Self::Draining,
            Self::Done,
            Self::Failed,
        ]
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
