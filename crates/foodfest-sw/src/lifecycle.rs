//! Worker lifecycle states.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of the precache worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Not yet installed.
    #[default]
    Uninstalled,
    /// Fetching the manifest into the bucket.
    Installing,
    /// Installed, waiting for activation.
    Installed,
    /// Pruning stale buckets.
    Activating,
    /// Controlling fetches.
    Active,
    /// Discarded after a failed install or replaced by a newer worker.
    Redundant,
}

impl WorkerState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Uninstalled, Installing)
                | (Installing, Installed)
                | (Installing, Redundant)
                | (Installed, Activating)
                | (Installed, Redundant)
                | (Activating, Active)
                // cleanup failed; activation may be retried
                | (Activating, Installed)
                | (Active, Redundant)
        )
    }

    /// Only an active worker intercepts fetches.
    pub fn controls_fetches(self) -> bool {
        self == WorkerState::Active
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WorkerState::Uninstalled => "uninstalled",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
