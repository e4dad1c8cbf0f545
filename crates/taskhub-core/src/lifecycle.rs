//! Process lifecycle stages.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of the process lifecycle. Stages only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Process started, nothing loaded.
    Init,
    /// Loading and validating configuration.
    Configuring,
    /// Opening storage, running migrations, building clients.
    ConnectingDependencies,
    /// Subsystems running, listener accepting requests.
    Serving,
    /// Termination received, tearing subsystems down.
    Draining,
    /// Teardown finished.
    Stopped,
}

impl Stage {
    /// Snake-case name used in logs and the health endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Configuring => "configuring",
            Self::ConnectingDependencies => "connecting_dependencies",
            Self::Serving => "serving",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
