//! Time-windowed tables swept by maintenance tasks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A table whose rows expire after a configured TTL.
///
/// Table and column names are fixed here so sweeps never interpolate
/// configuration values into SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTarget {
    /// Short-lived one-time passcodes.
    OneTimePasscodes,
    /// Session and ledger tokens.
    SessionTokens,
}

impl RetentionTarget {
    /// Backing table.
    pub fn table(&self) -> &'static str {
        match self {
            Self::OneTimePasscodes => "one_time_passcodes",
            Self::SessionTokens => "session_tokens",
        }
    }

    /// Column compared against the cutoff.
    pub fn timestamp_column(&self) -> &'static str {
        "created_at"
    }
}

impl fmt::Display for RetentionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.table())
    }
}
