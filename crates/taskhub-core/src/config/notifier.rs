//! Outbound notification client configuration.

use serde::{Deserialize, Serialize};

/// Settings for the webhook client used by notification-delivery jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Webhook receiving delivered notifications. Unset disables delivery.
    #[serde(default)]
    pub webhook_url: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_timeout() -> u64 {
    10
}
