use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_endpoint() -> String {
    "https://api.duckduckgo.com/".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_min_delay_ms() -> u64 {
    500
}

/// Settings for the search fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Instant-answer API endpoint queried by the primary tier.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// HTTP timeout for the primary tier. Default: 10 seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Minimum delay applied before every search. Default: 500 ms.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
            min_delay_ms: default_min_delay_ms(),
        }
    }
}

impl SearchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }
}
