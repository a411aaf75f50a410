//! Runtime configuration for the gating core.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default upper bound on unlockable day numbers.
pub const DEFAULT_DAY_CAP: u32 = 50;

/// Gating and storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Highest day number that may ever be unlocked
    pub day_cap: u32,

    /// Compare-and-swap attempts before a write conflict is surfaced
    pub max_write_retries: u32,

    /// Read-through cache in front of the stores
    pub cache_enabled: bool,

    /// Cache entry lifetime in seconds
    pub cache_ttl_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            day_cap: DEFAULT_DAY_CAP,
            max_write_retries: 8,
            cache_enabled: true,
            cache_ttl_secs: 300,
        }
    }
}

impl GateConfig {
    /// Cache entry lifetime.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Clamp the cap and retry count to at least 1.
    pub fn normalized(mut self) -> Self {
        self.day_cap = self.day_cap.max(1);
        self.max_write_retries = self.max_write_retries.max(1);
        self
    }
}
