//! Engine settings for one run.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Worker threads for concurrent dispatch; 0 runs everything inline.
    pub level_of_parallelism: usize,
    /// Timeout applied to leaves that carry no `Timeout` property, in milliseconds.
    pub default_timeout_ms: Option<u64>,
    /// Seed for per-test randomizers. Tests derive their own seed from it.
    pub random_seed: u64,
    pub stop_on_error: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        RunSettings {
            level_of_parallelism: 0,
            default_timeout_ms: None,
            random_seed: 0,
            stop_on_error: false,
        }
    }
}

impl RunSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, level: usize) -> Self {
        self.level_of_parallelism = level;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = Some(timeout.as_millis().try_into().unwrap_or(u64::MAX));
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }

    pub fn is_parallel(&self) -> bool {
        self.level_of_parallelism > 0
    }
}
