//! Runtime Configuration
//!
//! A runtime is configured once, at construction. The configuration decides
//! how a pending flush gets executed and how far `flush_until_idle` is
//! allowed to go before it reports a runaway effect loop.

use serde::{Deserialize, Serialize};

/// How the scheduler executes a requested flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushMode {
    /// The host calls [`Runtime::flush`](crate::Runtime::flush) itself.
    ///
    /// Useful for synchronous embeddings and tests.
    #[default]
    Manual,

    /// The flush is spawned onto the current tokio `LocalSet`, so it runs on
    /// the next tick after the current synchronous work completes.
    ///
    /// Outside any tokio runtime the request is logged and left to the host,
    /// as in [`FlushMode::Manual`].
    LocalTask,
}

fn default_max_flush_rounds() -> usize {
    100
}

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Flush execution strategy.
    #[serde(default)]
    pub flush_mode: FlushMode,

    /// Upper bound on consecutive flushes in `flush_until_idle`.
    #[serde(default = "default_max_flush_rounds")]
    pub max_flush_rounds: usize,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Use the given flush mode.
    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::default(),
            max_flush_rounds: default_max_flush_rounds(),
        }
    }
}
