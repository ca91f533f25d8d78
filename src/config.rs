// Engine configuration
// Search sizing, lock bounds for reservations and the retry policy callers use on contention

use serde::Deserialize;
use std::time::Duration;

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // Number of offers a search returns when the caller gives no limit
    pub default_search_limit: usize,
    // Upper bound on waiting for an offer's unit lock
    pub lock_timeout_ms: u64,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_search_limit: 3,
            lock_timeout_ms: 250,
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

// Retry policy for retryable engine errors (lock timeouts)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 500,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    // Delay before retry number `attempt` (0-based), capped, then spread by +/- half the jitter factor
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponential =
            self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let capped = exponential.min(self.max_backoff_ms as f64);
        let spread = (rand::random::<f64>() - 0.5) * self.jitter_factor * capped;
        Duration::from_millis((capped + spread).max(0.0) as u64)
    }
}
