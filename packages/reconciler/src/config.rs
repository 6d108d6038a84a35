//! Engine configuration.
//!
//! Loaded from the environment by the process entry point (which calls
//! `dotenvy::dotenv()` first); every knob has a default so an empty
//! environment is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Owners crawled concurrently per batch.
    pub owner_concurrency_limit: usize,
    /// Detail fetches in flight per owner batch.
    pub item_concurrency_limit: usize,
    /// Total tries per unit of work (not retries).
    pub retry_max_attempts: u32,
    /// Delay between attempts of one unit of work.
    pub retry_delay_ms: u64,
    /// Delay between executor batches. Serves backpressure against the
    /// source; distinct from the per-item retry delay.
    pub inter_batch_delay_ms: u64,
    /// When true, seeding and sweeping consider only listings that are
    /// currently active; inactive rows are left alone entirely.
    pub only_active_entities: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            owner_concurrency_limit: 5,
            item_concurrency_limit: 5,
            retry_max_attempts: 3,
            retry_delay_ms: 1000,
            inter_batch_delay_ms: 2000,
            only_active_entities: true,
        }
    }
}

impl ReconcilerConfig {
    /// Read configuration from `RECON_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            owner_concurrency_limit: env_parse(
                "RECON_OWNER_CONCURRENCY",
                defaults.owner_concurrency_limit,
            ),
            item_concurrency_limit: env_parse(
                "RECON_ITEM_CONCURRENCY",
                defaults.item_concurrency_limit,
            ),
            retry_max_attempts: env_parse("RECON_RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            retry_delay_ms: env_parse("RECON_RETRY_DELAY_MS", defaults.retry_delay_ms),
            inter_batch_delay_ms: env_parse(
                "RECON_INTER_BATCH_DELAY_MS",
                defaults.inter_batch_delay_ms,
            ),
            only_active_entities: env_parse("RECON_ONLY_ACTIVE", defaults.only_active_entities),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    /// The item-level retry policy this configuration describes.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, self.retry_delay())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
