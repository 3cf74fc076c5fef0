//! Configuration management for the ticketing engine.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use ticketing_core::RetryPolicy;

/// Engine configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Business limits
    pub limits: LimitsConfig,
    /// Optimistic concurrency retry settings
    pub conflicts: ConflictConfig,
    /// Demo binary settings
    pub demo: DemoConfig,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Business limits enforced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Highest resale price as a percentage of the original price
    pub resale_cap_percent: u32,
    /// Most tickets a single purchase may request
    pub max_tickets_per_purchase: u32,
}

/// Retry budget for compare-and-swap conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// First backoff delay in milliseconds
    pub initial_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    pub max_delay_ms: u64,
}

/// Settings for the `demo` binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoConfig {
    /// Concurrent buyers racing for seats
    pub buyers: u32,
    /// Seats on sale
    pub capacity: u32,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            limits: LimitsConfig {
                resale_cap_percent: env::var("TICKETING_RESALE_CAP_PERCENT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.limits.resale_cap_percent),
                max_tickets_per_purchase: env::var("TICKETING_MAX_TICKETS_PER_PURCHASE")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.limits.max_tickets_per_purchase),
            },
            conflicts: ConflictConfig {
                max_retries: env::var("TICKETING_CONFLICT_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.conflicts.max_retries),
                initial_delay_ms: env::var("TICKETING_CONFLICT_INITIAL_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.conflicts.initial_delay_ms),
                max_delay_ms: env::var("TICKETING_CONFLICT_MAX_DELAY_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.conflicts.max_delay_ms),
            },
            demo: DemoConfig {
                buyers: env::var("TICKETING_DEMO_BUYERS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.demo.buyers),
                capacity: env::var("TICKETING_DEMO_CAPACITY")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.demo.capacity),
            },
            log_level: env::var("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    /// Retry policy for compare-and-swap conflicts.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.conflicts.max_retries)
            .initial_delay(Duration::from_millis(self.conflicts.initial_delay_ms))
            .max_delay(Duration::from_millis(self.conflicts.max_delay_ms))
            .build()
    }

    /// Override the resale cap.
    #[must_use]
    pub const fn with_resale_cap_percent(mut self, percent: u32) -> Self {
        self.limits.resale_cap_percent = percent;
        self
    }

    /// Override the per-purchase ticket limit.
    #[must_use]
    pub const fn with_max_tickets_per_purchase(mut self, limit: u32) -> Self {
        self.limits.max_tickets_per_purchase = limit;
        self
    }

    /// Override the conflict retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.conflicts.max_retries = max_retries;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: LimitsConfig {
                resale_cap_percent: 150,
                max_tickets_per_purchase: 50,
            },
            conflicts: ConflictConfig {
                max_retries: 64,
                initial_delay_ms: 1,
                max_delay_ms: 25,
            },
            demo: DemoConfig {
                buyers: 64,
                capacity: 10,
            },
            log_level: "info".to_string(),
        }
    }
}
