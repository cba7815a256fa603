//! Runtime configuration.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Unparseable numbers fall back to their default; an unknown advance policy
//! is rejected because silently changing who may advance a request is not a
//! safe default.

use reservation_core::{AdvancePolicy, LifecyclePolicy};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::memory::DEFAULT_CHANGE_FEED_CAPACITY;
use crate::notification::DEFAULT_NOTIFICATION_CAPACITY;
use crate::retry::{MAX_STORE_ATTEMPTS, RetryPolicy};

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set to a value outside its allowed set.
    #[error("Invalid value for {name}: {value}")]
    InvalidValue {
        /// Environment variable name
        name: &'static str,
        /// The rejected value
        value: String,
    },
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Who may move a claimed request to in-progress
    pub advance_policy: AdvancePolicy,
    /// Attempts for store reads and subscriptions (1..=3)
    pub store_retry_attempts: u32,
    /// Delay before the first store retry, in milliseconds
    pub store_retry_initial_delay_ms: u64,
    /// Cap on store retry delay, in milliseconds
    pub store_retry_max_delay_ms: u64,
    /// Events buffered per notification observer
    pub notification_capacity: usize,
    /// Changes buffered per in-memory store subscriber
    pub change_feed_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            advance_policy: AdvancePolicy::default(),
            store_retry_attempts: MAX_STORE_ATTEMPTS,
            store_retry_initial_delay_ms: 50,
            store_retry_max_delay_ms: 2_000,
            notification_capacity: DEFAULT_NOTIFICATION_CAPACITY,
            change_feed_capacity: DEFAULT_CHANGE_FEED_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `RESERVATION_ADVANCE_POLICY`
    /// names an unknown policy.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`RuntimeConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let advance_policy = match lookup("RESERVATION_ADVANCE_POLICY") {
            None => defaults.advance_policy,
            Some(value) => AdvancePolicy::parse(&value).ok_or(ConfigError::InvalidValue {
                name: "RESERVATION_ADVANCE_POLICY",
                value,
            })?,
        };

        Ok(Self {
            advance_policy,
            store_retry_attempts: lookup("RESERVATION_STORE_RETRY_ATTEMPTS")
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(defaults.store_retry_attempts)
                .clamp(1, MAX_STORE_ATTEMPTS),
            store_retry_initial_delay_ms: lookup("RESERVATION_STORE_RETRY_INITIAL_DELAY_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.store_retry_initial_delay_ms),
            store_retry_max_delay_ms: lookup("RESERVATION_STORE_RETRY_MAX_DELAY_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.store_retry_max_delay_ms),
            notification_capacity: lookup("RESERVATION_NOTIFICATION_CAPACITY")
                .and_then(|s| s.parse().ok())
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.notification_capacity),
            change_feed_capacity: lookup("RESERVATION_CHANGE_FEED_CAPACITY")
                .and_then(|s| s.parse().ok())
                .filter(|capacity| *capacity > 0)
                .unwrap_or(defaults.change_feed_capacity),
        })
    }

    /// The lifecycle policy described by this configuration.
    #[must_use]
    pub const fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy {
            advance: self.advance_policy,
        }
    }

    /// The store retry policy described by this configuration.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_attempts(self.store_retry_attempts)
            .initial_delay(Duration::from_millis(self.store_retry_initial_delay_ms))
            .max_delay(Duration::from_millis(self.store_retry_max_delay_ms))
            .build()
    }
}
