//! Process-wide and per-service configuration types.
//!
//! These are plain data; resolving them from flags/env/config file is the
//! CLI's job (`opq-cli::config`), consistent with the Non-goal that keeps
//! configuration loading out of the core.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Per-service scheduling policy: how many candidates each SKU contributes
/// per tick, and how many rows may be `InProgress` at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePolicy {
    pub service_name: String,
    pub per_sku_limit: i64,
    pub max_concurrency: i64,
}

impl ServicePolicy {
    /// Construct a policy, rejecting zero/negative values for either field
    /// (`per_sku_limit >= 1`, `max_concurrency >= 1`).
    pub fn new(
        service_name: impl Into<String>,
        per_sku_limit: i64,
        max_concurrency: i64,
    ) -> Result<Self, CoreError> {
        let service_name = service_name.into();
        if per_sku_limit < 1 {
            return Err(CoreError::InvalidPolicy {
                service: service_name,
                reason: "per_sku_limit must be >= 1",
            });
        }
        if max_concurrency < 1 {
            return Err(CoreError::InvalidPolicy {
                service: service_name,
                reason: "max_concurrency must be >= 1",
            });
        }
        Ok(Self {
            service_name,
            per_sku_limit,
            max_concurrency,
        })
    }
}

/// Process-wide policy for what happens to a `Failed` row once it has been
/// settled: left in place for an external re-driver, or immediately
/// re-queued to `Pending` (still subject to the `max_retries` dead-letter
/// check).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetryMode {
    LeaveFailed,
    RequeueImmediately,
}

impl Default for RetryMode {
    fn default() -> Self {
        Self::LeaveFailed
    }
}

impl fmt::Display for RetryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LeaveFailed => "leave-failed",
            Self::RequeueImmediately => "requeue-immediately",
        };
        f.write_str(s)
    }
}

impl FromStr for RetryMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "leave-failed" => Ok(Self::LeaveFailed),
            "requeue-immediately" => Ok(Self::RequeueImmediately),
            other => Err(CoreError::InvalidRetryMode(other.to_owned())),
        }
    }
}

/// Process-wide poller settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// How long the poller sleeps between ticks.
    pub tick_interval: Duration,
    /// Number of failures a row may accumulate before it is dead-lettered.
    pub max_retries: i32,
    /// What to do with a `Failed` row once it is settled.
    pub retry_mode: RetryMode,
}

impl PollerConfig {
    pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

    pub fn new(tick_interval: Duration, max_retries: i32, retry_mode: RetryMode) -> Self {
        Self {
            tick_interval,
            max_retries,
            retry_mode,
        }
    }
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Self::DEFAULT_TICK_INTERVAL,
            max_retries: 3,
            retry_mode: RetryMode::default(),
        }
    }
}
