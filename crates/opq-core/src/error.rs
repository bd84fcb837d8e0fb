//! Error types for the scheduler core.
//!
//! Store and handler failures that bubble up through `anyhow` cover most of
//! the surface; this module holds the narrow set of errors callers are
//! expected to match on.

use thiserror::Error;

/// Errors raised by the policy layer (scheduler, handler registry, poller)
/// that a caller may want to branch on, as opposed to the `anyhow::Error`
/// chains used for opaque store/handler failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A service name was referenced that has no registered policy/handler.
    #[error("no handler registered for service {0:?}")]
    UnknownService(String),

    /// A `ServicePolicy` was constructed with an out-of-range field.
    #[error("invalid service policy for {service:?}: {reason}")]
    InvalidPolicy { service: String, reason: &'static str },

    /// A config string did not match a known `RetryMode` variant.
    #[error("invalid retry mode {0:?}, expected \"leave-failed\" or \"requeue-immediately\"")]
    InvalidRetryMode(String),
}
