//! Scheduler core: the selection algorithm and polling loop that drain the
//! queue store while enforcing per-service concurrency caps, round-robin
//! fairness across SKUs, Create/Update/Delete priority, and the
//! at-most-one-in-flight-per-tenant lock.
//!
//! `opq-db` owns storage; this crate owns policy.

pub mod config;
pub mod error;
pub mod handler;
pub mod poller;
pub mod scheduler;

pub use config::{PollerConfig, RetryMode, ServicePolicy};
pub use error::CoreError;
pub use handler::{Handler, HandlerOutcome, HandlerRegistry};
pub use poller::Poller;
pub use scheduler::schedule;
