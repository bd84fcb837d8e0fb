//! Handler Registry and the `Handler` contract.
//!
//! A handler performs the side effect for one claimed row. It must not
//! mutate the row; it only reports back whether the downstream call
//! succeeded, failed, or was canceled. The registry maps a service name to
//! its handler plus its [`ServicePolicy`](crate::config::ServicePolicy),
//! and preserves registration order so the poller visits services
//! deterministically.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opq_db::models::QueueRow;
use tokio_util::sync::CancellationToken;

use crate::config::ServicePolicy;
use crate::error::CoreError;

/// Outcome of a single `Handler::execute` call.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// The downstream operation committed successfully.
    Success,
    /// The downstream operation failed. Carries the error for logging;
    /// the poller always settles this to `Failed` regardless of the
    /// error's contents.
    Failed(anyhow::Error),
    /// The handler observed cancellation and returned promptly without
    /// completing the downstream call.
    Canceled,
}

/// The contract every per-service handler implements.
///
/// `execute` must be safe to invoke once per claim. It is not required to
/// be idempotent, but it must only report [`HandlerOutcome::Success`] once
/// the downstream side effect has actually committed. It must observe
/// `cancel` and return promptly once it is signaled.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn execute(&self, row: &QueueRow, cancel: CancellationToken) -> HandlerOutcome;
}

/// One registered service: its handler plus its scheduling policy.
struct Registration {
    policy: ServicePolicy,
    handler: Arc<dyn Handler>,
}

/// Maps a service name to its handler and concurrency policy.
///
/// Preserves registration order so the poller's per-tick service loop runs
/// in deterministic (configuration) order.
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: Vec<(String, Registration)>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler and its policy for a service. Re-registering a
    /// service name replaces its prior entry in place, preserving its
    /// original position in iteration order.
    pub fn register(&mut self, policy: ServicePolicy, handler: Arc<dyn Handler>) {
        let name = policy.service_name.clone();
        let entry = Registration { policy, handler };
        if let Some(slot) = self.registrations.iter_mut().find(|(n, _)| *n == name) {
            slot.1 = entry;
        } else {
            self.registrations.push((name, entry));
        }
    }

    /// Look up the policy for a service.
    pub fn policy(&self, service_name: &str) -> Result<&ServicePolicy, CoreError> {
        self.registrations
            .iter()
            .find(|(n, _)| n == service_name)
            .map(|(_, r)| &r.policy)
            .ok_or_else(|| CoreError::UnknownService(service_name.to_owned()))
    }

    /// Look up the handler for a service.
    pub fn handler(&self, service_name: &str) -> Result<Arc<dyn Handler>, CoreError> {
        self.registrations
            .iter()
            .find(|(n, _)| n == service_name)
            .map(|(_, r)| Arc::clone(&r.handler))
            .ok_or_else(|| CoreError::UnknownService(service_name.to_owned()))
    }

    /// Iterate registered service names in registration order.
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.registrations.iter().map(|(n, _)| n.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }
}

// ---------------------------------------------------------------------------
// Reference handlers
// ---------------------------------------------------------------------------
//
// None of these represent a real downstream system (IAM, IOT, ...); they
// exist so the scheduler and poller can be exercised end to end, in tests
// and via the CLI's `run --demo` mode, without live dependencies.

/// Always reports success.
#[derive(Debug, Default)]
pub struct AlwaysSucceedHandler;

#[async_trait]
impl Handler for AlwaysSucceedHandler {
    async fn execute(&self, _row: &QueueRow, _cancel: CancellationToken) -> HandlerOutcome {
        HandlerOutcome::Success
    }
}

/// Always reports failure, useful for exercising the retry/dead-letter path.
#[derive(Debug, Default)]
pub struct AlwaysFailHandler;

#[async_trait]
impl Handler for AlwaysFailHandler {
    async fn execute(&self, row: &QueueRow, _cancel: CancellationToken) -> HandlerOutcome {
        HandlerOutcome::Failed(anyhow::anyhow!(
            "demo handler: simulated failure for row {}",
            row.id
        ))
    }
}

/// Sleeps for a fixed delay before succeeding, honoring cancellation via
/// `tokio::select!` against the supplied token. Demonstrates the
/// cancellation contract handlers must implement.
#[derive(Debug, Clone)]
pub struct LatencyHandler {
    delay: Duration,
}

impl LatencyHandler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Handler for LatencyHandler {
    async fn execute(&self, _row: &QueueRow, cancel: CancellationToken) -> HandlerOutcome {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => HandlerOutcome::Success,
            _ = cancel.cancelled() => HandlerOutcome::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(name: &str) -> ServicePolicy {
        ServicePolicy::new(name, 2, 4).unwrap()
    }

    #[test]
    fn registry_preserves_registration_order() {
        let mut registry = HandlerRegistry::new();
        registry.register(policy("iam"), Arc::new(AlwaysSucceedHandler));
        registry.register(policy("iot"), Arc::new(AlwaysSucceedHandler));
        registry.register(policy("billing"), Arc::new(AlwaysSucceedHandler));

        let names: Vec<&str> = registry.service_names().collect();
        assert_eq!(names, vec!["iam", "iot", "billing"]);
    }

    #[test]
    fn re_registering_replaces_in_place() {
        let mut registry = HandlerRegistry::new();
        registry.register(policy("iam"), Arc::new(AlwaysSucceedHandler));
        registry.register(policy("iot"), Arc::new(AlwaysSucceedHandler));
        registry.register(ServicePolicy::new("iam", 9, 9).unwrap(), Arc::new(AlwaysFailHandler));

        let names: Vec<&str> = registry.service_names().collect();
        assert_eq!(names, vec!["iam", "iot"]);
        assert_eq!(registry.policy("iam").unwrap().per_sku_limit, 9);
    }

    #[test]
    fn unknown_service_errors() {
        let registry = HandlerRegistry::new();
        assert!(matches!(
            registry.policy("nope"),
            Err(CoreError::UnknownService(_))
        ));
    }

    #[tokio::test]
    async fn latency_handler_honors_cancellation() {
        let handler = LatencyHandler::new(Duration::from_secs(30));
        let token = CancellationToken::new();
        let token2 = token.clone();

        let row = opq_test_row();

        let handle = tokio::spawn(async move { handler.execute(&row, token2).await });
        token.cancel();

        let outcome = handle.await.unwrap();
        assert!(matches!(outcome, HandlerOutcome::Canceled));
    }

    fn opq_test_row() -> QueueRow {
        use chrono::Utc;
        use opq_db::models::{Operation, RowStatus};
        use uuid::Uuid;

        QueueRow {
            id: Uuid::new_v4(),
            execution_instance_id: Uuid::new_v4(),
            event_instance_id: Uuid::new_v4(),
            tenant_id: "tenant-1".into(),
            product_sku: "sku-a".into(),
            service_name: "iam".into(),
            operation: Operation::Create,
            status: RowStatus::InProgress,
            inserted_at: Utc::now(),
            retry_count: 0,
        }
    }
}
