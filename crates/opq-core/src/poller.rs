//! The long-running driver: each tick, iterate configured services in
//! registration order, ask the scheduler for this tick's claims,
//! transition each through the status machine, and dispatch it to its
//! handler.

use std::sync::Arc;

use anyhow::Result;
use opq_db::models::QueueRow;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{PollerConfig, RetryMode};
use crate::handler::{Handler, HandlerOutcome, HandlerRegistry};
use crate::scheduler;

/// Drives the scheduler/handler loop against a store until canceled.
pub struct Poller {
    pool: PgPool,
    registry: HandlerRegistry,
    config: PollerConfig,
}

impl Poller {
    pub fn new(pool: PgPool, registry: HandlerRegistry, config: PollerConfig) -> Self {
        Self {
            pool,
            registry,
            config,
        }
    }

    /// Run forever, one tick every `config.tick_interval`, until `cancel`
    /// fires. Returns once the current tick's in-flight dispatches have
    /// settled (or been force-returned at the drain deadline).
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(services = self.registry.len(), "poller starting");

        loop {
            if cancel.is_cancelled() {
                info!("poller stopping: cancellation requested");
                return Ok(());
            }

            if let Err(e) = self.tick(&cancel).await {
                error!(error = %e, "tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                _ = cancel.cancelled() => {
                    info!("poller stopping: cancellation requested during sleep");
                    return Ok(());
                }
            }
        }
    }

    /// Run exactly one tick across every configured service. Exposed
    /// separately from `run` so tests can drive individual ticks.
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<()> {
        let service_names: Vec<String> = self.registry.service_names().map(str::to_owned).collect();

        for service_name in service_names {
            if cancel.is_cancelled() {
                break;
            }
            if let Err(e) = self.tick_service(&service_name, cancel).await {
                // Errors during a single service's store reads abort only
                // that service's iteration for this tick.
                error!(service = %service_name, error = %e, "service iteration failed, skipping for this tick");
            }
        }

        Ok(())
    }

    async fn tick_service(&self, service_name: &str, cancel: &CancellationToken) -> Result<()> {
        // A store session scoped to this service iteration. A cloned
        // `PgPool` handle is cheap (it is a handle to the shared pool, not
        // a new connection) and guarantees nothing from this iteration
        // leaks into the next.
        let session = self.pool.clone();

        let policy = self.registry.policy(service_name)?.clone();
        let handler = self.registry.handler(service_name)?;

        let selected = scheduler::schedule(&session, service_name, &policy).await?;
        if selected.is_empty() {
            return Ok(());
        }

        let semaphore = Arc::new(Semaphore::new(policy.max_concurrency.max(1) as usize));
        let mut tasks = Vec::with_capacity(selected.len());

        for row in selected {
            let session = session.clone();
            let handler = Arc::clone(&handler);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let config = self.config.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                process_row(&session, row, handler.as_ref(), &config, cancel).await
            }));
        }

        for task in tasks {
            if let Err(join_err) = task.await {
                error!(error = %join_err, "dispatch task panicked");
            }
        }

        Ok(())
    }
}

/// Claim, dispatch, and settle a single row. Errors here are logged and
/// never abort the rest of the tick: the caller does not propagate a
/// `Result` for this function.
async fn process_row(
    pool: &PgPool,
    row: QueueRow,
    handler: &dyn Handler,
    config: &PollerConfig,
    cancel: CancellationToken,
) {
    let claimed = match opq_db::queries::queue::claim(pool, row.id).await {
        Ok(claimed) => claimed,
        Err(e) => {
            error!(row = %row.id, error = %e, "claim failed");
            return;
        }
    };

    if !claimed {
        // Row is no longer Pending -- a racing poller or operator
        // intervention. Not an error.
        debug!(row = %row.id, "claim lost, row no longer pending");
        return;
    }

    let outcome = handler.execute(&row, cancel).await;

    let settle_result = match outcome {
        HandlerOutcome::Success => opq_db::queries::queue::complete(pool, row.id).await.map(|_| ()),
        HandlerOutcome::Canceled => opq_db::queries::queue::cancel(pool, row.id).await.map(|_| ()),
        HandlerOutcome::Failed(err) => {
            warn!(row = %row.id, error = %err, "handler failed");
            settle_failure(pool, &row, config).await
        }
    };

    if let Err(e) = settle_result {
        error!(row = %row.id, error = %e, "failed to persist settle outcome");
    }
}

/// Apply the `Failed` transition plus the configured retry policy: either
/// leave the row `Failed` for an external re-driver, or immediately
/// re-queue it to `Pending` -- in both cases, dead-letter it first if it
/// has exhausted `max_retries`.
async fn settle_failure(pool: &PgPool, row: &QueueRow, config: &PollerConfig) -> Result<()> {
    opq_db::queries::queue::fail(pool, row.id).await?;
    let retry_count = row.retry_count + 1;

    if retry_count > config.max_retries {
        opq_db::queries::queue::dead_letter(pool, row.id).await?;
        info!(row = %row.id, retry_count, "dead-lettered after exhausting retries");
        return Ok(());
    }

    if config.retry_mode == RetryMode::RequeueImmediately {
        opq_db::queries::queue::requeue_failed(pool, row.id).await?;
        debug!(row = %row.id, retry_count, "requeued failed row");
    }

    Ok(())
}
