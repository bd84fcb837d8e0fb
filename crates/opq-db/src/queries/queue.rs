//! Database query functions for the `queue_rows` table.
//!
//! This is the Task Store: a thin, transactional layer over a single table.
//! It carries no scheduling policy -- partitioning by SKU, tenant locking,
//! and concurrency caps all live in `opq-core::scheduler`. The one piece of
//! business logic this module does own is the per-SKU ranking in
//! `rank_pending`, because it is only efficient and only race-free when
//! expressed as a single window-function query.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Operation, QueueRow, RankedRow, RowStatus};

/// Fields needed to enqueue a new row. Mirrors the upstream ingestion
/// contract in full: callers populate every field except `status`,
/// `retry_count`, and `inserted_at`, which the store assigns.
#[derive(Debug, Clone)]
pub struct NewQueueRow {
    pub execution_instance_id: Uuid,
    pub event_instance_id: Uuid,
    pub tenant_id: String,
    pub product_sku: String,
    pub service_name: String,
    pub operation: Operation,
}

/// Insert a new row with `status = Pending`, `retry_count = 0`, and
/// `inserted_at = now()`. This is the producer-facing primitive; it does
/// not validate caller identity or idempotency, both of which belong to a
/// real ingestion API.
pub async fn enqueue(pool: &PgPool, spec: &NewQueueRow) -> Result<QueueRow> {
    let row = sqlx::query_as::<_, QueueRow>(
        "INSERT INTO queue_rows \
            (execution_instance_id, event_instance_id, tenant_id, product_sku, \
             service_name, operation, status, retry_count) \
         VALUES ($1, $2, $3, $4, $5, $6, 'pending', 0) \
         RETURNING *",
    )
    .bind(spec.execution_instance_id)
    .bind(spec.event_instance_id)
    .bind(&spec.tenant_id)
    .bind(&spec.product_sku)
    .bind(&spec.service_name)
    .bind(spec.operation)
    .fetch_one(pool)
    .await
    .context("failed to enqueue row")?;

    Ok(row)
}

/// Fetch a single row by ID.
pub async fn get_row(pool: &PgPool, id: Uuid) -> Result<Option<QueueRow>> {
    let row = sqlx::query_as::<_, QueueRow>("SELECT * FROM queue_rows WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch row")?;

    Ok(row)
}

/// Count rows with `(service_name, status = InProgress)`.
pub async fn count_in_progress(pool: &PgPool, service_name: &str) -> Result<i64> {
    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM queue_rows WHERE service_name = $1 AND status = 'in_progress'",
    )
    .bind(service_name)
    .fetch_one(pool)
    .await
    .context("failed to count in-progress rows")?;

    Ok(count.0)
}

/// Distinct tenant ids with an in-progress row in `service_name`.
pub async fn list_in_progress_tenants(pool: &PgPool, service_name: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT DISTINCT tenant_id FROM queue_rows \
         WHERE service_name = $1 AND status = 'in_progress'",
    )
    .bind(service_name)
    .fetch_all(pool)
    .await
    .context("failed to list in-progress tenants")?;

    Ok(rows.into_iter().map(|(t,)| t).collect())
}

/// Return the top-`per_sku_limit` pending rows within each `product_sku`
/// for `service_name`, ranked by `(operation ASC, inserted_at ASC)`.
///
/// Expressed as a single `ROW_NUMBER() OVER (PARTITION BY product_sku ...)`
/// query so the ranks are computed from one consistent snapshot -- the
/// fairness guarantee depends on every SKU's candidates being ranked
/// against the same view of the table.
pub async fn rank_pending(
    pool: &PgPool,
    service_name: &str,
    per_sku_limit: i64,
) -> Result<Vec<RankedRow>> {
    let rows = sqlx::query_as::<_, RankedRow>(
        "WITH ranked AS ( \
            SELECT *, \
                ROW_NUMBER() OVER ( \
                    PARTITION BY product_sku \
                    ORDER BY \
                        (CASE operation \
                            WHEN 'create' THEN 0 \
                            WHEN 'update' THEN 1 \
                            WHEN 'delete' THEN 2 \
                        END) ASC, \
                        inserted_at ASC \
                ) AS sku_rank \
            FROM queue_rows \
            WHERE service_name = $1 AND status = 'pending' \
        ) \
         SELECT id, execution_instance_id, event_instance_id, tenant_id, product_sku, \
                service_name, operation, status, inserted_at, retry_count, sku_rank \
         FROM ranked \
         WHERE sku_rank <= $2 \
         ORDER BY product_sku ASC, sku_rank ASC",
    )
    .bind(service_name)
    .bind(per_sku_limit)
    .fetch_all(pool)
    .await
    .context("failed to rank pending rows")?;

    Ok(rows)
}

/// Atomically claim a row: `Pending -> InProgress` via compare-and-set.
///
/// Returns `false` (not an error) if the row was no longer `Pending` --
/// a racing poller already claimed it, or an operator intervened.
pub async fn claim(pool: &PgPool, row_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE queue_rows SET status = 'in_progress' WHERE id = $1 AND status = 'pending'",
    )
    .bind(row_id)
    .execute(pool)
    .await
    .context("failed to claim row")?;

    Ok(result.rows_affected() > 0)
}

/// Settle a claimed row as `Completed`: `InProgress -> Completed`.
pub async fn complete(pool: &PgPool, row_id: Uuid) -> Result<bool> {
    transition_from_in_progress(pool, row_id, RowStatus::Completed).await
}

/// Settle a claimed row as `Canceled`: `InProgress -> Canceled`.
pub async fn cancel(pool: &PgPool, row_id: Uuid) -> Result<bool> {
    transition_from_in_progress(pool, row_id, RowStatus::Canceled).await
}

/// Settle a claimed row as `Failed`, incrementing `retry_count`:
/// `InProgress -> Failed`.
pub async fn fail(pool: &PgPool, row_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE queue_rows SET status = 'failed', retry_count = retry_count + 1 \
         WHERE id = $1 AND status = 'in_progress'",
    )
    .bind(row_id)
    .execute(pool)
    .await
    .context("failed to fail row")?;

    Ok(result.rows_affected() > 0)
}

async fn transition_from_in_progress(pool: &PgPool, row_id: Uuid, to: RowStatus) -> Result<bool> {
    let result = sqlx::query("UPDATE queue_rows SET status = $1 WHERE id = $2 AND status = 'in_progress'")
        .bind(to)
        .bind(row_id)
        .execute(pool)
        .await
        .with_context(|| format!("failed to transition row {row_id} to {to}"))?;

    Ok(result.rows_affected() > 0)
}

/// Re-queue a `Failed` row back to `Pending` (the `RequeueImmediately`
/// retry mode). Does not check `max_retries`; callers must apply the
/// dead-letter check first.
pub async fn requeue_failed(pool: &PgPool, row_id: Uuid) -> Result<bool> {
    let result =
        sqlx::query("UPDATE queue_rows SET status = 'pending' WHERE id = $1 AND status = 'failed'")
            .bind(row_id)
            .execute(pool)
            .await
            .context("failed to requeue failed row")?;

    Ok(result.rows_affected() > 0)
}

/// Dead-letter a `Failed` row once `retry_count >= max_retries`:
/// `Failed -> DeadLettered`.
pub async fn dead_letter(pool: &PgPool, row_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE queue_rows SET status = 'dead_lettered' WHERE id = $1 AND status = 'failed'",
    )
    .bind(row_id)
    .execute(pool)
    .await
    .context("failed to dead-letter row")?;

    Ok(result.rows_affected() > 0)
}

/// Reset rows stuck `InProgress` for a service back to `Failed`.
///
/// Used for restart recovery: if the poller process crashes mid-dispatch,
/// claimed rows are left in limbo. This resets them so the normal
/// retry/dead-letter policy can pick them back up on the next run.
pub async fn reset_orphaned_in_progress(pool: &PgPool, service_name: &str) -> Result<Vec<QueueRow>> {
    let rows = sqlx::query_as::<_, QueueRow>(
        "UPDATE queue_rows SET status = 'failed', retry_count = retry_count + 1 \
         WHERE service_name = $1 AND status = 'in_progress' \
         RETURNING *",
    )
    .bind(service_name)
    .fetch_all(pool)
    .await
    .context("failed to reset orphaned in-progress rows")?;

    Ok(rows)
}

/// Status counts for a service's rows, for the `opq status` command.
#[derive(Debug, Clone, Default)]
pub struct ServiceProgress {
    pub pending: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub failed: i64,
    pub canceled: i64,
    pub retrying: i64,
    pub dead_lettered: i64,
    pub total: i64,
}

/// Get a summary of row counts by status for a given service.
pub async fn get_service_progress(pool: &PgPool, service_name: &str) -> Result<ServiceProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status::text, COUNT(*) as cnt FROM queue_rows \
         WHERE service_name = $1 GROUP BY status",
    )
    .bind(service_name)
    .fetch_all(pool)
    .await
    .context("failed to get service progress")?;

    let mut progress = ServiceProgress::default();
    for (status, count) in &rows {
        match status.as_str() {
            "pending" => progress.pending = *count,
            "in_progress" => progress.in_progress = *count,
            "completed" => progress.completed = *count,
            "failed" => progress.failed = *count,
            "canceled" => progress.canceled = *count,
            "retrying" => progress.retrying = *count,
            "dead_lettered" => progress.dead_lettered = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}

/// Distinct service names that currently have at least one row.
///
/// Used by the `opq status` command when no service is given, to report
/// across every service seen in the table (not just configured ones).
pub async fn list_service_names(pool: &PgPool) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT DISTINCT service_name FROM queue_rows ORDER BY service_name")
            .fetch_all(pool)
            .await
            .context("failed to list service names")?;

    Ok(rows.into_iter().map(|(s,)| s).collect())
}

/// List rows for a service with a given status, newest last. Used by the
/// CLI's `requeue`/`dead-letter list` style commands and by tests.
pub async fn list_by_status(
    pool: &PgPool,
    service_name: &str,
    status: RowStatus,
) -> Result<Vec<QueueRow>> {
    let rows = sqlx::query_as::<_, QueueRow>(
        "SELECT * FROM queue_rows WHERE service_name = $1 AND status = $2 ORDER BY inserted_at ASC",
    )
    .bind(service_name)
    .bind(status)
    .fetch_all(pool)
    .await
    .context("failed to list rows by status")?;

    Ok(rows)
}

/// Age of the oldest pending row for a service, if any -- a useful signal
/// for dashboards even though this crate does not ship one.
pub async fn oldest_pending_inserted_at(
    pool: &PgPool,
    service_name: &str,
) -> Result<Option<DateTime<Utc>>> {
    let row: Option<(DateTime<Utc>,)> = sqlx::query_as(
        "SELECT MIN(inserted_at) FROM queue_rows WHERE service_name = $1 AND status = 'pending'",
    )
    .bind(service_name)
    .fetch_optional(pool)
    .await
    .context("failed to fetch oldest pending row")?;

    Ok(row.map(|(ts,)| ts))
}
