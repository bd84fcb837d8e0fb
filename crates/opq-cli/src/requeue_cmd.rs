//! Operator overrides on `Failed` rows: `opq requeue` and
//! `opq dead-letter`. These exist so an operator can manually drive the
//! retry/dead-letter policy the Poller otherwise applies automatically.

use anyhow::{Context, Result, bail};
use opq_db::queries::queue;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn run_requeue(pool: &PgPool, row_id: &str) -> Result<()> {
    let id = Uuid::parse_str(row_id).with_context(|| format!("invalid row id: {row_id}"))?;
    if !queue::requeue_failed(pool, id).await? {
        bail!("row {id} was not in Failed status; nothing to requeue");
    }
    println!("Row {id} requeued to Pending.");
    Ok(())
}

pub async fn run_dead_letter(pool: &PgPool, row_id: &str) -> Result<()> {
    let id = Uuid::parse_str(row_id).with_context(|| format!("invalid row id: {row_id}"))?;
    if !queue::dead_letter(pool, id).await? {
        bail!("row {id} was not in Failed status; nothing to dead-letter");
    }
    println!("Row {id} dead-lettered.");
    Ok(())
}
