//! The `opq status` command: a point-in-time summary of queue progress.
//! The core's observable signals are `tracing` events at transition time;
//! this command queries the store directly for an operator-facing
//! snapshot instead of a metrics scrape endpoint.

use anyhow::Result;
use opq_db::queries::queue;
use sqlx::PgPool;

pub async fn run_status(pool: &PgPool, service_name: Option<&str>) -> Result<()> {
    let services: Vec<String> = match service_name {
        Some(s) => vec![s.to_owned()],
        None => queue::list_service_names(pool).await?,
    };

    if services.is_empty() {
        println!("No rows in the queue yet.");
        return Ok(());
    }

    for service in &services {
        let progress = queue::get_service_progress(pool, service).await?;
        let oldest = queue::oldest_pending_inserted_at(pool, service).await?;

        println!("{service}:");
        println!(
            "  pending={} in_progress={} completed={} failed={} canceled={} retrying={} dead_lettered={} total={}",
            progress.pending,
            progress.in_progress,
            progress.completed,
            progress.failed,
            progress.canceled,
            progress.retrying,
            progress.dead_lettered,
            progress.total,
        );
        if let Some(oldest) = oldest {
            println!("  oldest pending row inserted at {oldest}");
        }
    }

    Ok(())
}
