//! The `opq enqueue` command: the producer-facing primitive. A real
//! ingestion API's validation, auth, and idempotency handling are out of
//! scope; this is the bare insert-as-Pending contract.

use anyhow::{Context, Result};
use opq_db::models::Operation;
use opq_db::queries::queue::{self, NewQueueRow};
use sqlx::PgPool;
use uuid::Uuid;

#[allow(clippy::too_many_arguments)]
pub async fn run_enqueue(
    pool: &PgPool,
    tenant_id: &str,
    product_sku: &str,
    service_name: &str,
    operation: &str,
    execution_instance_id: Option<&str>,
    event_instance_id: Option<&str>,
) -> Result<()> {
    let operation: Operation = operation
        .parse()
        .with_context(|| format!("invalid operation {operation:?}, expected create/update/delete"))?;

    let execution_instance_id = match execution_instance_id {
        Some(s) => Uuid::parse_str(s).context("invalid --execution-instance-id")?,
        None => Uuid::new_v4(),
    };
    let event_instance_id = match event_instance_id {
        Some(s) => Uuid::parse_str(s).context("invalid --event-instance-id")?,
        None => Uuid::new_v4(),
    };

    let spec = NewQueueRow {
        execution_instance_id,
        event_instance_id,
        tenant_id: tenant_id.to_owned(),
        product_sku: product_sku.to_owned(),
        service_name: service_name.to_owned(),
        operation,
    };

    let row = queue::enqueue(pool, &spec).await?;
    println!("Enqueued row {} ({} / {} / {})", row.id, service_name, product_sku, operation);
    Ok(())
}
