//! The `opq run` command: wires the configured service policies to
//! reference handlers and drives the poller until `Ctrl+C`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use opq_core::handler::{AlwaysFailHandler, AlwaysSucceedHandler, Handler, HandlerRegistry, LatencyHandler};
use opq_core::poller::Poller;
use opq_db::pool;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{OpqConfig, ServiceSection, service_policy};

/// Parse a `ServiceSection::handler` string into a boxed [`Handler`].
///
/// Accepts `"succeed"`, `"fail"`, or `"latency:<millis>"`. Real downstream
/// handlers are not part of this crate; these reference handlers exist to
/// exercise the scheduler/poller end to end.
fn build_handler(spec: &str) -> Result<Arc<dyn Handler>> {
    if spec == "succeed" {
        return Ok(Arc::new(AlwaysSucceedHandler));
    }
    if spec == "fail" {
        return Ok(Arc::new(AlwaysFailHandler));
    }
    if let Some(millis) = spec.strip_prefix("latency:") {
        let millis: u64 = millis
            .parse()
            .with_context(|| format!("invalid latency handler spec {spec:?}, expected latency:<millis>"))?;
        return Ok(Arc::new(LatencyHandler::new(Duration::from_millis(millis))));
    }
    bail!("unknown handler spec {spec:?}, expected \"succeed\", \"fail\", or \"latency:<millis>\"");
}

fn build_registry(services: &[ServiceSection]) -> Result<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    for section in services {
        let policy = service_policy(section)?;
        let handler = build_handler(&section.handler)?;
        registry.register(policy, handler);
    }
    Ok(registry)
}

/// Run the poller loop until the process receives `Ctrl+C`.
pub async fn run_poller(config: &OpqConfig, db_pool: PgPool) -> Result<()> {
    if config.services.is_empty() {
        bail!(
            "no services configured; add one or more [[services]] entries to the config file \
             (see `opq init`)"
        );
    }

    let registry = build_registry(&config.services)?;
    let poller_config = config.poller_config.clone();

    info!(
        services = registry.len(),
        tick_interval_secs = poller_config.tick_interval.as_secs(),
        "starting poller"
    );

    let poller = Poller::new(db_pool, registry, poller_config);
    let cancel = CancellationToken::new();

    let run_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { poller.run(cancel).await })
    };

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("received ctrl-c, shutting down poller");
    cancel.cancel();

    run_handle.await.context("poller task panicked")??;
    Ok(())
}

/// Execute the `opq db-init` command: create the database (if missing)
/// and run migrations.
pub async fn run_db_init(config: &OpqConfig) -> Result<()> {
    println!("Initializing opq database...");

    pool::ensure_database_exists(&config.db_config).await?;
    let db_pool = pool::create_pool(&config.db_config).await?;
    pool::run_migrations(&db_pool, pool::default_migrations_path()).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    println!("opq db-init complete.");
    Ok(())
}
