mod config;
mod enqueue_cmd;
mod requeue_cmd;
mod run_cmd;
mod status_cmd;

use clap::{Parser, Subcommand};
use opq_db::pool;

use config::{ConfigFile, OpqConfig};

#[derive(Parser)]
#[command(name = "opq", about = "Fair, multi-tenant task scheduler for tenant-service operations")]
struct Cli {
    /// Database URL (overrides OPQ_DATABASE_URL env var and the config file)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Path to the config file (defaults to ~/.config/opq/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter opq config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/opq")]
        db_url: String,
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
    /// Create the database and run migrations
    DbInit,
    /// Run the poller loop until Ctrl+C
    Run,
    /// Insert a Pending row into the queue
    Enqueue {
        /// Logical tenant id
        #[arg(long)]
        tenant: String,
        /// Product SKU (fairness partition key)
        #[arg(long)]
        sku: String,
        /// Downstream service name (selects the handler/policy)
        #[arg(long)]
        service: String,
        /// create, update, or delete
        #[arg(long)]
        operation: String,
        #[arg(long)]
        execution_instance_id: Option<String>,
        #[arg(long)]
        event_instance_id: Option<String>,
    },
    /// Show queue progress by status (omit --service to list every service)
    Status {
        #[arg(long)]
        service: Option<String>,
    },
    /// Manually return a Failed row to Pending
    Requeue {
        /// Row id (UUID)
        row_id: String,
    },
    /// Manually dead-letter a Failed row
    DeadLetter {
        /// Row id (UUID)
        row_id: String,
    },
}

fn cmd_init(db_url: &str, force: bool, path: Option<&str>) -> anyhow::Result<()> {
    let path = path.map(std::path::PathBuf::from);
    let resolved_path = path.clone().unwrap_or_else(config::config_path);

    if resolved_path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            resolved_path.display()
        );
    }

    let mut cfg = ConfigFile::default();
    cfg.database.url = db_url.to_owned();

    let written = config::save_config(&cfg, path.as_deref())?;
    println!("Config written to {}", written.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Add [[services]] entries to exercise the poller, then run `opq db-init` and `opq run`.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Commands::Init { db_url, force } = &cli.command {
        cmd_init(db_url, *force, cli.config.as_deref())?;
        return Ok(());
    }

    let config_path = cli.config.as_ref().map(std::path::PathBuf::from);
    let resolved = OpqConfig::resolve(cli.database_url.as_deref(), config_path.as_deref())?;

    match cli.command {
        Commands::Init { .. } => unreachable!("handled above"),
        Commands::DbInit => {
            run_cmd::run_db_init(&resolved).await?;
        }
        Commands::Run => {
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            run_cmd::run_poller(&resolved, db_pool).await?;
        }
        Commands::Enqueue {
            tenant,
            sku,
            service,
            operation,
            execution_instance_id,
            event_instance_id,
        } => {
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = enqueue_cmd::run_enqueue(
                &db_pool,
                &tenant,
                &sku,
                &service,
                &operation,
                execution_instance_id.as_deref(),
                event_instance_id.as_deref(),
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { service } => {
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, service.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Requeue { row_id } => {
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = requeue_cmd::run_requeue(&db_pool, &row_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::DeadLetter { row_id } => {
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = requeue_cmd::run_dead_letter(&db_pool, &row_id).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
