//! Thin process entry point for the reconciliation engine.
//!
//! Scheduling cadence is external (cron, systemd timers); this binary
//! runs exactly one pass and exits. A failed pass exits nonzero and is
//! expected to be retried on the next scheduled run.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use reconciler::source::HttpSource;
use reconciler::storage::PostgresStore;
use reconciler::{ReconcilerConfig, SessionController};

#[derive(Parser)]
#[command(name = "recon", about = "Listing liveness reconciler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one reconciliation pass.
    Run {
        /// Base URL of the listings source API. Falls back to
        /// RECON_SOURCE_URL.
        #[arg(long)]
        source_url: Option<String>,

        /// Apply pending database migrations before the pass.
        #[arg(long)]
        migrate: bool,
    },
    /// Print the effective configuration and exit.
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            source_url,
            migrate,
        } => run_pass(source_url, migrate).await,
        Command::ShowConfig => {
            let config = ReconcilerConfig::from_env();
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

async fn run_pass(source_url: Option<String>, migrate: bool) -> Result<()> {
    let config = ReconcilerConfig::from_env();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let source_url = source_url
        .or_else(|| std::env::var("RECON_SOURCE_URL").ok())
        .context("pass --source-url or set RECON_SOURCE_URL")?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    if migrate {
        sqlx::migrate!("../reconciler/migrations")
            .run(&pool)
            .await
            .context("failed to apply migrations")?;
    }

    let store = Arc::new(PostgresStore::new(pool));
    let adapter = Arc::new(HttpSource::new(&source_url)?);
    let controller = SessionController::new(store, adapter, config);

    let report = controller.run().await?;
    tracing::info!(
        session_id = %report.session.id,
        seeded = report.seeded,
        success = report.summary.success,
        deactivated = report.summary.deactivated,
        errors = report.summary.errors,
        skipped = report.summary.skipped,
        owner_failures = report.summary.owner_failures,
        "pass finished"
    );
    Ok(())
}
