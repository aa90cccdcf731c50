//! # Rallypoint Worker
//!
//! Runs the reminder scheduler: every poll interval it looks for events
//! starting in the reminder windows and reminds their attendees.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p rallypoint-worker            # poll forever against Postgres
//! cargo run -p rallypoint-worker -- --once  # run a single tick and exit
//! cargo run -p rallypoint-worker -- --memory
//! ```
//!
//! `--memory` runs against an empty in-memory store, which is only useful
//! for checking configuration and logging.

use clap::Parser;
use rallypoint_shared::db::migrations::run_migrations;
use rallypoint_shared::db::pool::create_pool;
use rallypoint_shared::store::{AttendanceStore, MemoryStore, PgStore};
use rallypoint_worker::config::Settings;
use rallypoint_worker::dispatch::build_dispatcher;
use rallypoint_worker::reminders::ReminderScheduler;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Rallypoint reminder worker
#[derive(Debug, Parser)]
#[command(name = "rallypoint-worker")]
#[command(about = "Sends event reminders on a polling schedule", long_about = None)]
#[command(version)]
struct Cli {
    /// Run a single reminder tick and exit
    #[arg(long)]
    once: bool,

    /// Use an empty in-memory store instead of Postgres
    #[arg(long)]
    memory: bool,

    /// Emit logs as JSON
    #[arg(long, env = "RALLYPOINT_LOG_JSON")]
    json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rallypoint_worker=debug,rallypoint_shared=info".into());

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    tracing::info!(
        "Rallypoint Worker v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    let settings = Settings::load()?;
    let config = settings.notifier_config()?;
    let dispatcher = build_dispatcher(&settings.dispatch_backend()?)?;
    let renderer = Arc::new(config.renderer());

    let pool = if cli.memory {
        None
    } else {
        let pool = create_pool(settings.database_config()).await?;
        run_migrations(&pool).await?;
        Some(pool)
    };

    let store: Arc<dyn AttendanceStore> = match &pool {
        Some(pool) => Arc::new(PgStore::new(pool.clone())),
        None => Arc::new(MemoryStore::new()),
    };

    let scheduler = ReminderScheduler::new(store, dispatcher, renderer, config)?;

    if cli.once {
        let report = scheduler.tick().await;
        tracing::info!(
            sent = report.total_sent(),
            failures = report.failures(),
            "Single tick complete"
        );
    } else {
        let shutdown = CancellationToken::new();
        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received, stopping...");
                    signal_token.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "Failed to listen for shutdown signal"),
            }
        });

        scheduler.run(shutdown).await;
    }

    if let Some(pool) = pool {
        pool.close().await;
        tracing::info!("Database pool closed");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from(["rallypoint-worker", "--once", "--memory"]).unwrap();
        assert!(cli.once);
        assert!(cli.memory);

        let cli = Cli::try_parse_from(["rallypoint-worker"]).unwrap();
        assert!(!cli.once);
        assert!(!cli.memory);
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["rallypoint-worker", "--onec"]).is_err());
    }
}
