//! cosmos - command line entry point.
//!
//! # Commands
//!
//! - `cosmos api [--port P] {accounts|transactions|campaigns|public}`: serve one HTTP API
//! - `cosmos task-worker`: run retry tasks (activation, enrolment callbacks, reward issuance)
//! - `cosmos scheduler`: convert pending rewards once their refund window closes
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Initialise logging
//! 3. Create database connection pool
//! 4. Run database migrations
//! 5. Run the selected command

use anyhow::Context;
use clap::{Parser, Subcommand};
use cosmos::{
    config::Config,
    db,
    handlers::{self, Api},
    logging,
    services::task_service::{self, Worker},
    state::AppState,
};

#[derive(Debug, Parser)]
#[command(name = "cosmos", about = "Loyalty APIs, task worker and scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve one of the HTTP APIs.
    Api {
        /// Port to listen on, overrides SERVER_PORT.
        #[arg(long)]
        port: Option<u16>,

        /// Accepted for compatibility with the development tooling.
        #[arg(long)]
        reload: bool,

        #[arg(value_enum)]
        api: Api,
    },
    /// Process queued retry tasks.
    TaskWorker,
    /// Run the periodic pending reward conversion.
    Scheduler,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    logging::init(config.log_formatter);
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let state = AppState::new(pool, config);

    match cli.command {
        Command::Api { port, reload, api } => {
            if reload {
                tracing::warn!("--reload has no effect, restart the process to pick up changes");
            }
            let port = port.unwrap_or(state.config.server_port);
            let app = handlers::app(api, state);

            let addr = format!("0.0.0.0:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            tracing::info!(?api, "Server listening on {}", addr);

            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    tokio::signal::ctrl_c().await.ok();
                })
                .await?;
        }
        Command::TaskWorker => Worker::new(state)?.run().await?,
        Command::Scheduler => task_service::run_scheduler(state).await?,
    }

    Ok(())
}
