// Taskgate - Main Entry Point
//
// Runs the admission front end, the durable queue and the worker pool in a
// single process.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use taskgate::admission::Admission;
use taskgate::audit::FileAuditLog;
use taskgate::clock::{Clock, SystemClock};
use taskgate::config::Config;
use taskgate::metrics;
use taskgate::queue::{LocalQueue, TaskQueue};
use taskgate::rate_limit::RateLimiter;
use taskgate::server::{self, AppState};
use taskgate::worker::{AuditHandler, WorkerPool};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Taskgate: rate-limited task admission with a durable worker queue
#[derive(Parser, Debug)]
#[command(name = "taskgate")]
#[command(author = "Taskgate Contributors")]
#[command(version)]
#[command(about = "Per-identity rate-limited task queue", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the configuration file (default: ~/.config/taskgate/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Accept submissions and run the worker pool (default)
    Serve,
    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(path)?
        }
        None => Config::load()?,
    };

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            init_tracing(&config, args.verbose)?;
            serve(config).await
        }
        Commands::CheckConfig => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render configuration")?;
            println!("{}", rendered);
            Ok(())
        }
    }
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

async fn serve(config: Config) -> Result<()> {
    info!("Taskgate v{} starting...", env!("CARGO_PKG_VERSION"));

    if config.metrics.enabled {
        metrics::init().context("Failed to initialize metrics")?;
    }

    let queue = Arc::new(
        LocalQueue::open(&config.queue.endpoint, config.queue.compact_after)
            .await
            .with_context(|| format!("Failed to open task queue at {}", config.queue.endpoint))?,
    );
    let stats = queue.stats().await;
    info!(
        pending = stats.pending,
        "Task queue opened at {}", config.queue.endpoint
    );

    let audit = Arc::new(
        FileAuditLog::open(&config.audit.log_file, config.audit.echo_stdout)
            .await
            .with_context(|| format!("Failed to open audit log {}", config.audit.log_file))?,
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let handler = Arc::new(AuditHandler::new(audit, Arc::clone(&clock)));
    let pool = WorkerPool::spawn(&config.workers, queue.clone(), handler);

    let admission = Admission::new(
        RateLimiter::in_memory(&config.rate_limit),
        queue.clone(),
        clock,
    );
    let app = server::router(AppState { admission }, config.metrics.enabled);

    let result = server::serve(config.socket_addr()?, app, shutdown_signal()).await;

    pool.shutdown().await;
    queue.close().await;
    let stats = queue.stats().await;
    info!(
        pending = stats.pending,
        completed = stats.completed,
        failed = stats.failed,
        "Taskgate stopped"
    );

    result
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
