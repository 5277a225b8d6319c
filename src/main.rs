use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use rdict::config::Config;
use rdict::context::AppContext;
use rdict::http::{self, AppState};
use rdict::reliability::RetryConfig;
use rdict::services::objects::FilesystemObjectStore;
use rdict::services::snapshot::Snapshotter;
use rdict::telemetry;

#[derive(Parser)]
#[command(name = "rdict", version, about = "Multi-store key-value service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP service
    Serve {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Override the listening port
        #[arg(short, long)]
        port: Option<u16>,
        /// Restore the stored snapshot before serving
        #[arg(long)]
        restore: bool,
    },
    /// Load and verify the stored snapshot without serving
    Restore {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate configuration and print warnings
    CheckConfig {
        /// Path to a TOML config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve {
            config,
            port,
            restore,
        } => serve(config.as_deref(), port, restore).await,
        Commands::Restore { config } => restore(config.as_deref()).await,
        Commands::CheckConfig { config } => check_config(config.as_deref()),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = Config::load(path)?;
    let validation = config.validate()?;
    telemetry::init_tracing(&config.logging);
    for warning in &validation.warnings {
        warn!("{warning}");
    }
    Ok(config)
}

async fn serve(path: Option<&Path>, port: Option<u16>, restore: bool) -> Result<()> {
    let mut config = load_config(path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    let metrics = telemetry::install_metrics()?;

    let ctx = Arc::new(AppContext::from_config(&config).await?);
    if restore || config.snapshot.restore_on_boot {
        match ctx.restore_with_retry(RetryConfig::boot()).await {
            Ok(Some(summary)) => info!(
                stores = summary.stores,
                entries = summary.entries,
                "Restored snapshot"
            ),
            Ok(None) => info!("No snapshot found, starting empty"),
            Err(e) => return Err(e).context("Failed to restore snapshot"),
        }
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;
    let state = AppState::new(Arc::clone(&ctx), Some(metrics));
    let served = http::serve(state, addr).await;
    ctx.shutdown();
    served
}

async fn restore(path: Option<&Path>) -> Result<()> {
    let config = load_config(path)?;
    let bucket = FilesystemObjectStore::open(&config.snapshot.bucket)?;
    let snapshotter = Snapshotter::new(
        Arc::new(bucket),
        config.snapshot.key.clone(),
        config.snapshot.threshold,
    );
    let Some(state) = snapshotter.load().await? else {
        println!(
            "No snapshot at {}/{}",
            config.snapshot.bucket.display(),
            config.snapshot.key
        );
        return Ok(());
    };

    println!(
        "Snapshot v{} created {}: {} stores, {} entries",
        state.format_version,
        state.created_at,
        state.store_count(),
        state.entry_count()
    );
    for (name, entries) in &state.stores {
        println!("  {name}: {} entries", entries.len());
    }
    Ok(())
}

fn check_config(path: Option<&Path>) -> Result<()> {
    let config = Config::load(path)?;
    let validation = config.validate()?;
    for warning in &validation.warnings {
        println!("warning: {warning}");
    }
    println!("Configuration OK");
    Ok(())
}
