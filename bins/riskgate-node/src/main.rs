//! Riskgate service binary.
//!
//! Opens the risk history (RocksDB, or memory with `--in-memory`), builds
//! the engine from the configured policy, and serves JSON-RPC until Ctrl+C.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use riskgate_core::store::{MemoryRiskStore, RiskStore};
use riskgate_node_lib::{NodeConfig, RiskEngine, RocksRiskStore, start_rpc_server};

/// Riskgate booking risk service.
#[derive(Parser, Debug)]
#[command(
    name = "riskgate-node",
    version,
    about = "Booking risk and fraud evaluation service with JSON-RPC interface"
)]
struct Args {
    /// TOML configuration file. `RISKGATE__*` environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory for the risk history
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// RPC server bind address
    #[arg(long)]
    rpc_bind: Option<String>,

    /// RPC server port
    #[arg(long)]
    rpc_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Keep history in memory only; nothing survives a restart
    #[arg(long)]
    in_memory: bool,
}

impl Args {
    /// Load the layered config, then apply command-line overrides.
    fn into_config(self) -> Result<(NodeConfig, String)> {
        let mut config = NodeConfig::load(self.config.as_deref()).context("invalid configuration")?;
        if let Some(dir) = self.data_dir {
            config.data_dir = dir;
        }
        if let Some(bind) = self.rpc_bind {
            config.rpc_bind = bind;
        }
        if let Some(port) = self.rpc_port {
            config.rpc_port = port;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config.in_memory |= self.in_memory;
        Ok((config, self.log_format))
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let (config, log_format) = match args.into_config() {
        Ok(c) => c,
        Err(e) => {
            // Logging is not up yet: the level itself comes from the config.
            init_logging("info", "text");
            error!("{e:#}");
            process::exit(1);
        }
    };

    init_logging(&config.log_level, &log_format);

    info!("Riskgate v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);
    info!("rpc_addr: {}", config.rpc_addr());
    info!(
        lookback_days = config.engine.lookback_window_days,
        auto_approve_threshold = config.engine.auto_approve_threshold,
        "policy loaded"
    );

    let result = if config.in_memory {
        info!("storage: in-memory");
        serve(MemoryRiskStore::new(), &config).await
    } else {
        match open_rocks(&config) {
            Ok(store) => serve(store, &config).await,
            Err(e) => Err(e),
        }
    };

    if let Err(e) = result {
        error!("{e:#}");
        process::exit(1);
    }
    info!("Riskgate shutdown complete");
}

fn open_rocks(config: &NodeConfig) -> Result<RocksRiskStore> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data_dir {:?}", config.data_dir))?;
    let store = RocksRiskStore::open(config.db_path())
        .with_context(|| format!("failed to open risk history at {:?}", config.db_path()))?;
    info!("storage: {:?}", config.db_path());
    Ok(store)
}

/// Run the engine over `store` until Ctrl+C.
async fn serve<S: RiskStore + 'static>(store: S, config: &NodeConfig) -> Result<()> {
    let engine = RiskEngine::new(store, config.engine.clone()).context("engine refused configuration")?;
    info!("bookings on record: {}", engine.booking_count()?);
    let engine = Arc::new(engine);

    let rpc_handle = start_rpc_server(&config.rpc_addr(), Arc::clone(&engine))
        .await
        .with_context(|| format!("failed to start RPC server on {}", config.rpc_addr()))?;
    info!("RPC server listening on {}", config.rpc_addr());
    info!("Riskgate running (Ctrl+C to stop)");

    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to install Ctrl+C handler")?;
            info!("shutdown signal received");
        }
        _ = rpc_handle.clone().stopped() => {
            info!("RPC server exited");
        }
    }

    rpc_handle.stop().ok();
    info!("RPC server stopped");
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// Pass `format = "json"` for structured JSON output. Any other value
/// defaults to human-readable text. `RUST_LOG` takes precedence over `level_str`.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
