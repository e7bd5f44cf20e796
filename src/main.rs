//! civic-guard server.
//!
//! Loads the configuration, serves the guarded API plus health probes, the
//! admin API on its own port, and Prometheus metrics. The config file is
//! watched and reloaded in place.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use civic_guard::config::watcher::ConfigWatcher;
use civic_guard::config::{load_config, GuardConfig};
use civic_guard::lifecycle::signals::trigger_on_signal;
use civic_guard::observability::{logging, metrics};
use civic_guard::{HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "civic-guard")]
#[command(about = "Rate limiting and circuit breaking in front of the civic API", long_about = None)]
struct Args {
    /// Path to a TOML config file. Built-in defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GuardConfig::default(),
    };

    logging::init_logging(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "civic-guard starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        breakers = config.breakers.len(),
        rate_limit_policies = config.rate_limit.policies.len(),
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher alive for the life of the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::warn!(error = %e, "Config hot reload disabled");
                    (None, updates)
                }
            }
        }
        None => (None, mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config);
    let mut server = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    tokio::select! {
        result = &mut server => result??,
        _ = trigger_on_signal(&shutdown) => server.await??,
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
