//! Marketplace API gateway.
//!
//! Loads `gateway.toml` (or the file named by `--config` / `GATEWAY_CONFIG`),
//! serves the public listener and, when enabled, the admin listener.

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use marketplace_gateway::admin::setup_admin_router;
use marketplace_gateway::config::loader::apply_env_overrides;
use marketplace_gateway::config::watcher::ConfigWatcher;
use marketplace_gateway::config::{load_config, GatewayConfig};
use marketplace_gateway::lifecycle::{wait_for_signal, Shutdown};
use marketplace_gateway::observability::{logging, metrics};
use marketplace_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "marketplace-gateway", version, about = "API gateway for the marketplace services")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "GATEWAY_CONFIG", default_value = "gateway.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let watch = args.config.exists();
    let config = if watch {
        load_config(&args.config)?
    } else {
        let mut config = GatewayConfig::default();
        apply_env_overrides(&mut config);
        config
    };

    logging::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "marketplace-gateway starting");
    if !watch {
        tracing::warn!(path = ?args.config, "Config file not found, using defaults");
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.reverse_proxy.routes.len(),
        clusters = config.reverse_proxy.clusters.len(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics exporter");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let (watcher, config_updates) = ConfigWatcher::new(&args.config);
    // Kept alive for the lifetime of the process.
    let _watcher = if watch {
        match watcher.run() {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::error!(error = %e, "Config watcher failed to start, hot reload disabled");
                None
            }
        }
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let admin = config.admin.clone();
    let server = HttpServer::new(config)?;
    let shutdown = Shutdown::new();

    if admin.enabled {
        let admin_listener = TcpListener::bind(&admin.bind_address).await?;
        tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
        let router = setup_admin_router(server.state());
        let mut admin_shutdown = shutdown.subscribe();
        tokio::spawn(async move {
            let result = axum::serve(admin_listener, router)
                .with_graceful_shutdown(async move {
                    let _ = admin_shutdown.recv().await;
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API stopped with error");
            }
        });
    }

    let server_task = tokio::spawn(server.run(listener, config_updates, shutdown.subscribe()));

    wait_for_signal().await;
    tracing::info!("Shutdown signal received, draining");
    shutdown.trigger();

    server_task.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
