//! Local development proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http::server ──▶ routing::Dispatcher
//!                                         │
//!                       ┌─────────────────┼──────────────────────┐
//!                       ▼                 ▼                      ▼
//!                 rules (redirects,  functions registry    edge / images /
//!                 headers, JWT)      (build gate, routes)  add-on prefixes
//!                       │                 │                      │
//!                       └────────┬────────┴──────────────────────┘
//!                                ▼
//!                         http::forward
//!          framework dev server │ functions server │ external │ publish dir
//!                                │
//!     Client Response            ▼
//!     ◀────────────── http::response (header rules, ETag, HTML injection)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use dev_edge_proxy::config::load_config;
use dev_edge_proxy::lifecycle::{signals, Services, Shutdown};
use dev_edge_proxy::net::load_tls_config;
use dev_edge_proxy::observability::{self, metrics};
use dev_edge_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "dev-edge-proxy")]
#[command(about = "Local development proxy for sites, functions and redirects", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "dev.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    observability::init_logging(&config.observability);
    tracing::info!(config = ?cli.config, "dev-edge-proxy v0.1.0 starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    let services = Services::start(&config, &shutdown);
    let server_shutdown = shutdown.subscribe();

    let rules = services.rules.clone();
    let signal_task = tokio::spawn(async move {
        signals::shutdown_on_signal(rules, &shutdown).await;
    });

    let server = HttpServer::new(config.clone(), services.dispatcher.clone());
    match &config.listener.tls {
        Some(tls) => {
            let addr: SocketAddr = config.listener.bind_address.parse()?;
            let tls = load_tls_config(tls).await?;
            server.run_tls(addr, tls, server_shutdown).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            tracing::info!(
                address = %listener.local_addr()?,
                publish_dir = ?config.site.publish_dir,
                "Listening for connections"
            );
            server.run(listener, server_shutdown).await?;
        }
    }

    signal_task.abort();
    drop(services);
    tracing::info!("Shutdown complete");
    Ok(())
}
