use std::net::SocketAddr;
use std::sync::Arc;
use clap::Parser;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber;

use gateward::clock::{Clock, SystemClock};
use gateward::config::GatewayConfig;
use gateward::pipeline::Pipeline;
use gateward::server::HttpServer;
use gateward::store::{InMemoryCacheStore, InMemoryCounterStore};
use gateward::upstream::HttpUpstream;

#[derive(Parser, Debug)]
#[command(name = "gateward", version, about = "Admission-control gateway")]
struct Args {
    /// Path to a YAML configuration file
    #[arg(long)]
    config: Option<String>,

    /// Override the configured listen address
    #[arg(long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Gateward Admission Gateway");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    config.validate()?;
    let config = Arc::new(config);
    info!(
        listen = %config.server.listen_addr,
        upstream = %config.upstream.base_url,
        endpoint_classes = config.endpoint_classes.len(),
        "Configuration loaded"
    );

    // Wire the pipeline over in-process stores
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let counter_store = Arc::new(InMemoryCounterStore::new(Arc::clone(&clock)));
    let cache_store = Arc::new(InMemoryCacheStore::new());
    let upstream = Arc::new(HttpUpstream::new(&config.upstream.base_url));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&config),
        counter_store,
        cache_store,
        upstream,
        clock,
    ));
    info!("Admission pipeline initialized");

    // Run the server with graceful shutdown on Ctrl+C
    let server = HttpServer::new(
        config.server.listen_addr,
        pipeline,
        config.server.identity_header.clone(),
    );
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Gateward Admission Gateway stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
