mod cli;
mod router;
mod server;
mod store;


use std::sync::Arc;
use std::time::Duration;

use listcast_core::SessionConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::router::StreamRouter;
use crate::store::ResourceStore;

#[tokio::main]
async fn main() {
    // Initialize tracing with RUST_LOG support
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = cli::Cli::parse();
    let specs = cli.stream_specs();

    let store = Arc::new(ResourceStore::new(&specs));

    info!(
        host = %cli.host,
        port = cli.port,
        streams = ?store.stream_names().collect::<Vec<_>>(),
        seed = ?cli.seed,
        "listcast starting"
    );

    if let Some(path) = &cli.seed {
        if let Err(e) = store.seed_from_file(path) {
            error!("Failed to load seed file {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }

    let config = SessionConfig {
        keepalive_interval: Duration::from_secs(cli.keepalive_secs.max(1)),
        write_timeout: Duration::from_secs(cli.write_timeout_secs.max(1)),
        ..SessionConfig::default()
    };
    let stream_router = StreamRouter::new(store, config);

    let listener = match TcpListener::bind((cli.host.as_str(), cli.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}:{}: {}", cli.host, cli.port, e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
        }
        signal_cancel.cancel();
    });

    // Start server (blocks until shutdown)
    if let Err(e) = server::run_server(listener, stream_router, cancel).await {
        error!("Server error: {}", e);
        std::process::exit(1);
    }

    info!("listcast shut down");
}
