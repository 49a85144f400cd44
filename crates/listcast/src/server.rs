//! HTTP server
//!
//! Implements the axum server with routes for health, WebSocket list streams,
//! and the plain HTTP resource endpoints.

use std::net::SocketAddr;

use axum::Router;
use axum::routing::{get, put};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::router::StreamRouter;

async fn healthz() -> &'static str {
    "ok"
}

/// Build the axum application router
///
/// Separated from `run_server` to enable testing without TCP binding.
pub(crate) fn build_app(router: StreamRouter) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/ws/{stream}", get(crate::router::ws_handler))
        .route("/v1/ws/{period}/{stream}", get(crate::router::ws_period_handler))
        .route("/v1/streams/{stream}", get(crate::router::list_stream))
        .route(
            "/v1/streams/{stream}/{id}",
            put(crate::router::put_resource)
                .delete(crate::router::delete_resource),
        )
        .with_state(router)
}

/// Run the HTTP server until `shutdown` is cancelled
pub async fn run_server(
    listener: TcpListener,
    router: StreamRouter,
    shutdown: CancellationToken,
) -> Result<(), std::io::Error> {
    let app = build_app(router);
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "listcast server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
