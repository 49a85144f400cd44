//! Stream router and WebSocket handlers
//!
//! Each WebSocket upgrade becomes one independent [`Session`]: an initial
//! snapshot, then a fresh snapshot (or the "no change" sentinel) after every
//! change event, throttled by the client's period and kept alive by pings.
//! Plain HTTP handlers expose the same collections for reading and mutation.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tracing::{Instrument, debug, info_span, warn};

use listcast_core::{
    ChangeEvents, Collection, FrameSink, FrameSource, Inbound, Session, SessionConfig,
    SessionIds, TransportError, update_period,
};

use crate::store::{Resource, ResourceStore, StoreError, StoreLister};

/// Shared state for all handlers
#[derive(Clone)]
pub struct StreamRouter {
    store: Arc<ResourceStore>,
    config: SessionConfig,
    ids: Arc<SessionIds>,
}

impl StreamRouter {
    /// Create a router serving `store` with the given base session config
    pub fn new(store: Arc<ResourceStore>, config: SessionConfig) -> Self {
        Self {
            store,
            config,
            ids: Arc::new(SessionIds::new()),
        }
    }

    #[cfg(test)]
    pub fn store(&self) -> &Arc<ResourceStore> {
        &self.store
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = match &self {
            StoreError::UnknownStream(_) | StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
            StoreError::InvalidResource(_) => StatusCode::BAD_REQUEST,
            StoreError::Io(_) | StoreError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Write half of an axum WebSocket
struct SocketSink(SplitSink<WebSocket, Message>);

#[async_trait]
impl FrameSink for SocketSink {
    async fn send_text(&mut self, payload: String) -> Result<(), TransportError> {
        self.0
            .send(Message::Text(payload.into()))
            .await
            .map_err(TransportError::new)
    }

    async fn send_ping(&mut self) -> Result<(), TransportError> {
        self.0
            .send(Message::Ping(Default::default()))
            .await
            .map_err(TransportError::new)
    }
}

/// Read half of an axum WebSocket
struct SocketFrames(SplitStream<WebSocket>);

#[async_trait]
impl FrameSource for SocketFrames {
    async fn recv(&mut self) -> Option<Result<Inbound, TransportError>> {
        let msg = self.0.next().await?;
        Some(match msg {
            Ok(Message::Close(_)) => Ok(Inbound::Close),
            Ok(_) => Ok(Inbound::Frame),
            Err(e) => Err(TransportError::new(e)),
        })
    }
}

/// WebSocket upgrade handler without a period (send on every change)
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(stream): Path<String>,
    State(router): State<StreamRouter>,
) -> Response {
    start_stream(ws, router, stream, None)
}

/// WebSocket upgrade handler with a client-requested update period
pub async fn ws_period_handler(
    ws: WebSocketUpgrade,
    Path((period, stream)): Path<(String, String)>,
    State(router): State<StreamRouter>,
) -> Response {
    start_stream(ws, router, stream, Some(period))
}

/// Resolve the stream, then upgrade and hand the socket to a session
fn start_stream(
    ws: WebSocketUpgrade,
    router: StreamRouter,
    stream: String,
    period: Option<String>,
) -> Response {
    let (lister, events) = match router
        .store
        .lister(&stream)
        .and_then(|lister| Ok((lister, router.store.subscribe(&stream)?)))
    {
        Ok(found) => found,
        Err(e) => {
            warn!(stream = %stream, "WebSocket upgrade rejected: {}", e);
            return e.into_response();
        }
    };

    let config = router.config.with_period(update_period(period.as_deref()));
    let id = router.ids.allocate();
    let failed_stream = stream.clone();

    ws.on_failed_upgrade(move |e| {
        warn!(stream = %failed_stream, error = %e, "WebSocket upgrade failed");
    })
    .on_upgrade(move |socket| {
        let span = info_span!("stream", id, stream = %stream);
        serve_socket(socket, id, lister, events, config).instrument(span)
    })
}

/// Run one session over an upgraded socket
async fn serve_socket(
    socket: WebSocket,
    id: u64,
    lister: StoreLister,
    events: ChangeEvents,
    config: SessionConfig,
) {
    debug!("websocket: open");
    let (sink, frames) = socket.split();
    let session = Session::new(id, Arc::new(lister), SocketSink(sink), config);

    match session.run(SocketFrames(frames), events).await {
        Ok(()) => debug!("websocket: closed by client"),
        Err(e) => warn!(error = %e, "websocket: session ended"),
    }
}

/// Current contents of a stream
pub async fn list_stream(
    Path(stream): Path<String>,
    State(router): State<StreamRouter>,
) -> Result<Json<Collection<Resource>>, StoreError> {
    Ok(Json(router.store.list(&stream)?))
}

/// Insert or replace a resource from a JSON object body
pub async fn put_resource(
    Path((stream, id)): Path<(String, String)>,
    State(router): State<StreamRouter>,
    Json(body): Json<Value>,
) -> Result<Json<Resource>, StoreError> {
    let Value::Object(fields) = body else {
        return Err(StoreError::InvalidResource(
            "body must be a JSON object".to_string(),
        ));
    };
    Ok(Json(router.store.upsert(&stream, &id, fields)?))
}

/// Remove a resource
pub async fn delete_resource(
    Path((stream, id)): Path<(String, String)>,
    State(router): State<StreamRouter>,
) -> Result<StatusCode, StoreError> {
    router.store.remove(&stream, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::StreamSpec;

    fn test_router() -> StreamRouter {
        let store = Arc::new(ResourceStore::new(&[StreamSpec::new("volumes", "volume")]));
        StreamRouter::new(store, SessionConfig::default())
    }

    #[test]
    fn test_store_error_status_codes() {
        let status = |e: StoreError| e.into_response().status();
        assert_eq!(
            status(StoreError::UnknownStream("x".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(StoreError::NotFound {
                stream: "volumes".to_string(),
                id: "v".to_string()
            }),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status(StoreError::InvalidResource("bad".to_string())),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_router_shares_store_across_clones() {
        let router = test_router();
        let clone = router.clone();
        assert!(Arc::ptr_eq(router.store(), clone.store()));
        assert_eq!(router.ids.allocate(), 1);
        assert_eq!(clone.ids.allocate(), 2);
    }
}
