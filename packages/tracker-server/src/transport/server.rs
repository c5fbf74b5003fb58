//! `Cache.ContentTracker` RPC server: a single MsgPack-over-HTTP route,
//! deferred-startup lifecycle grounded in the teacher's `NetworkModule`
//! (`network/module.rs`) `new()` -> `start()` -> `serve()` split, minus its
//! WebSocket/TLS surface (dropped — see DESIGN.md).

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::collaborators::ContentTracker;

use super::messages::{TrackerRequest, TrackerResponse, WireError};

const CONTENT_TRACKER_PATH: &str = "/cache/content-tracker";

#[derive(Clone)]
struct AppState {
    tracker: Arc<dyn ContentTracker>,
}

fn build_router(tracker: Arc<dyn ContentTracker>) -> Router {
    Router::new().route(CONTENT_TRACKER_PATH, post(handle_request)).with_state(AppState { tracker })
}

async fn handle_request(State(state): State<AppState>, body: Bytes) -> Response {
    let request: TrackerRequest = match rmp_serde::from_slice(&body) {
        Ok(req) => req,
        Err(err) => {
            let resp = TrackerResponse::Error(WireError { kind: "corrupted".to_string(), diagnostic: err.to_string() });
            return encode_response(StatusCode::BAD_REQUEST, &resp);
        }
    };

    let response = match request {
        TrackerRequest::UpdateLocations { entries } => match state.tracker.update_locations(entries).await {
            Ok(()) => TrackerResponse::Ack,
            Err(err) => TrackerResponse::Error(to_wire_error(&err)),
        },
        TrackerRequest::GetLocations { hashes } => match state.tracker.get_locations(&hashes).await {
            Ok(entries) => TrackerResponse::Locations(entries),
            Err(err) => TrackerResponse::Error(to_wire_error(&err)),
        },
    };

    encode_response(StatusCode::OK, &response)
}

fn to_wire_error(err: &tracker_core::ErrorKind) -> WireError {
    WireError { kind: error_kind_name(err).to_string(), diagnostic: err.to_string() }
}

fn error_kind_name(err: &tracker_core::ErrorKind) -> &'static str {
    use tracker_core::ErrorKind;
    match err {
        ErrorKind::UnknownMachine => "unknown_machine",
        ErrorKind::NoShards => "no_shards",
        ErrorKind::Transient { .. } => "transient",
        ErrorKind::PermanentRejected { .. } => "permanent_rejected",
        ErrorKind::Cancelled => "cancelled",
        ErrorKind::Corrupted { .. } => "corrupted",
    }
}

fn encode_response(status: StatusCode, response: &TrackerResponse) -> Response {
    match rmp_serde::to_vec(response) {
        Ok(bytes) => (status, [("content-type", "application/msgpack")], bytes).into_response(),
        Err(err) => {
            error!(%err, "failed to encode tracker response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Deferred-startup lifecycle: `new()` allocates nothing but the router
/// factory, `start()` binds the listener, `serve()` accepts connections
/// until the shutdown future resolves.
pub struct TransportServer {
    host: String,
    port: u16,
    listener: Option<TcpListener>,
    tracker: Arc<dyn ContentTracker>,
}

impl TransportServer {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16, tracker: Arc<dyn ContentTracker>) -> Self {
        Self { host: host.into(), port, listener: None, tracker }
    }

    /// # Errors
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;
        let port = listener.local_addr()?.port();
        info!(%addr, bound_port = port, "content-tracker transport listening");
        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves. Panics if `start()` wasn't called.
    ///
    /// # Errors
    /// Returns an error on a fatal I/O failure.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = self.listener.expect("start() must be called before serve()");
        let router = build_router(self.tracker);
        axum::serve(listener, router).with_graceful_shutdown(shutdown).await?;
        Ok(())
    }
}
