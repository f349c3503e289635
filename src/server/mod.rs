//! HTTP server: call-upload ingestion, the REST API the web/map client
//! polls, and the `socketioxide` live push layer (spec §6).

mod api;

use std::sync::Arc;

use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use socketioxide::SocketIo;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::ApiKeyStore;
use crate::error::Result;
use crate::pipeline::Pipeline;
use crate::storage::Storage;

#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub api_keys: Arc<ApiKeyStore>,
    pub pipeline: Arc<Pipeline>,
    pub logs_dir: String,
}

/// Build the router and the `SocketIo` layer it's served behind. Returned
/// separately so `main` can hand `io` to the live-fanout polling loops
/// before the server starts listening.
pub fn build(state: AppState) -> (Router, SocketIo) {
    let (socket_layer, io) = SocketIo::new_layer();

    let router = Router::new()
        .route("/health", get(health))
        .route("/api/call-upload", post(crate::ingest::handle_call_upload))
        .route("/audio/:id", get(api::get_audio))
        .route("/api/calls", get(api::list_calls))
        .route("/api/call/:id/details", get(api::call_details))
        .route("/api/additional-transcriptions/:callId", get(api::additional_transcriptions))
        .route("/api/talkgroup/:id/calls", get(api::talkgroup_calls))
        .route("/api/talkgroups", get(api::list_talkgroups))
        .route("/api/markers/:id/location", put(api::set_marker_location))
        .route("/api/markers/:id", delete(api::clear_marker))
        .route("/api/log/correction", post(api::log_correction))
        .route("/api/log/deletion", post(api::log_deletion))
        .layer(socket_layer)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    (router, io)
}

/// Run the HTTP server. `io` is accepted here (rather than built internally)
/// so callers can wire the live-fanout polling loops to the same instance.
pub async fn run(router: Router, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// `GET /health` — liveness probe; reports build provenance stamped by
/// `build.rs` alongside crate version (spec §6 supplemental, ambient).
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "git_commit": env!("GIT_COMMIT"),
        "build_time": env!("BUILD_TIME"),
    }))
}
