//! eSign API Server - Backend for template signing
//!
//! Provides REST endpoints under `/api/esign` for:
//! - Access checks with a shared secret
//! - Session lifecycle (init, open, signature upload, compose)
//! - Template preview and signed document download
//!
//! Templates come from and signed output goes to Google Drive; session
//! bookkeeping lives in SQLite and uploaded signatures stay in memory.

pub mod auth;
pub mod config;
pub mod drive;
pub mod error;
pub mod handlers;
pub mod models;
pub mod naming;
pub mod state;
pub mod store;
pub mod webhook;

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::{AppState, WorkflowSettings};

/// Routes mounted under `/api/esign`
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/authorize", post(handlers::authorize))
        .route("/session/init", post(handlers::init_session))
        .route("/session/open", post(handlers::open_session))
        .route("/upload/signature", post(handlers::upload_signature))
        .route("/compose", post(handlers::compose))
        .route("/session/pdf/:record_id", get(handlers::preview_pdf))
        .route("/:record_id/download", get(handlers::download_signed))
        .fallback(handlers::route_not_found)
}

/// Full application: API, health check, static UI and middleware.
///
/// Rate limiting is added by the binary since it needs peer addresses.
pub fn router(state: Arc<AppState>, static_dir: &Path, max_upload_bytes: usize) -> Router {
    // CORS configuration for web clients
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/api/esign", api_routes())
        .fallback_service(ServeDir::new(static_dir))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
