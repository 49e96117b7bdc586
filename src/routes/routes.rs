//! Defines routes for the image gallery API.
//!
//! ## Structure
//! - **Gallery endpoints** (CORS-enabled for the browser frontend)
//!   - `POST /api/process-image` — upload one base64 image, returns its tags
//!   - `GET  /api/images`        — list every stored image with signed URLs
//!   - `GET  /api/search`        — filter images by tag (`?query=beach`)
//!
//! - **Probes** (mounted at root)
//!   - `GET /healthz` — liveness
//!   - `GET /readyz`  — readiness, checks the blob store
//!
//! `OPTIONS` preflights are answered by the CORS layer; anything else
//! outside the table falls through to a JSON 404.

use crate::{
    errors::AppError,
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{list_images, process_image, search_images},
    },
    services::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{Method, Uri},
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Build and return the router for the whole API surface.
///
/// The router carries shared state (`AppState`) to all handlers.
/// `max_body_bytes` caps the upload body; base64 inflates images by a third,
/// so the cap must sit above the largest accepted image accordingly.
pub fn routes(max_body_bytes: usize) -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // gallery endpoints
        .route("/api/process-image", post(process_image))
        .route("/api/images", get(list_images))
        .route("/api/search", get(search_images))
        .fallback(unknown_route)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

/// JSON 404 for anything outside the table above.
async fn unknown_route(uri: Uri) -> AppError {
    AppError::not_found(format!("route {uri}"))
}
