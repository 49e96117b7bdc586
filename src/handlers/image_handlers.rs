//! HTTP handlers for the image gallery API.
//! Decodes upload payloads, delegates to the ingestion and catalog
//! services, and shapes their results into the wire JSON.

use crate::{errors::AppError, models::image::ImageRecord, services::AppState};
use axum::{
    Json,
    extract::{Query, State, rejection::JsonRejection},
};
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};

/// Body of `POST /api/process-image`.
#[derive(Debug, Deserialize)]
pub struct ProcessImageRequest {
    /// Base64-encoded image bytes, standard alphabet.
    pub image: String,
    /// Client-side filename, kept verbatim as the display name.
    pub filename: String,
}

/// Response of `POST /api/process-image`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessImageResponse {
    pub tags: Vec<String>,
    pub image_id: String,
}

/// Query params accepted by `GET /api/search`.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
}

/// `POST /api/process-image` — decode, normalize, tag, and store an upload.
pub async fn process_image(
    State(state): State<AppState>,
    payload: Result<Json<ProcessImageRequest>, JsonRejection>,
) -> Result<Json<ProcessImageResponse>, AppError> {
    let Json(request) = payload.map_err(|err| AppError::bad_request(err.body_text()))?;

    let raw = general_purpose::STANDARD
        .decode(request.image.as_bytes())
        .map_err(|err| AppError::bad_request(format!("image is not valid base64: {err}")))?;
    if raw.is_empty() {
        return Err(AppError::bad_request("image payload is empty"));
    }

    let receipt = state.ingest.ingest(raw.into(), &request.filename).await?;
    Ok(Json(ProcessImageResponse {
        tags: receipt.tags,
        image_id: receipt.image_id,
    }))
}

/// `GET /api/images` — every stored image with tags and a signed URL.
pub async fn list_images(
    State(state): State<AppState>,
) -> Result<Json<Vec<ImageRecord>>, AppError> {
    let records = state.catalog.list_all().await?;
    Ok(Json(records))
}

/// `GET /api/search?query=` — images whose tags match the query,
/// case-insensitively. A missing or blank query is rejected.
pub async fn search_images(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<ImageRecord>>, AppError> {
    let query = params.query.as_deref().unwrap_or_default();
    let records = state.catalog.search(query).await?;
    Ok(Json(records))
}
