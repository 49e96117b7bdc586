//! src/services/mod.rs
//!
//! Service layer: blob storage, label detection, image normalization, and
//! the ingestion and catalog pipelines built on top of them.

pub mod catalog_service;
pub mod image_service;
pub mod ingest_service;
pub mod storage_service;
pub mod vision_service;

use catalog_service::CatalogService;
use ingest_service::IngestService;

/// Shared handler state, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub ingest: IngestService,
    pub catalog: CatalogService,
}
