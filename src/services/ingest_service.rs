//! src/services/ingest_service.rs
//!
//! The ingestion pipeline: validate, normalize, tag, persist. Stages run
//! strictly in order, so an early failure leaves no partial writes. A
//! failure between the image write and the metadata write leaves an orphan
//! blob behind; readers never see it because they drive off metadata.

use crate::{
    errors::{AppError, Stage},
    models::image::{IMAGES_PREFIX, ImageDocument, base_name, metadata_key},
    services::{
        image_service::{self, CANONICAL_CONTENT_TYPE},
        storage_service::BlobStore,
        vision_service::LabelDetector,
    },
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;

/// Outcome of a successful ingestion.
#[derive(Debug, Clone)]
pub struct IngestReceipt {
    pub image_id: String,
    pub tags: Vec<String>,
}

/// Runs uploads through normalize → detect → persist.
#[derive(Clone)]
pub struct IngestService {
    store: Arc<dyn BlobStore>,
    detector: Arc<dyn LabelDetector>,
}

impl IngestService {
    pub fn new(store: Arc<dyn BlobStore>, detector: Arc<dyn LabelDetector>) -> Self {
        Self { store, detector }
    }

    /// Ingest one upload.
    ///
    /// 1. Filename validation — `BadRequest`, nothing external touched yet.
    /// 2. Normalization on the blocking pool — `MalformedImage`.
    /// 3. Label detection on the normalized bytes — `Upstream`.
    /// 4. Image blob write, then paired metadata write — `Upstream`, with
    ///    the stage telling the two writes apart.
    pub async fn ingest(&self, raw: Bytes, filename: &str) -> Result<IngestReceipt, AppError> {
        let name = base_name(filename)
            .ok_or_else(|| AppError::bad_request("a usable filename is required"))?
            .to_string();

        let normalized = tokio::task::spawn_blocking(move || image_service::normalize(&raw))
            .await
            .map_err(AppError::internal)??;
        tracing::debug!(
            "normalized `{}` to {}x{} ({} bytes)",
            name,
            normalized.width,
            normalized.height,
            normalized.bytes.len()
        );

        let tags = self
            .detector
            .detect_labels(&normalized.bytes)
            .await
            .map_err(|err| AppError::upstream(Stage::LabelDetection, err))?;

        // Millisecond timestamps keep ids sortable by upload time; the
        // collision window is accepted, a collision overwrites.
        let image_id = format!(
            "{}{}-{}",
            IMAGES_PREFIX,
            Utc::now().timestamp_millis(),
            name
        );

        self.store
            .put(&image_id, normalized.bytes, CANONICAL_CONTENT_TYPE)
            .await
            .map_err(|err| AppError::upstream(Stage::ImageWrite, err))?;

        let document = ImageDocument {
            id: image_id.clone(),
            original_name: filename.to_string(),
            tags: tags.clone(),
        };
        let body = serde_json::to_vec(&document).map_err(AppError::internal)?;
        self.store
            .put(&metadata_key(&image_id), body.into(), "application/json")
            .await
            .map_err(|err| AppError::upstream(Stage::MetadataWrite, err))?;

        tracing::info!("ingested `{}` with {} tags", image_id, tags.len());

        Ok(IngestReceipt { image_id, tags })
    }
}
