//! src/services/catalog_service.rs
//!
//! Read side of the gallery: enumerate metadata documents, optionally
//! filter by tag, and attach fresh signed URLs. Both operations share one
//! fetch path. A document that cannot be read or parsed is skipped with a
//! warning instead of failing the whole request.

use crate::{
    errors::{AppError, Stage},
    models::image::{ImageDocument, ImageRecord, METADATA_PREFIX},
    services::storage_service::BlobStore,
};
use futures::future::join_all;
use std::{sync::Arc, time::Duration};

/// Serves the gallery's list and search queries.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn BlobStore>,
    url_ttl: Duration,
}

impl CatalogService {
    pub fn new(store: Arc<dyn BlobStore>, url_ttl: Duration) -> Self {
        Self { store, url_ttl }
    }

    /// Every stored image with a fresh signed URL, in listing order.
    pub async fn list_all(&self) -> Result<Vec<ImageRecord>, AppError> {
        let documents = self.fetch_documents().await?;
        self.sign_records(documents).await
    }

    /// Images whose tags contain `query` as a case-insensitive substring.
    ///
    /// Only the matching subset gets URLs signed.
    pub async fn search(&self, query: &str) -> Result<Vec<ImageRecord>, AppError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::bad_request("query parameter is required"));
        }
        let needle = query.to_lowercase();

        let documents = self.fetch_documents().await?;
        let matching = documents
            .into_iter()
            .filter(|doc| {
                doc.tags
                    .iter()
                    .any(|tag| tag.to_lowercase().contains(&needle))
            })
            .collect();
        self.sign_records(matching).await
    }

    /// Readiness probe: confirm the metadata prefix is listable.
    pub async fn probe(&self) -> Result<usize, AppError> {
        let keys = self
            .store
            .list(METADATA_PREFIX)
            .await
            .map_err(|err| AppError::upstream(Stage::MetadataList, err))?;
        Ok(keys.len())
    }

    /// Fetch and parse all metadata documents, concurrently and leniently:
    /// a listing failure is an error, a single bad document is not.
    async fn fetch_documents(&self) -> Result<Vec<ImageDocument>, AppError> {
        let keys = self
            .store
            .list(METADATA_PREFIX)
            .await
            .map_err(|err| AppError::upstream(Stage::MetadataList, err))?;

        let fetches = keys.iter().map(|key| {
            let store = self.store.clone();
            async move {
                let parsed = match store.get(key).await {
                    Ok(data) => serde_json::from_slice::<ImageDocument>(&data)
                        .map_err(|err| err.to_string()),
                    Err(err) => Err(err.to_string()),
                };
                (key, parsed)
            }
        });

        let results = join_all(fetches).await;
        let mut documents = Vec::with_capacity(results.len());
        for (key, parsed) in results {
            match parsed {
                Ok(doc) => documents.push(doc),
                Err(reason) => {
                    tracing::warn!("skipping unreadable metadata document `{}`: {}", key, reason);
                }
            }
        }
        Ok(documents)
    }

    /// Sign a GET URL for every document, concurrently.
    async fn sign_records(
        &self,
        documents: Vec<ImageDocument>,
    ) -> Result<Vec<ImageRecord>, AppError> {
        let signs = documents.into_iter().map(|doc| {
            let store = self.store.clone();
            let ttl = self.url_ttl;
            async move {
                let url = store.presign_get(&doc.id, ttl).await;
                (doc, url)
            }
        });

        let mut records = Vec::new();
        for (doc, url) in join_all(signs).await {
            let url = url.map_err(|err| AppError::upstream(Stage::SignUrl, err))?;
            records.push(ImageRecord::from_document(doc, url));
        }
        Ok(records)
    }
}
