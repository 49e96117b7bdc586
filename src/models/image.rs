//! Represents a stored image and its tag metadata.

use serde::{Deserialize, Serialize};

/// Object-key prefix under which normalized image blobs live.
pub const IMAGES_PREFIX: &str = "images/";

/// Object-key prefix under which metadata documents live.
pub const METADATA_PREFIX: &str = "metadata/";

/// Durable metadata document persisted next to every image blob.
///
/// Serialized as JSON and stored at [`metadata_key`]`(id)`. The field names
/// are part of the stored format and must stay stable; unknown fields in
/// older or foreign documents are ignored on read.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ImageDocument {
    /// Object key of the image blob. Doubles as the record id.
    pub id: String,

    /// Filename supplied by the uploader, stored verbatim.
    pub original_name: String,

    /// Labels returned by the detector, in detector order, duplicates kept.
    pub tags: Vec<String>,
}

/// A catalog entry returned to API clients: the stored document plus a
/// short-lived signed URL for the image bytes.
///
/// The URL is resolved per request and never persisted.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    /// Object key of the image blob.
    pub id: String,

    /// Filename supplied by the uploader.
    pub original_name: String,

    /// Labels attached at ingestion time.
    pub tags: Vec<String>,

    /// Signed GET URL for the image, valid for the configured TTL.
    pub image_url: String,
}

impl ImageRecord {
    /// Combine a stored document with a freshly signed URL.
    pub fn from_document(doc: ImageDocument, image_url: String) -> Self {
        Self {
            id: doc.id,
            original_name: doc.original_name,
            tags: doc.tags,
            image_url,
        }
    }
}

/// Object key of the metadata document paired with an image key.
///
/// `images/123-a.jpg` pairs with `metadata/images/123-a.jpg.json`.
pub fn metadata_key(image_key: &str) -> String {
    format!("{METADATA_PREFIX}{image_key}.json")
}

/// Longest accepted base name, in bytes. Common filesystem limit, and
/// leaves ample room for the key prefix and timestamp under the store's
/// own key cap.
const MAX_BASE_NAME_LEN: usize = 255;

/// Final path segment of a client-supplied filename.
///
/// Browsers send bare names, but nothing stops a client from sending
/// `a/b.jpg` or `..\evil.jpg`, and only the last segment may participate in
/// an object key. Names the store would refuse in a key (`..`, control
/// characters, oversized) are rejected here too and surface as client
/// errors instead of storage faults. Returns `None` when nothing usable
/// remains.
pub fn base_name(filename: &str) -> Option<&str> {
    let name = filename.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name.contains("..") {
        return None;
    }
    if name.len() > MAX_BASE_NAME_LEN || name.chars().any(char::is_control) {
        return None;
    }
    Some(name)
}
