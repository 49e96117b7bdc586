//! src/services/vision_service.rs
//!
//! Label detection behind the [`LabelDetector`] trait. The production
//! backend talks to the Google Vision `images:annotate` REST endpoint;
//! tests substitute canned detectors.

use crate::config::AppConfig;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("vision api returned status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("vision api rejected the image: {0}")]
    Rejected(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Produces descriptive labels for an image.
///
/// Implementations must preserve the backend's label order and must not
/// deduplicate: the tags stored with an image are exactly what the
/// detector returned.
#[async_trait]
pub trait LabelDetector: Send + Sync {
    async fn detect_labels(&self, image: &[u8]) -> Result<Vec<String>, DetectorError>;
}

/// Google Vision REST backend.
///
/// Sends one `LABEL_DETECTION` request per image with the key in the
/// `x-goog-api-key` header, so the key never appears in URLs or logs.
pub struct GoogleVisionDetector {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_labels: u32,
}

impl GoogleVisionDetector {
    /// Build the HTTP client with the configured per-request timeout.
    pub fn new(cfg: &AppConfig) -> Result<Self, DetectorError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()?;
        Ok(Self {
            http,
            endpoint: cfg.vision_endpoint.trim_end_matches('/').to_string(),
            api_key: cfg.vision_api_key.clone(),
            max_labels: cfg.max_labels,
        })
    }

    fn annotate_url(&self) -> String {
        format!("{}/v1/images:annotate", self.endpoint)
    }
}

#[async_trait]
impl LabelDetector for GoogleVisionDetector {
    async fn detect_labels(&self, image: &[u8]) -> Result<Vec<String>, DetectorError> {
        let body = AnnotateRequest::label_detection(image, self.max_labels);
        let response = self
            .http
            .post(self.annotate_url())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DetectorError::Api {
                status: status.as_u16(),
                message: truncate(message, 512),
            });
        }

        let parsed: AnnotateResponse = response.json().await?;
        let first = parsed
            .responses
            .into_iter()
            .next()
            .ok_or_else(|| DetectorError::Rejected("empty response list".into()))?;
        labels_from(first)
    }
}

/// Extract the label list from a single per-image response.
fn labels_from(response: AnnotateImageResponse) -> Result<Vec<String>, DetectorError> {
    if let Some(error) = response.error {
        return Err(DetectorError::Rejected(error.render()));
    }
    Ok(response
        .label_annotations
        .unwrap_or_default()
        .into_iter()
        .map(|label| label.description)
        .collect())
}

/// Clip upstream error text so a huge HTML error page cannot flood logs.
fn truncate(mut text: String, limit: usize) -> String {
    if let Some((idx, _)) = text.char_indices().nth(limit) {
        text.truncate(idx);
    }
    text
}

// --- `images:annotate` wire format ---

#[derive(Serialize)]
struct AnnotateRequest {
    requests: Vec<AnnotateImageRequest>,
}

impl AnnotateRequest {
    fn label_detection(image: &[u8], max_results: u32) -> Self {
        Self {
            requests: vec![AnnotateImageRequest {
                image: ImageContent {
                    content: general_purpose::STANDARD.encode(image),
                },
                features: vec![Feature {
                    kind: "LABEL_DETECTION",
                    max_results,
                }],
            }],
        }
    }
}

#[derive(Serialize)]
struct AnnotateImageRequest {
    image: ImageContent,
    features: Vec<Feature>,
}

#[derive(Serialize)]
struct ImageContent {
    content: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
    max_results: u32,
}

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    label_annotations: Option<Vec<LabelAnnotation>>,
    error: Option<ApiStatus>,
}

#[derive(Deserialize)]
struct LabelAnnotation {
    description: String,
}

/// `google.rpc.Status` as embedded in per-image responses.
#[derive(Deserialize)]
struct ApiStatus {
    code: Option<i32>,
    message: Option<String>,
}

impl ApiStatus {
    fn render(&self) -> String {
        format!(
            "code {}: {}",
            self.code.unwrap_or_default(),
            self.message.as_deref().unwrap_or("unknown error")
        )
    }
}

#[cfg(test)]
pub mod fixtures {
    use super::*;

    /// Detector returning a fixed label list, for pipeline tests.
    pub struct StaticDetector(pub Vec<String>);

    impl StaticDetector {
        pub fn with_labels(labels: &[&str]) -> Self {
            Self(labels.iter().map(|label| label.to_string()).collect())
        }
    }

    #[async_trait]
    impl LabelDetector for StaticDetector {
        async fn detect_labels(&self, _image: &[u8]) -> Result<Vec<String>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    /// Detector whose calls always fail.
    pub struct FailingDetector;

    #[async_trait]
    impl LabelDetector for FailingDetector {
        async fn detect_labels(&self, _image: &[u8]) -> Result<Vec<String>, DetectorError> {
            Err(DetectorError::Rejected("detector offline".into()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_matches_the_annotate_wire_format() {
        let body = AnnotateRequest::label_detection(b"png-bytes", 10);
        let json = serde_json::to_value(&body).expect("serialize");
        let request = &json["requests"][0];
        assert_eq!(request["features"][0]["type"], "LABEL_DETECTION");
        assert_eq!(request["features"][0]["maxResults"], 10);
        assert_eq!(
            request["image"]["content"],
            general_purpose::STANDARD.encode(b"png-bytes").as_str()
        );
    }

    #[test]
    fn labels_parse_in_order_with_duplicates_kept() {
        let raw = r#"{"responses":[{"labelAnnotations":[
            {"mid":"/m/0b3yr","description":"Beach","score":0.98},
            {"mid":"/m/06npx","description":"Sea","score":0.91},
            {"mid":"/m/0b3yr","description":"Beach","score":0.70}
        ]}]}"#;
        let parsed: AnnotateResponse = serde_json::from_str(raw).expect("parse");
        let first = parsed.responses.into_iter().next().expect("one response");
        let labels = labels_from(first).expect("labels");
        assert_eq!(labels, ["Beach", "Sea", "Beach"]);
    }

    #[test]
    fn missing_annotations_mean_no_labels() {
        let raw = r#"{"responses":[{}]}"#;
        let parsed: AnnotateResponse = serde_json::from_str(raw).expect("parse");
        let first = parsed.responses.into_iter().next().expect("one response");
        let labels = labels_from(first).expect("labels");
        assert!(labels.is_empty());
    }

    #[test]
    fn per_image_errors_are_surfaced() {
        let raw = r#"{"responses":[{"error":{"code":3,"message":"Bad image data"}}]}"#;
        let parsed: AnnotateResponse = serde_json::from_str(raw).expect("parse");
        let first = parsed.responses.into_iter().next().expect("one response");
        let err = labels_from(first).unwrap_err();
        assert!(err.to_string().contains("Bad image data"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abcdef".into(), 3), "abc");
        assert_eq!(truncate("日本語テスト".into(), 2), "日本");
        assert_eq!(truncate("short".into(), 512), "short");
    }
}
