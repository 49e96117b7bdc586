use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Pipeline step that was executing when an upstream call failed.
///
/// Carried inside [`AppError::Upstream`] so a single log line pinpoints the
/// failing dependency call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    LabelDetection,
    ImageWrite,
    MetadataWrite,
    MetadataList,
    SignUrl,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::LabelDetection => "label detection",
            Stage::ImageWrite => "image write",
            Stage::MetadataWrite => "metadata write",
            Stage::MetadataList => "metadata listing",
            Stage::SignUrl => "url signing",
        };
        f.write_str(name)
    }
}

/// Application-level error taxonomy.
///
/// - `BadRequest` — structurally unusable input, rejected before any
///   external call is made.
/// - `MalformedImage` — the payload decoded as base64 but not as an image;
///   still the client's fault, never a server fault.
/// - `Upstream` — a label-detector or object-store call failed partway
///   through a pipeline.
/// - `NotFound` — the requested resource does not exist.
/// - `Internal` — process-local fault (blocking-task join and the like).
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("could not decode image: {0}")]
    MalformedImage(String),

    #[error("{stage} failed: {message}")]
    Upstream { stage: Stage, message: String },

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Client error detected before any external call.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Upload that could not be decoded as an image.
    pub fn malformed_image(err: impl fmt::Display) -> Self {
        Self::MalformedImage(err.to_string())
    }

    /// External dependency failure, labelled with the pipeline stage.
    pub fn upstream(stage: Stage, err: impl fmt::Display) -> Self {
        Self::Upstream {
            stage,
            message: err.to_string(),
        }
    }

    /// Shortcut for 404 Not Found.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Shortcut for a 500 Internal Server Error.
    pub fn internal(err: impl fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::MalformedImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// JSON body for every error response. `detail` is omitted when there is no
/// diagnostic beyond the summary.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        } else {
            tracing::debug!("request rejected: {}", self);
        }

        let body = match &self {
            AppError::MalformedImage(detail) => ErrorBody {
                error: "could not decode image".into(),
                detail: Some(detail.clone()),
            },
            AppError::Upstream { stage, message } => ErrorBody {
                error: format!("{stage} failed"),
                detail: Some(message.clone()),
            },
            AppError::Internal(detail) => ErrorBody {
                error: "internal error".into(),
                detail: Some(detail.clone()),
            },
            other => ErrorBody {
                error: other.to_string(),
                detail: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_the_taxonomy() {
        assert_eq!(AppError::bad_request("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::malformed_image("x").status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::upstream(Stage::ImageWrite, "boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(AppError::not_found("route").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::internal("join").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn upstream_message_names_the_stage() {
        let err = AppError::upstream(Stage::LabelDetection, "connection refused");
        assert_eq!(
            err.to_string(),
            "label detection failed: connection refused"
        );
    }
}
