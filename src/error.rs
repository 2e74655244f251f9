//! Error types shared by the upload, merge and streaming paths.
//!
//! Every failure is scoped to the request that triggered it. `MediaError`
//! maps onto an HTTP status through actix-web's `ResponseError`, so handlers
//! can simply propagate with `?`.

use actix_web::http::header;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

use crate::catalog::ArtifactDescriptor;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid upload session: {0}")]
    InvalidSession(String),

    #[error("invalid chunk index: {0}")]
    InvalidIndex(String),

    #[error("no chunk data was uploaded")]
    PayloadMissing,

    #[error("chunk exceeds the maximum size of {limit} bytes")]
    ChunkTooLarge { limit: u64 },

    #[error("missing required parameters: {0}")]
    MissingParameters(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("missing chunk {0}")]
    ChunkMissing(u64),

    #[error("storage write failed: {0}")]
    WriteFailure(String),

    #[error("catalog write failed: {message}")]
    CatalogWriteFailed {
        message: String,
        descriptor: Box<ArtifactDescriptor>,
    },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("media record not found: {0}")]
    RecordNotFound(i64),

    #[error("malformed range header: {0}")]
    MalformedRange(String),

    #[error("range not satisfiable for artifact of {size} bytes")]
    RangeUnsatisfiable { size: u64 },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type MediaResult<T> = std::result::Result<T, MediaError>;

impl MediaError {
    pub fn write_failure(err: impl std::fmt::Display) -> Self {
        MediaError::WriteFailure(err.to_string())
    }

    pub fn catalog(err: impl std::fmt::Display) -> Self {
        MediaError::Catalog(err.to_string())
    }
}

impl From<rusqlite::Error> for MediaError {
    fn from(err: rusqlite::Error) -> Self {
        MediaError::Catalog(err.to_string())
    }
}

impl From<tokio::task::JoinError> for MediaError {
    fn from(err: tokio::task::JoinError) -> Self {
        MediaError::Internal(format!("blocking task failed: {}", err))
    }
}

impl ResponseError for MediaError {
    fn status_code(&self) -> StatusCode {
        match self {
            MediaError::InvalidSession(_)
            | MediaError::InvalidIndex(_)
            | MediaError::PayloadMissing
            | MediaError::MissingParameters(_)
            | MediaError::InvalidParameter(_)
            | MediaError::ChunkMissing(_)
            | MediaError::MalformedRange(_) => StatusCode::BAD_REQUEST,
            MediaError::ChunkTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            MediaError::ArtifactNotFound(_) | MediaError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            MediaError::RangeUnsatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            MediaError::WriteFailure(_)
            | MediaError::CatalogWriteFailed { .. }
            | MediaError::Catalog(_)
            | MediaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut builder = HttpResponse::build(self.status_code());
        match self {
            MediaError::RangeUnsatisfiable { size } => {
                // 416 carries no body, only the current length of the artifact.
                builder
                    .insert_header((header::CONTENT_RANGE, format!("bytes */{}", size)))
                    .finish()
            }
            MediaError::CatalogWriteFailed { descriptor, .. } => builder.json(json!({
                "success": false,
                "message": self.to_string(),
                "artifact": descriptor,
            })),
            _ => builder.json(json!({
                "success": false,
                "message": self.to_string(),
            })),
        }
    }
}
