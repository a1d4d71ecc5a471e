use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failure kinds surfaced by the analysis engine.
///
/// The first three are "not ready" conditions rather than faults: the caller
/// asked about data that does not exist yet. The rest abort an analysis.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No default resume")]
    NoDefaultResume,

    #[error("Job not found")]
    JobNotFound,

    #[error("Resume {0} not found")]
    ResumeMissing(Uuid),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Extraction still running for identical content")]
    ExtractionPending,

    #[error("Invalid override: {0}")]
    InvalidOverride(String),

    #[error("Vector index unavailable: {0}")]
    VectorIndexUnavailable(String),

    #[error("Persistence failed: {0}")]
    PersistenceFailed(String),
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::PersistenceFailed(e.to_string())
    }
}

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Engine(e) => return engine_error_response(e),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        error_body(status, code, message)
    }
}

fn engine_error_response(e: &EngineError) -> Response {
    let (status, code) = match e {
        EngineError::NoDefaultResume => (StatusCode::NOT_FOUND, "NO_DEFAULT_RESUME"),
        EngineError::JobNotFound => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
        EngineError::ResumeMissing(_) => (StatusCode::NOT_FOUND, "RESUME_MISSING"),
        EngineError::ExtractionPending => (StatusCode::ACCEPTED, "EXTRACTION_PENDING"),
        EngineError::InvalidOverride(_) => (StatusCode::BAD_REQUEST, "INVALID_OVERRIDE"),
        EngineError::ExtractionFailed(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "EXTRACTION_FAILED")
        }
        EngineError::VectorIndexUnavailable(_) => {
            (StatusCode::SERVICE_UNAVAILABLE, "VECTOR_INDEX_UNAVAILABLE")
        }
        EngineError::PersistenceFailed(err) => {
            tracing::error!("Persistence error: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_FAILED")
        }
    };

    error_body(status, code, e.to_string())
}

fn error_body(status: StatusCode, code: &str, message: String) -> Response {
    let body = Json(json!({
        "error": {
            "code": code,
            "message": message
        }
    }));

    (status, body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_ready_kinds_map_to_404() {
        for e in [EngineError::NoDefaultResume, EngineError::JobNotFound] {
            let resp = AppError::Engine(e).into_response();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
    }

    #[test]
    fn test_pending_maps_to_202() {
        let resp = AppError::Engine(EngineError::ExtractionPending).into_response();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
    }

    #[test]
    fn test_invalid_override_is_bad_request() {
        let resp =
            AppError::Engine(EngineError::InvalidOverride("crag.min_hits".into())).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_messages_preserved_verbatim() {
        let e = EngineError::ExtractionFailed("schema mismatch after 3 attempts".into());
        assert_eq!(
            e.to_string(),
            "Extraction failed: schema mismatch after 3 attempts"
        );
    }
}
