//! HTTP error mapping

use crate::engine::{EngineError, Rejection};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    /// Malformed or missing form input.
    BadRequest(String),
    /// The request body ran past the configured upload limit.
    PayloadTooLarge,
    /// Face gate refused the image (no face, pose, quality, multiple faces).
    Rejected(String),
    /// The face is already enrolled.
    Conflict(String),
    /// Models missing or the engine thread is gone.
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge => (StatusCode::PAYLOAD_TOO_LARGE, "File too large".to_string()),
            AppError::Rejected(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => {
                tracing::warn!("service unavailable: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, msg)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::Unavailable(err.to_string())
    }
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        let message = rejection.to_string();
        match rejection {
            Rejection::Unavailable => AppError::Unavailable(message),
            Rejection::Duplicate => AppError::Conflict(message),
            Rejection::Internal(_) => AppError::Internal(message),
            Rejection::Quality { score, .. } => {
                tracing::debug!(score, "quality below registration floor");
                AppError::Rejected(message)
            }
            Rejection::NoFace | Rejection::MultipleFaces | Rejection::Pose(_) => {
                AppError::Rejected(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_status_codes() {
        let status = |r: Rejection| AppError::from(r).into_response().status();
        assert_eq!(status(Rejection::NoFace), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status(Rejection::Duplicate), StatusCode::CONFLICT);
        assert_eq!(status(Rejection::Unavailable), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status(Rejection::Quality { score: 0.2, feedback: "Blurry image".into() }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status(Rejection::Internal("disk full".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_payload_too_large_status() {
        let response = AppError::PayloadTooLarge.into_response();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_engine_gone_is_unavailable() {
        let response = AppError::from(EngineError::ChannelClosed).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
