use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::models::ModelsConfigError;

#[derive(Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) error: String,
}

/// Errors of the operational endpoints. Proxy routes answer with
/// `ProxyError` in the caller's SDK envelope instead.
#[derive(thiserror::Error, Debug)]
pub(crate) enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::Internal(err) => {
                tracing::error!(err = %err, "api internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

pub(crate) fn map_models_error(e: ModelsConfigError) -> ApiError {
    match e {
        ModelsConfigError::Read { .. } => ApiError::Internal(anyhow::Error::new(e)),
        ModelsConfigError::Parse { .. } | ModelsConfigError::InvalidBaseUrl { .. } => {
            ApiError::BadRequest(e.to_string())
        }
    }
}
