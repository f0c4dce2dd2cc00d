use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Caller-facing entitlement refusals. All of them surface as 401 with their
/// message intact.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("{0}")]
    Auth(String),
    #[error("{0}")]
    Credits(String),
    #[error("Your workspace has reached its monthly spending limit of ${0}.")]
    MonthlyLimit(i64),
    #[error("Model {0} not supported")]
    Model(String),
}

impl Rejection {
    pub fn missing_api_key() -> Self {
        Rejection::Auth("Missing API key.".to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Rejection::Auth(_) => "AuthError",
            Rejection::Credits(_) => "CreditsError",
            Rejection::MonthlyLimit(_) => "MonthlyLimitError",
            Rejection::Model(_) => "ModelError",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("{0}")]
    ReadBody(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    Upstream(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::Rejected(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ProxyError::Rejected(r) => r.kind(),
            _ => "error",
        }
    }

    pub fn into_response(self, envelope: ErrorEnvelope) -> Response {
        let status = self.status();
        let message = self.to_string();
        match &self {
            ProxyError::Rejected(r) => {
                tracing::debug!(kind = r.kind(), message = %message, "request rejected");
            }
            ProxyError::Storage(e) => {
                tracing::error!(err = ?e, "proxy storage error");
            }
            other => {
                tracing::warn!(err = %other, "proxy request failed");
            }
        }
        let body = match envelope {
            ErrorEnvelope::OpenAi => json!({ "error": { "message": message } }),
            ErrorEnvelope::Anthropic => json!({
                "type": "error",
                "error": { "type": self.kind(), "message": message },
            }),
        };
        (status, Json(body)).into_response()
    }
}

/// Error body shape expected by the SDK talking to a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorEnvelope {
    /// `{"error":{"message":...}}`
    OpenAi,
    /// `{"type":"error","error":{"type":...,"message":...}}`
    Anthropic,
}
