use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::server::AppState;
use crate::server::error::ApiError;

/// Guards the admin routes with the configured bearer token.
pub(in crate::server) async fn require_admin_token(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::Forbidden(
            "admin endpoints are disabled; set an admin token".to_string(),
        ));
    };
    let presented = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| ApiError::Unauthorized("missing admin token".to_string()))?;
    if presented != expected {
        return Err(ApiError::Unauthorized("invalid admin token".to_string()));
    }
    Ok(next.run(req).await)
}
