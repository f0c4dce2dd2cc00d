use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::response::Response;

use crate::proxy::{self, ErrorEnvelope};
use crate::server::AppState;

/// Chat Completions and Responses routes.
pub(in crate::server) async fn proxy_openai(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Response {
    proxy::forward(&state.gateway, req)
        .await
        .unwrap_or_else(|e| e.into_response(ErrorEnvelope::OpenAi))
}

/// Anthropic Messages routes.
pub(in crate::server) async fn proxy_anthropic(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Response {
    proxy::forward(&state.gateway, req)
        .await
        .unwrap_or_else(|e| e.into_response(ErrorEnvelope::Anthropic))
}
