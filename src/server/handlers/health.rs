use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::server::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    listen_addr: String,
    models: usize,
}

pub(in crate::server) async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        listen_addr: state.listen_addr.to_string(),
        models: state.gateway.models.snapshot().models.len(),
    })
}
