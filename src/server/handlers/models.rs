use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::server::AppState;
use crate::server::error::{ApiError, map_models_error};

#[derive(Serialize)]
pub(in crate::server) struct ModelList {
    object: &'static str,
    data: Vec<ModelItem>,
}

#[derive(Serialize)]
struct ModelItem {
    id: String,
    object: &'static str,
    owned_by: &'static str,
}

pub(in crate::server) async fn list_models(State(state): State<AppState>) -> Json<ModelList> {
    let config = state.gateway.models.snapshot();
    let data = config
        .model_ids()
        .map(|id| ModelItem {
            id: id.to_string(),
            object: "model",
            owned_by: "zengate",
        })
        .collect();
    Json(ModelList {
        object: "list",
        data,
    })
}

#[derive(Serialize)]
pub(in crate::server) struct ReloadResponse {
    models: usize,
}

pub(in crate::server) async fn reload_models(
    State(state): State<AppState>,
) -> Result<Json<ReloadResponse>, ApiError> {
    let registry = state.gateway.models.clone();
    let models = tokio::task::spawn_blocking(move || registry.reload())
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("reload task failed: {e}")))?
        .map_err(map_models_error)?;
    Ok(Json(ReloadResponse { models }))
}
