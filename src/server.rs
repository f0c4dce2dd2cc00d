use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tower_http::trace::TraceLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse};

use crate::models::ModelRegistry;
use crate::proxy::{Gateway, ReloadPolicy};

mod error;
mod handlers;
mod state;
mod tasks;

pub use state::AppState;

/// Everything `serve` needs besides the socket.
pub struct ServeConfig {
    pub db_path: PathBuf,
    pub models: Arc<ModelRegistry>,
    pub reload: ReloadPolicy,
    /// Period of the background model config reload; `None` disables it.
    pub models_reload_interval: Option<Duration>,
    /// Bearer token for the admin routes; `None` disables them.
    pub admin_token: Option<String>,
}

fn build_app(state: AppState) -> Router {
    let api = Router::new()
        .route("/v1/chat/completions", post(handlers::proxy_openai))
        .route("/v1/responses", post(handlers::proxy_openai))
        .route("/v1/messages", post(handlers::proxy_anthropic))
        .route("/v1/models", get(handlers::list_models));

    let admin = Router::new()
        .route("/api/models/reload", post(handlers::reload_models))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::require_admin_token,
        ));

    Router::new()
        .route("/api/health", get(handlers::health))
        .merge(admin)
        .merge(api.clone())
        .nest("/zen", api)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(tracing::Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(tracing::Level::DEBUG))
                .on_failure(DefaultOnFailure::new().level(tracing::Level::WARN)),
        )
}

pub async fn serve_with_listener(
    listener: tokio::net::TcpListener,
    config: ServeConfig,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let client = reqwest::Client::builder().build()?;
    let state = AppState {
        listen_addr: addr,
        gateway: Gateway {
            client,
            db_path: config.db_path,
            models: config.models.clone(),
            reload: config.reload,
        },
        admin_token: config
            .admin_token
            .filter(|t| !t.trim().is_empty())
            .map(|t| Arc::from(t.trim())),
    };

    tracing::info!(
        addr = %addr,
        models = config.models.snapshot().models.len(),
        "gateway starting"
    );

    if let Some(interval) = config.models_reload_interval {
        tokio::spawn(tasks::models_reload_loop(config.models, interval));
    }

    let app = build_app(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub async fn serve(addr: SocketAddr, config: ServeConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_with_listener(listener, config).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(err = %e, "listen for ctrl-c failed");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
