use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};

use crate::models::ModelRegistry;

/// Re-reads the model table every `interval`. A bad file is logged and the
/// previous table stays in effect.
pub(crate) async fn models_reload_loop(registry: Arc<ModelRegistry>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the table was loaded at startup.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let registry = registry.clone();
        match tokio::task::spawn_blocking(move || registry.reload()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(err = %e, "periodic model config reload failed"),
            Err(e) => tracing::warn!(err = %e, "model config reload task failed"),
        }
    }
}
