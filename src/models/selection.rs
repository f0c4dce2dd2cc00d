use rand::Rng;

use super::{ModelDefinition, ModelsConfig, ProviderOption};
use crate::auth::Caller;
use crate::proxy::Rejection;

/// Resolves a requested model id. Workspaces that share data get the
/// data-share variant when the model has one.
pub fn validate_model<'a>(
    config: &'a ModelsConfig,
    model_id: &str,
    caller: &Caller,
) -> Result<&'a ModelDefinition, Rejection> {
    let Some(entry) = config.models.get(model_id) else {
        return Err(Rejection::Model(model_id.to_string()));
    };
    if caller.data_share()
        && let Some(ds) = entry.data_share.as_ref()
    {
        return Ok(ds);
    }
    Ok(&entry.standard)
}

/// Weighted random draw among the providers this caller may use.
///
/// Disabled providers never qualify. Anonymous callers only see providers
/// that allow anonymous traffic; if none do, the missing key is fatal.
pub fn select_provider<'a, R: Rng + ?Sized>(
    model: &'a ModelDefinition,
    caller: &Caller,
    rng: &mut R,
) -> Result<&'a ProviderOption, Rejection> {
    let candidates: Vec<&ProviderOption> = model
        .providers
        .iter()
        .filter(|p| !p.disabled)
        .filter(|p| !caller.is_anonymous() || p.allow_anonymous)
        .filter(|p| p.weight > 0)
        .collect();

    if candidates.is_empty() {
        return Err(if caller.is_anonymous() {
            Rejection::missing_api_key()
        } else {
            Rejection::Model(model.id.clone())
        });
    }

    let total: u64 = candidates.iter().map(|p| u64::from(p.weight)).sum();
    let mut ticket = rng.random_range(0..total);
    for &p in &candidates {
        let weight = u64::from(p.weight);
        if ticket < weight {
            return Ok(p);
        }
        ticket -= weight;
    }
    Ok(candidates[candidates.len() - 1])
}
