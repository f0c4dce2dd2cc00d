//! Model and provider table.
//!
//! The table lives in a JSON file and is held in a [`ModelRegistry`], which
//! hands out immutable snapshots. A reload swaps the whole table atomically;
//! requests already in flight keep the snapshot they started with.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cost::CostTable;
use crate::usage::UsageFormat;

mod selection;

pub use selection::{select_provider, validate_model};

#[derive(thiserror::Error, Debug)]
pub enum ModelsConfigError {
    #[error("failed to read model config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid model config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("model {model}: provider {provider} has an invalid base url: {reason}")]
    InvalidBaseUrl {
        model: String,
        provider: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default)]
    pub models: BTreeMap<String, ModelEntry>,
}

/// A model id as configured: the standard definition plus an optional
/// variant served to workspaces that opted into data sharing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    #[serde(flatten)]
    pub standard: ModelDefinition,
    #[serde(default)]
    pub data_share: Option<ModelDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Filled from the map key when loading.
    #[serde(default)]
    pub id: String,
    pub cost: CostTable,
    /// Applied to the whole request once its prompt-side volume crosses
    /// [`crate::cost::HIGH_VOLUME_THRESHOLD`].
    #[serde(default)]
    pub cost_200k: Option<CostTable>,
    pub providers: Vec<ProviderOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOption {
    pub id: String,
    pub api: String,
    #[serde(default)]
    pub api_key: String,
    /// Model string sent upstream in place of the requested id.
    pub model: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub allow_anonymous: bool,
    /// Upstream header name -> inbound header name whose value is copied.
    #[serde(default)]
    pub header_mappings: HashMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub format: Option<UsageFormat>,
}

fn default_weight() -> u32 {
    1
}

impl ProviderOption {
    pub fn usage_format(&self) -> UsageFormat {
        self.format
            .unwrap_or_else(|| UsageFormat::for_provider_id(&self.id))
    }
}

impl ModelsConfig {
    pub fn from_json_str(raw: &str, path: &Path) -> Result<Self, ModelsConfigError> {
        let mut cfg: ModelsConfig =
            serde_json::from_str(raw).map_err(|source| ModelsConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        for (id, entry) in cfg.models.iter_mut() {
            for def in std::iter::once(&mut entry.standard).chain(entry.data_share.as_mut()) {
                def.id = id.clone();
                // Reasoning is billed at the output rate unless priced on its own.
                for table in std::iter::once(&mut def.cost).chain(def.cost_200k.as_mut()) {
                    table.reasoning = table.reasoning.or(table.output);
                }
                for p in &def.providers {
                    reqwest::Url::parse(&p.api).map_err(|e| ModelsConfigError::InvalidBaseUrl {
                        model: id.clone(),
                        provider: p.id.clone(),
                        reason: e.to_string(),
                    })?;
                }
            }
        }
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ModelsConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ModelsConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw, path)
    }

    pub fn model_ids(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

pub struct ModelRegistry {
    path: Option<PathBuf>,
    current: ArcSwap<ModelsConfig>,
}

impl ModelRegistry {
    /// A registry backed by a file; [`ModelRegistry::reload`] re-reads it.
    pub fn from_file(path: PathBuf) -> Result<Self, ModelsConfigError> {
        let cfg = ModelsConfig::load(&path)?;
        Ok(Self {
            path: Some(path),
            current: ArcSwap::from_pointee(cfg),
        })
    }

    /// A fixed in-memory table; reloading keeps it as is.
    pub fn from_config(cfg: ModelsConfig) -> Self {
        Self {
            path: None,
            current: ArcSwap::from_pointee(cfg),
        }
    }

    pub fn snapshot(&self) -> Arc<ModelsConfig> {
        self.current.load_full()
    }

    /// Returns the number of models in the table now in effect. A config that
    /// fails to load leaves the previous table in place.
    pub fn reload(&self) -> Result<usize, ModelsConfigError> {
        let Some(path) = self.path.as_deref() else {
            return Ok(self.current.load().models.len());
        };
        let cfg = ModelsConfig::load(path)?;
        let count = cfg.models.len();
        self.current.store(Arc::new(cfg));
        tracing::info!(path = %path.display(), models = count, "model config reloaded");
        Ok(count)
    }

    /// Swaps in a table directly.
    pub fn replace(&self, cfg: ModelsConfig) {
        self.current.store(Arc::new(cfg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
      "models": {
        "big-pickle": {
          "cost": { "input": 0.000001, "output": 0.000002 },
          "providers": [
            { "id": "openai", "api": "https://api.openai.com/v1", "api_key": "k", "model": "gpt-x" }
          ],
          "data_share": {
            "cost": { "input": 0.0000005 },
            "providers": [
              { "id": "fireworks", "api": "https://api.fireworks.ai/inference/v1", "model": "fw-x", "weight": 3 }
            ]
          }
        }
      }
    }"#;

    #[test]
    fn loads_defaults_and_fills_ids() {
        let cfg = ModelsConfig::from_json_str(SAMPLE, Path::new("models.json")).unwrap();
        let entry = &cfg.models["big-pickle"];
        assert_eq!(entry.standard.id, "big-pickle");
        let p = &entry.standard.providers[0];
        assert_eq!(p.weight, 1);
        assert!(!p.allow_anonymous);
        assert!(!p.disabled);
        assert_eq!(p.usage_format(), UsageFormat::OpenAi);

        let ds = entry.data_share.as_ref().unwrap();
        assert_eq!(ds.id, "big-pickle");
        assert_eq!(ds.providers[0].weight, 3);
        assert_eq!(ds.providers[0].usage_format(), UsageFormat::OpenAi);
    }

    #[test]
    fn rejects_bad_base_url() {
        let raw = r#"{"models":{"m":{"cost":{},"providers":[{"id":"x","api":"not a url","model":"m"}]}}}"#;
        let err = ModelsConfig::from_json_str(raw, Path::new("models.json")).unwrap_err();
        assert!(matches!(err, ModelsConfigError::InvalidBaseUrl { .. }));
    }

    #[test]
    fn replace_swaps_snapshot_but_old_one_survives() {
        let reg = ModelRegistry::from_config(ModelsConfig::default());
        let before = reg.snapshot();
        reg.replace(ModelsConfig::from_json_str(SAMPLE, Path::new("models.json")).unwrap());
        assert!(before.models.is_empty());
        assert_eq!(reg.snapshot().model_ids().collect::<Vec<_>>(), vec!["big-pickle"]);
        assert_eq!(reg.reload().unwrap(), 1);
    }
}
