//! Configuration for staged models.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment.

use crate::error::ModelError;
use crate::loss::LossFunction;
use crate::optimizer::OptimizerKind;
use crate::schedule::LearningRateStage;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the per-batch loss enters the running epoch average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossPrecision {
    /// Weight the full loss value by batch size.
    #[default]
    Full,
    /// Truncate each batch loss to its integer part before weighting.
    Truncated,
}

impl LossPrecision {
    pub fn apply(&self, loss: f64) -> f64 {
        match self {
            Self::Full => loss,
            Self::Truncated => loss.trunc(),
        }
    }
}

/// Settings shared by every model variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Ordered learning-rate stages.
    #[serde(default = "default_stages")]
    pub stages: Vec<LearningRateStage>,
    /// Update rule used by the training loop.
    #[serde(default)]
    pub optimizer: OptimizerKind,
    /// Loss minimized during training.
    #[serde(default)]
    pub loss: LossFunction,
    /// Error reported per target during evaluation.
    #[serde(default)]
    pub error: LossFunction,
    /// Flatten batch inputs to `(rows, width)` before the forward pass.
    #[serde(default = "default_true")]
    pub flatten_input: bool,
    /// Flatten batch targets to `(rows, width)` before the loss.
    #[serde(default = "default_true")]
    pub flatten_target: bool,
    #[serde(default)]
    pub loss_precision: LossPrecision,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            optimizer: OptimizerKind::default(),
            loss: LossFunction::default(),
            error: LossFunction::default(),
            flatten_input: true,
            flatten_target: true,
            loss_precision: LossPrecision::default(),
        }
    }
}

impl ModelConfig {
    /// Config with the given stages and defaults elsewhere.
    pub fn with_stages(stages: impl IntoIterator<Item = (f64, usize)>) -> Self {
        Self {
            stages: stages.into_iter().map(LearningRateStage::from).collect(),
            ..Self::default()
        }
    }
}

fn default_stages() -> Vec<LearningRateStage> {
    [
        (0.1, 300),
        (0.01, 300),
        (0.001, 300),
        (0.05, 300),
        (0.005, 300),
        (0.1, 300),
        (0.01, 300),
        (0.001, 300),
    ]
    .into_iter()
    .map(LearningRateStage::from)
    .collect()
}

fn default_true() -> bool {
    true
}

/// Load a model configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with `STAGEWISE_`, `__` for nesting)
/// 2. The TOML file at `path`, when given and present
/// 3. Built-in defaults
pub fn load_config<T>(path: Option<&Path>) -> Result<T, ModelError>
where
    T: Default + Serialize + for<'de> Deserialize<'de>,
{
    let mut figment = Figment::from(Serialized::defaults(T::default()));

    if let Some(path) = path {
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        }
    }

    figment = figment.merge(Env::prefixed("STAGEWISE_").split("__"));

    figment
        .extract()
        .map_err(|e| ModelError::config(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.stages.len(), 8);
        assert_eq!(config.stages[0], LearningRateStage::new(0.1, 300));
        assert_eq!(config.optimizer, OptimizerKind::Adam);
        assert!(config.flatten_input && config.flatten_target);
        assert_eq!(config.loss_precision, LossPrecision::Full);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.toml");
        std::fs::write(
            &path,
            r#"
optimizer = "sgd"
loss_precision = "truncated"

[[stages]]
rate = 0.5
epochs = 3
"#,
        )
        .unwrap();

        let config: ModelConfig = load_config(Some(&path)).unwrap();
        assert_eq!(config.optimizer, OptimizerKind::Sgd);
        assert_eq!(config.loss_precision, LossPrecision::Truncated);
        assert_eq!(config.stages, vec![LearningRateStage::new(0.5, 3)]);
        assert_eq!(config.loss, LossFunction::Mse);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config: ModelConfig =
            load_config(Some(Path::new("/nonexistent/stagewise.toml"))).unwrap();
        assert_eq!(config, ModelConfig::default());
    }

    #[test]
    fn test_truncation_policy() {
        assert_eq!(LossPrecision::Full.apply(1.75), 1.75);
        assert_eq!(LossPrecision::Truncated.apply(1.75), 1.0);
        assert_eq!(LossPrecision::Truncated.apply(0.4), 0.0);
    }
}
