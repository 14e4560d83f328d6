//! CLI configuration: the model config plus predictor and storage settings.

use serde::{Deserialize, Serialize};
use stagewise_core::ModelConfig;
use stagewise_core::predictors::{LinearSpec, MlpSpec};
use std::path::{Path, PathBuf};

/// Config file read and written when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "stagewise.toml";

/// Which reference predictor to train.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictorConfig {
    Linear(LinearSpec),
    Mlp(MlpSpec),
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self::Linear(LinearSpec::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Rows per batch when splitting a dataset.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Where checkpoints are written (platform data dir if not set).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_dir: Option<PathBuf>,
    /// Oldest checkpoints beyond this count are pruned.
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
    #[serde(default)]
    pub predictor: PredictorConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            checkpoint_dir: None,
            max_checkpoints: default_max_checkpoints(),
            predictor: PredictorConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl CliConfig {
    /// Configured checkpoint directory, falling back to the platform data dir.
    pub fn checkpoint_dir(&self) -> PathBuf {
        if let Some(dir) = &self.checkpoint_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "stagewise", "stagewise")
            .map(|d| d.data_dir().join("checkpoints"))
            .unwrap_or_else(|| PathBuf::from(".stagewise").join("checkpoints"))
    }
}

/// The config file every subcommand uses: `explicit`, or [`DEFAULT_CONFIG_FILE`] in `dir`.
pub fn config_file(explicit: Option<&Path>, dir: &Path) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dir.join(DEFAULT_CONFIG_FILE))
}

/// Load defaults, then `path`, then `STAGEWISE_*` environment overrides.
///
/// An absent default file is not worth a warning; an absent explicit one is.
pub fn load(path: &Path, explicit: bool) -> anyhow::Result<CliConfig> {
    let source = (explicit || path.exists()).then_some(path);
    stagewise_core::load_config(source)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

fn default_batch_size() -> usize {
    32
}

fn default_max_checkpoints() -> usize {
    10
}
