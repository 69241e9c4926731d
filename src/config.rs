// Tunables for a Source and for the trial runner.

use crate::error::ConfigError;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Configuration shared read-only by every Source of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Added to the lower bound of a size range that has no upper bound.
    pub default_max_size: usize,

    /// Consecutive duplicates a unique collection tolerates per slot.
    pub unique_attempts: usize,

    /// Resamples a real float draw makes before repairing a non-finite value.
    pub real_float_attempts: usize,

    /// Expected number of elements beyond the minimum in a repeated draw.
    pub average_extra_elements: f64,

    /// Bytes per segment when the seeded provider extends a buffer.
    pub entropy_block_size: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            default_max_size: 64,
            unique_attempts: 32,
            real_float_attempts: 16,
            average_extra_elements: 4.0,
            entropy_block_size: 1024,
        }
    }
}

impl SourceConfig {
    pub fn from_json_str(json: &str) -> Result<SourceConfig, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<SourceConfig, ConfigError> {
        let contents = fs::read_to_string(path)?;
        SourceConfig::from_json_str(&contents)
    }
}

/// Configuration for `TrialRunner`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[serde(default, deny_unknown_fields)]
pub struct RunnerConfig {
    /// Seed every trial's entropy stream is derived from.
    pub seed: u64,

    pub source: SourceConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            source: SourceConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn with_seed(seed: u64) -> RunnerConfig {
        RunnerConfig {
            seed,
            ..RunnerConfig::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<RunnerConfig, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }
}
