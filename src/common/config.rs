use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tolerance used when checking that a probability row sums to one.
pub const DEFAULT_ROW_TOLERANCE: f64 = 1e-3;

/// Tuning knobs shared by every algorithm in the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Allowed deviation from 1.0 for CPT rows, transition rows and distributions.
    pub tolerance: f64,
    pub stationary: StationaryConfig,
    pub baum_welch: BaumWelchConfig,
    pub first_passage: FirstPassageConfig,
    /// Seed for simulation; a fresh entropy-seeded generator is used when absent.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StationaryConfig {
    /// Stop once the largest per-entry change drops below this value.
    pub tolerance: f64,
    pub max_iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaumWelchConfig {
    /// Stop once the log-likelihood improves by less than this value.
    pub tolerance: f64,
    pub max_iterations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirstPassageConfig {
    pub max_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tolerance: DEFAULT_ROW_TOLERANCE,
            stationary: StationaryConfig::default(),
            baum_welch: BaumWelchConfig::default(),
            first_passage: FirstPassageConfig::default(),
            seed: None,
        }
    }
}

impl Default for StationaryConfig {
    fn default() -> Self {
        StationaryConfig {
            tolerance: 1e-10,
            max_iterations: 10_000,
        }
    }
}

impl Default for BaumWelchConfig {
    fn default() -> Self {
        BaumWelchConfig {
            tolerance: 1e-6,
            max_iterations: 100,
        }
    }
}

impl Default for FirstPassageConfig {
    fn default() -> Self {
        FirstPassageConfig { max_steps: 1_000 }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse engine configuration")
    }

    /// Load a configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_json_str(&contents)
    }
}
