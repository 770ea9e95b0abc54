use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DriftError, Result};

/// How the scorer places histogram edges over the reference sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Binning {
    #[default]
    EqualWidth,
    Quantile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub window_size: usize,
    pub step_size: usize,
    /// Monitored features, in the order records are emitted per window.
    pub features: Vec<String>,
    pub threshold: f64,
    /// Per-feature overrides of `threshold`.
    pub thresholds: BTreeMap<String, f64>,
    pub bin_count: usize,
    pub binning: Binning,
    /// Floor applied to empty bin proportions.
    pub epsilon: f64,
    pub correction_factor: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_size: 300,
            step_size: 60,
            features: vec!["flux".to_string(), "flux_err".to_string()],
            threshold: 0.2,
            thresholds: BTreeMap::new(),
            bin_count: 10,
            binning: Binning::EqualWidth,
            epsilon: 1e-4,
            correction_factor: 0.98,
        }
    }
}

impl MonitorConfig {
    pub fn from_json_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: MonitorConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn threshold_for(&self, feature: &str) -> f64 {
        self.thresholds
            .get(feature)
            .copied()
            .unwrap_or(self.threshold)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size < 2 {
            return Err(invalid("window_size must be at least 2"));
        }
        if self.step_size == 0 {
            return Err(invalid("step_size must be positive"));
        }
        if self.features.is_empty() {
            return Err(invalid("at least one feature must be monitored"));
        }
        for (idx, feature) in self.features.iter().enumerate() {
            if self.features[..idx].contains(feature) {
                return Err(invalid(format!("feature `{feature}` listed twice")));
            }
        }
        if self.bin_count == 0 {
            return Err(invalid("bin_count must be positive"));
        }
        if !(self.epsilon > 0.0 && self.epsilon < 1.0) {
            return Err(invalid("epsilon must lie in (0, 1)"));
        }
        let thresholds = std::iter::once(("<global>", self.threshold))
            .chain(self.thresholds.iter().map(|(k, v)| (k.as_str(), *v)));
        for (name, value) in thresholds {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!("threshold for {name} must be finite and >= 0")));
            }
        }
        validate_correction_factor(self.correction_factor)
    }
}

pub fn validate_correction_factor(factor: f64) -> Result<()> {
    if factor > 0.0 && factor <= 1.0 {
        Ok(())
    } else {
        Err(invalid(format!("correction_factor {factor} must lie in (0, 1]")))
    }
}

fn invalid(message: impl Into<String>) -> DriftError {
    DriftError::InvalidConfig(message.into())
}
