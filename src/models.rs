use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One (window, feature) drift decision. Field order matches the persisted
/// column order `start,end,feature,score,threshold,is_drifted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRecord {
    #[serde(rename = "start")]
    pub window_start: DateTime<Utc>,
    #[serde(rename = "end")]
    pub window_end: DateTime<Utc>,
    pub feature: String,
    pub score: f64,
    pub threshold: f64,
    #[serde(alias = "drift")]
    pub is_drifted: bool,
}

impl DriftRecord {
    pub fn new(
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        feature: impl Into<String>,
        score: f64,
        threshold: f64,
    ) -> Self {
        Self {
            window_start,
            window_end,
            feature: feature.into(),
            score,
            threshold,
            is_drifted: score > threshold,
        }
    }

    /// Closed-interval intersection with `[start, end]`.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.window_start <= end && start <= self.window_end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.overlaps(instant, instant)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumBin {
    pub wavelength: f64,
    pub timestamp: DateTime<Utc>,
    pub flux: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedSpectrumBin {
    pub bin: SpectrumBin,
    pub contaminated: bool,
    pub drift_score: f64,
    pub corrected_flux: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorSummary {
    pub windows: usize,
    pub records: usize,
    pub drifted: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorrectionSummary {
    pub bins: usize,
    pub contaminated: usize,
    pub unmatched: usize,
}

#[derive(Debug, Clone)]
pub struct FeatureSummary {
    pub feature: String,
    pub windows: usize,
    pub drifted: usize,
    pub max_score: f64,
    pub mean_score: f64,
}
