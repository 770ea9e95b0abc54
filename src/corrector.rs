use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::validate_correction_factor;
use crate::error::{DriftError, Result};
use crate::models::{CorrectedSpectrumBin, CorrectionSummary, DriftRecord, SpectrumBin};
use crate::series::parse_timestamp;

/// Flags spectrum bins that coincide with drifted windows and attenuates
/// their flux by a constant factor.
///
/// Join policy: a bin matches every record whose closed
/// `[window_start, window_end]` contains the bin timestamp. The bin is
/// contaminated if any matched record drifted, for any feature, and its
/// `drift_score` is the largest matched score. Unmatched bins are clean with
/// score 0. The multiplicative correction is an empirical approximation of
/// contamination-induced excess flux, not a deconvolution.
#[derive(Debug, Clone, Copy)]
pub struct SpectrumCorrector {
    correction_factor: f64,
}

impl SpectrumCorrector {
    pub fn new(correction_factor: f64) -> Result<Self> {
        validate_correction_factor(correction_factor)?;
        Ok(Self { correction_factor })
    }

    pub fn correct_records(
        &self,
        records: &[DriftRecord],
        spectrum: &[SpectrumBin],
    ) -> (Vec<CorrectedSpectrumBin>, CorrectionSummary) {
        let mut summary = CorrectionSummary {
            bins: spectrum.len(),
            ..CorrectionSummary::default()
        };
        let corrected = spectrum
            .iter()
            .map(|bin| {
                let mut matched = false;
                let mut contaminated = false;
                let mut drift_score = 0.0f64;
                for record in records.iter().filter(|r| r.contains(bin.timestamp)) {
                    matched = true;
                    contaminated |= record.is_drifted;
                    drift_score = drift_score.max(record.score);
                }
                if !matched {
                    summary.unmatched += 1;
                }
                if contaminated {
                    summary.contaminated += 1;
                }
                CorrectedSpectrumBin {
                    bin: bin.clone(),
                    contaminated,
                    drift_score,
                    corrected_flux: if contaminated {
                        bin.flux * self.correction_factor
                    } else {
                        bin.flux
                    },
                }
            })
            .collect();
        info!(
            bins = summary.bins,
            contaminated = summary.contaminated,
            unmatched = summary.unmatched,
            "spectrum correction applied"
        );
        (corrected, summary)
    }
}

#[derive(Deserialize)]
struct SpectrumRow {
    wavelength: f64,
    #[serde(alias = "datetime")]
    timestamp: String,
    flux: f64,
}

#[derive(Serialize)]
struct CorrectedRow<'a> {
    wavelength: f64,
    timestamp: &'a str,
    flux: f64,
    contaminated: bool,
    drift_score: f64,
    corrected_flux: f64,
}

pub fn read_spectrum_csv(path: &Path) -> Result<Vec<SpectrumBin>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut bins = Vec::new();
    for (idx, row) in reader.deserialize::<SpectrumRow>().enumerate() {
        let row = row?;
        if !row.flux.is_finite() || !row.wavelength.is_finite() {
            return Err(DriftError::NonFiniteValue {
                column: "flux/wavelength".to_string(),
                row: idx,
            });
        }
        bins.push(SpectrumBin {
            wavelength: row.wavelength,
            timestamp: parse_timestamp(&row.timestamp)?,
            flux: row.flux,
        });
    }
    Ok(bins)
}

pub fn write_corrected_csv(path: &Path, bins: &[CorrectedSpectrumBin]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for corrected in bins {
        let timestamp = corrected.bin.timestamp.to_rfc3339();
        writer.serialize(CorrectedRow {
            wavelength: corrected.bin.wavelength,
            timestamp: &timestamp,
            flux: corrected.bin.flux,
            contaminated: corrected.contaminated,
            drift_score: corrected.drift_score,
            corrected_flux: corrected.corrected_flux,
        })?;
    }
    writer.flush()?;
    Ok(())
}
