use crate::config::Binning;
use crate::error::{DriftError, Result};

/// Population Stability Index scorer for one feature.
///
/// Bin edges and reference proportions are fixed at construction, so scores
/// from different comparison windows share the same histogram and stay
/// comparable across the whole walk.
#[derive(Debug, Clone)]
pub struct PsiScorer {
    feature: String,
    /// Interior bin boundaries; `cuts.len() + 1` bins. Outer bins are open.
    cuts: Vec<f64>,
    reference: Vec<f64>,
    epsilon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftScore {
    pub score: f64,
    pub is_drifted: bool,
}

impl PsiScorer {
    pub fn fit(
        feature: impl Into<String>,
        reference: &[f64],
        bin_count: usize,
        binning: Binning,
        epsilon: f64,
    ) -> Result<Self> {
        let feature = feature.into();
        if reference.is_empty() {
            return Err(DriftError::InsufficientData { feature, len: 0 });
        }

        let mut sorted = reference.to_vec();
        sorted.sort_by(f64::total_cmp);
        let min = sorted[0];
        let max = sorted[sorted.len() - 1];

        // Fewer than two distinct values collapse to a single bin.
        let cuts = if min == max || bin_count < 2 {
            Vec::new()
        } else {
            match binning {
                Binning::EqualWidth => {
                    let width = (max - min) / bin_count as f64;
                    (1..bin_count).map(|i| min + width * i as f64).collect()
                }
                Binning::Quantile => {
                    let mut cuts: Vec<f64> = (1..bin_count)
                        .map(|i| quantile(&sorted, i as f64 / bin_count as f64))
                        .filter(|cut| *cut > min)
                        .collect();
                    cuts.dedup();
                    cuts
                }
            }
        };

        let reference = proportions(&cuts, reference);
        Ok(Self {
            feature,
            cuts,
            reference,
            epsilon,
        })
    }

    pub fn feature(&self) -> &str {
        &self.feature
    }

    pub fn bin_count(&self) -> usize {
        self.cuts.len() + 1
    }

    /// PSI of `comparison` against the fitted reference: sum of
    /// `(p - q) * ln(p / q)` with zero proportions floored at epsilon.
    pub fn score(&self, comparison: &[f64]) -> Result<f64> {
        if comparison.is_empty() {
            return Err(DriftError::InsufficientData {
                feature: self.feature.clone(),
                len: 0,
            });
        }
        let current = proportions(&self.cuts, comparison);
        let score = self
            .reference
            .iter()
            .zip(&current)
            .map(|(&p, &q)| {
                let p = self.floor(p);
                let q = self.floor(q);
                (p - q) * (p / q).ln()
            })
            .sum::<f64>();
        Ok(score.max(0.0))
    }

    pub fn evaluate(&self, comparison: &[f64], threshold: f64) -> Result<ShiftScore> {
        let score = self.score(comparison)?;
        Ok(ShiftScore {
            score,
            is_drifted: score > threshold,
        })
    }

    fn floor(&self, proportion: f64) -> f64 {
        if proportion == 0.0 {
            self.epsilon
        } else {
            proportion
        }
    }
}

fn bin_index(cuts: &[f64], value: f64) -> usize {
    cuts.partition_point(|cut| *cut <= value)
}

fn proportions(cuts: &[f64], values: &[f64]) -> Vec<f64> {
    let mut counts = vec![0usize; cuts.len() + 1];
    for &value in values {
        counts[bin_index(cuts, value)] += 1;
    }
    let total = values.len() as f64;
    counts.into_iter().map(|c| c as f64 / total).collect()
}

/// Linear-interpolated quantile of an ascending slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize, offset: f64) -> Vec<f64> {
        (0..n).map(|i| i as f64 / n as f64 + offset).collect()
    }

    fn fit(reference: &[f64]) -> PsiScorer {
        PsiScorer::fit("flux", reference, 10, Binning::EqualWidth, 1e-4).unwrap()
    }

    #[test]
    fn identical_samples_score_zero() {
        let sample = ramp(200, 0.0);
        for binning in [Binning::EqualWidth, Binning::Quantile] {
            let scorer = PsiScorer::fit("flux", &sample, 10, binning, 1e-4).unwrap();
            let result = scorer.evaluate(&sample, 0.0).unwrap();
            assert_eq!(result.score, 0.0);
            assert!(!result.is_drifted);
        }
    }

    #[test]
    fn score_is_asymmetric() {
        let a = ramp(100, 0.0);
        let b: Vec<f64> = ramp(100, 0.0).iter().map(|v| v * v * 2.0).collect();
        let ab = fit(&a).score(&b).unwrap();
        let ba = fit(&b).score(&a).unwrap();
        assert!(ab > 0.0 && ba > 0.0);
        assert!((ab - ba).abs() > 1e-9);
    }

    #[test]
    fn shifted_sample_is_drifted() {
        let scorer = fit(&ramp(300, 0.0));
        let result = scorer.evaluate(&ramp(300, 5.0), 0.2).unwrap();
        assert!(result.is_drifted);
        assert!(result.score.is_finite());
    }

    #[test]
    fn tiny_comparison_sample_is_scored() {
        let scorer = fit(&ramp(300, 0.0));
        let score = scorer.score(&[0.5, 0.51]).unwrap();
        assert!(score.is_finite() && score > 0.0);
    }

    #[test]
    fn empty_comparison_is_insufficient() {
        let scorer = fit(&ramp(300, 0.0));
        assert!(matches!(
            scorer.score(&[]),
            Err(DriftError::InsufficientData { len: 0, .. })
        ));
    }

    #[test]
    fn constant_reference_uses_single_bin() {
        let scorer = fit(&[3.0; 50]);
        assert_eq!(scorer.bin_count(), 1);
        assert_eq!(scorer.score(&[1.0, 9.0, 3.0]).unwrap(), 0.0);
    }

    #[test]
    fn edges_are_reused_across_windows() {
        let scorer = fit(&ramp(100, 0.0));
        let first = scorer.score(&ramp(100, 0.3)).unwrap();
        let second = scorer.score(&ramp(100, 0.3)).unwrap();
        assert_eq!(first, second);
        assert_eq!(scorer.bin_count(), 10);
    }

    #[test]
    fn quantile_cuts_collapse_ties() {
        let mut reference = vec![0.0; 80];
        reference.extend(ramp(20, 1.0));
        let scorer = PsiScorer::fit("flux", &reference, 10, Binning::Quantile, 1e-4).unwrap();
        assert!(scorer.bin_count() < 10);
        assert_eq!(scorer.score(&reference).unwrap(), 0.0);
    }
}
