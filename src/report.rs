use std::collections::BTreeMap;
use std::fmt::Write;

use crate::models::{CorrectionSummary, DriftRecord, FeatureSummary};

pub fn summarize_by_feature(records: &[DriftRecord]) -> Vec<FeatureSummary> {
    let mut map: BTreeMap<&str, (usize, usize, f64, f64)> = BTreeMap::new();

    for record in records {
        let entry = map
            .entry(record.feature.as_str())
            .or_insert((0, 0, 0.0, 0.0));
        entry.0 += 1;
        if record.is_drifted {
            entry.1 += 1;
        }
        entry.2 = entry.2.max(record.score);
        entry.3 += record.score;
    }

    let mut summaries: Vec<FeatureSummary> = map
        .into_iter()
        .map(|(feature, (windows, drifted, max_score, total))| FeatureSummary {
            feature: feature.to_string(),
            windows,
            drifted,
            max_score,
            mean_score: if windows == 0 {
                0.0
            } else {
                total / windows as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.drifted.cmp(&a.drifted));
    summaries
}

pub fn build_report(
    source: &str,
    records: &[DriftRecord],
    correction: Option<&CorrectionSummary>,
) -> String {
    let summaries = summarize_by_feature(records);

    let mut output = String::new();

    let _ = writeln!(output, "# Drift Report");
    let _ = writeln!(output, "Generated from {} ({} records)", source, records.len());
    let _ = writeln!(output);
    let _ = writeln!(output, "## Features");

    if summaries.is_empty() {
        let _ = writeln!(output, "No drift records in this log.");
    } else {
        for summary in &summaries {
            let _ = writeln!(
                output,
                "- {}: {}/{} windows drifted (max PSI {:.3}, mean PSI {:.3})",
                summary.feature,
                summary.drifted,
                summary.windows,
                summary.max_score,
                summary.mean_score
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Latest Drifted Windows");

    let drifted: Vec<&DriftRecord> = records.iter().filter(|r| r.is_drifted).collect();
    if drifted.is_empty() {
        let _ = writeln!(output, "No drift detected.");
    } else {
        for record in drifted.iter().rev().take(5) {
            let _ = writeln!(
                output,
                "- {} from {} to {}: PSI {:.3} > {:.3}",
                record.feature,
                record.window_start,
                record.window_end,
                record.score,
                record.threshold
            );
        }
    }

    if let Some(correction) = correction {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Spectrum Correction");
        let _ = writeln!(
            output,
            "- {} bins, {} contaminated, {} outside every drift window",
            correction.bins, correction.contaminated, correction.unmatched
        );
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn record(offset: i64, feature: &str, score: f64) -> DriftRecord {
        let start = Utc.with_ymd_and_hms(2009, 5, 2, 0, 0, 0).unwrap() + Duration::hours(offset);
        DriftRecord::new(start, start + Duration::hours(5), feature, score, 0.2)
    }

    #[test]
    fn summaries_count_drifted_windows() {
        let records = vec![
            record(0, "flux", 0.1),
            record(1, "flux", 0.5),
            record(0, "flux_err", 0.05),
            record(1, "flux", 0.9),
        ];
        let summaries = summarize_by_feature(&records);
        assert_eq!(summaries[0].feature, "flux");
        assert_eq!(summaries[0].windows, 3);
        assert_eq!(summaries[0].drifted, 2);
        assert_eq!(summaries[0].max_score, 0.9);
        assert!((summaries[0].mean_score - 0.5).abs() < 1e-12);
        assert_eq!(summaries[1].drifted, 0);
    }

    #[test]
    fn report_lists_sections() {
        let records = vec![record(0, "flux", 0.1), record(2, "flux", 0.7)];
        let correction = CorrectionSummary {
            bins: 10,
            contaminated: 3,
            unmatched: 2,
        };
        let report = build_report("drift_log.csv", &records, Some(&correction));
        assert!(report.contains("- flux: 1/2 windows drifted"));
        assert!(report.contains("PSI 0.700 > 0.200"));
        assert!(report.contains("10 bins, 3 contaminated, 2 outside"));
    }

    #[test]
    fn empty_log_report() {
        let report = build_report("memory", &[], None);
        assert!(report.contains("No drift records in this log."));
        assert!(report.contains("No drift detected."));
        assert!(!report.contains("Spectrum Correction"));
    }
}
