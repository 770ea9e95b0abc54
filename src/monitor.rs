use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::error::{DriftError, Result};
use crate::log::DriftLog;
use crate::models::{DriftRecord, MonitorSummary};
use crate::scorer::PsiScorer;
use crate::series::Series;

/// Baseline segment captured once per session and never mutated.
#[derive(Debug, Clone)]
pub struct ReferenceWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    values: BTreeMap<String, Vec<f64>>,
}

impl ReferenceWindow {
    /// Captures the first `window_size` samples of each feature.
    pub fn capture(series: &Series, window_size: usize, features: &[String]) -> Result<Self> {
        Self::from_range(series, 0, window_size, features)
    }

    pub fn from_range(
        series: &Series,
        offset: usize,
        len: usize,
        features: &[String],
    ) -> Result<Self> {
        let end = offset + len;
        if len == 0 || end > series.len() {
            return Err(DriftError::InsufficientData {
                feature: features.join(","),
                len: series.len().saturating_sub(offset).min(len),
            });
        }
        let mut values = BTreeMap::new();
        for feature in features {
            values.insert(feature.clone(), series.feature(feature)?[offset..end].to_vec());
        }
        let timestamps = series.timestamps();
        Ok(Self {
            start: timestamps[offset],
            end: timestamps[end - 1],
            values,
        })
    }

    pub fn values(&self, feature: &str) -> Result<&[f64]> {
        self.values
            .get(feature)
            .map(Vec::as_slice)
            .ok_or_else(|| DriftError::UnknownFeature(feature.to_string()))
    }
}

pub struct RollingDriftMonitor {
    config: MonitorConfig,
}

impl RollingDriftMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Lazily walks the series, yielding one batch of records per cursor
    /// position in configured feature order. Cursors run from `window_size`
    /// up to, but excluding, `len - window_size`; a series of at most two
    /// windows yields nothing.
    pub fn windows<'a>(&'a self, series: &'a Series) -> Result<DriftWalk<'a>> {
        let window_size = self.config.window_size;
        if series.len() <= 2 * window_size {
            debug!(
                samples = series.len(),
                window_size, "series too short for a comparison window; nothing to monitor"
            );
            return Ok(DriftWalk {
                series,
                lanes: Vec::new(),
                cursor: series.len(),
                window_size,
                step_size: self.config.step_size,
            });
        }

        let reference = ReferenceWindow::capture(series, window_size, &self.config.features)?;
        debug!(
            reference_start = %reference.start,
            reference_end = %reference.end,
            "reference window captured"
        );
        let lanes = self
            .fit_lanes(&reference)?
            .into_iter()
            .map(|(scorer, threshold)| {
                let values = series.feature(scorer.feature())?;
                Ok(Lane {
                    scorer,
                    threshold,
                    values,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(DriftWalk {
            series,
            lanes,
            cursor: window_size,
            window_size,
            step_size: self.config.step_size,
        })
    }

    /// Appends each cursor's batch to `log` before advancing. A failed
    /// append stops the walk; batches already appended stay in the log.
    pub fn run(&self, series: &Series, log: &mut dyn DriftLog) -> Result<MonitorSummary> {
        let mut summary = MonitorSummary::default();
        for batch in self.windows(series)? {
            let batch = batch?;
            summary.windows += 1;
            summary.records += batch.len();
            summary.drifted += batch.iter().filter(|r| r.is_drifted).count();
            log.append(&batch)?;
        }
        info!(
            windows = summary.windows,
            records = summary.records,
            drifted = summary.drifted,
            "rolling drift walk complete"
        );
        Ok(summary)
    }

    /// One-shot comparison of an explicit reference sample against a
    /// comparison sample; the record spans the comparison's time range.
    pub fn check(&self, reference: &Series, comparison: &Series) -> Result<Vec<DriftRecord>> {
        if comparison.len() < 2 {
            return Err(DriftError::InsufficientData {
                feature: self.config.features.join(","),
                len: comparison.len(),
            });
        }
        let window =
            ReferenceWindow::from_range(reference, 0, reference.len(), &self.config.features)?;
        let timestamps = comparison.timestamps();
        let (start, end) = (timestamps[0], timestamps[timestamps.len() - 1]);
        self
            .fit_lanes(&window)?
            .into_iter()
            .map(|(scorer, threshold)| {
                let score = scorer.score(comparison.feature(scorer.feature())?)?;
                Ok(DriftRecord::new(start, end, scorer.feature(), score, threshold))
            })
            .collect()
    }

    fn fit_lanes(&self, reference: &ReferenceWindow) -> Result<Vec<(PsiScorer, f64)>> {
        self.config
            .features
            .iter()
            .map(|feature| {
                let scorer = PsiScorer::fit(
                    feature.as_str(),
                    reference.values(feature)?,
                    self.config.bin_count,
                    self.config.binning,
                    self.config.epsilon,
                )?;
                debug!(feature = %feature, bins = scorer.bin_count(), "scorer fitted");
                Ok((scorer, self.config.threshold_for(feature)))
            })
            .collect()
    }
}

struct Lane<'a> {
    scorer: PsiScorer,
    threshold: f64,
    values: &'a [f64],
}

pub struct DriftWalk<'a> {
    series: &'a Series,
    lanes: Vec<Lane<'a>>,
    cursor: usize,
    window_size: usize,
    step_size: usize,
}

impl Iterator for DriftWalk<'_> {
    type Item = Result<Vec<DriftRecord>>;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.cursor + self.window_size;
        if self.lanes.is_empty() || end >= self.series.len() {
            return None;
        }
        let range = self.cursor..end;
        let timestamps = self.series.timestamps();
        let (start_ts, end_ts) = (timestamps[range.start], timestamps[end - 1]);
        self.cursor += self.step_size;

        let mut batch = Vec::with_capacity(self.lanes.len());
        for lane in &self.lanes {
            let shift = match lane.scorer.evaluate(&lane.values[range.clone()], lane.threshold) {
                Ok(shift) => shift,
                Err(err) => return Some(Err(err)),
            };
            let record = DriftRecord::new(
                start_ts,
                end_ts,
                lane.scorer.feature(),
                shift.score,
                lane.threshold,
            );
            if shift.is_drifted {
                info!(
                    feature = %record.feature,
                    score = record.score,
                    window_start = %record.window_start,
                    "drift detected"
                );
            }
            batch.push(record);
        }
        debug!(cursor = range.start, records = batch.len(), "window scored");
        Some(Ok(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryDriftLog;
    use chrono::{Duration, TimeZone};

    fn noise(i: usize) -> f64 {
        ((i * 7919) % 1000) as f64 / 1000.0 - 0.5
    }

    fn shifted_series(len: usize, shift_at: usize, shift: f64) -> Series {
        let base = Utc.with_ymd_and_hms(2009, 5, 2, 0, 0, 0).unwrap();
        let timestamps = (0..len).map(|i| base + Duration::minutes(i as i64)).collect();
        let flux = (0..len)
            .map(|i| 1.0 + noise(i) + if i >= shift_at { shift } else { 0.0 })
            .collect();
        let flux_err = (0..len).map(|i| 0.01 + noise(i + 17) * 0.001).collect();
        Series::new(
            timestamps,
            BTreeMap::from([
                ("flux".to_string(), flux),
                ("flux_err".to_string(), flux_err),
            ]),
        )
        .unwrap()
    }

    fn config(window_size: usize, step_size: usize) -> MonitorConfig {
        MonitorConfig {
            window_size,
            step_size,
            ..MonitorConfig::default()
        }
    }

    #[test]
    fn short_series_yields_empty_log() {
        let monitor = RollingDriftMonitor::new(config(300, 60)).unwrap();
        let mut log = MemoryDriftLog::default();
        let summary = monitor.run(&shifted_series(599, 1000, 0.0), &mut log).unwrap();
        assert_eq!(summary, MonitorSummary::default());
        assert!(log.records().is_empty());
    }

    #[test]
    fn short_series_skips_feature_lookup() {
        let mut cfg = config(300, 60);
        cfg.features = vec!["missing".to_string()];
        let monitor = RollingDriftMonitor::new(cfg).unwrap();
        assert_eq!(monitor.windows(&shifted_series(10, 1000, 0.0)).unwrap().count(), 0);
    }

    #[test]
    fn exactly_two_windows_yields_empty_log() {
        let monitor = RollingDriftMonitor::new(config(300, 60)).unwrap();
        let mut log = MemoryDriftLog::default();
        let summary = monitor.run(&shifted_series(600, 1000, 0.0), &mut log).unwrap();
        assert_eq!(summary.windows, 0);
        assert!(log.records().is_empty());
    }

    #[test]
    fn walk_stops_before_last_full_window() {
        let monitor = RollingDriftMonitor::new(config(300, 60)).unwrap();
        for (len, expected) in [(601, 1), (660, 1), (661, 2), (1020, 7)] {
            let series = shifted_series(len, 10_000, 0.0);
            assert_eq!(monitor.windows(&series).unwrap().count(), expected, "len {len}");
        }
    }

    #[test]
    fn records_grouped_per_window_in_feature_order() {
        let mut cfg = config(100, 50);
        cfg.features = vec!["flux_err".to_string(), "flux".to_string()];
        let monitor = RollingDriftMonitor::new(cfg).unwrap();
        let series = shifted_series(400, 1000, 0.0);
        let batches: Vec<_> = monitor
            .windows(&series)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        // cursors 100, 150, 200, 250; 300 is len - window_size and excluded
        assert_eq!(batches.len(), 4);
        for batch in &batches {
            assert_eq!(batch[0].feature, "flux_err");
            assert_eq!(batch[1].feature, "flux");
            assert_eq!(batch[0].window_start, batch[1].window_start);
            assert!(batch[0].window_start < batch[0].window_end);
        }
        let ts = series.timestamps();
        assert_eq!(batches[0][0].window_start, ts[100]);
        assert_eq!(batches[0][0].window_end, ts[199]);
        assert_eq!(batches[3][0].window_start, ts[250]);
        assert_eq!(batches[3][0].window_end, ts[349]);
    }

    #[test]
    fn disjoint_windows_when_step_equals_window() {
        let monitor = RollingDriftMonitor::new(config(100, 100)).unwrap();
        let series = shifted_series(450, 1000, 0.0);
        let mut log = MemoryDriftLog::default();
        let summary = monitor.run(&series, &mut log).unwrap();
        assert_eq!(summary.windows, 3);
        let records = log.records();
        assert!(records[0].window_end < records[2].window_start);
    }

    #[test]
    fn mean_shift_is_detected_near_shift_point() {
        let monitor = RollingDriftMonitor::new(config(300, 60)).unwrap();
        let series = shifted_series(1000, 600, 5.0 * 0.2887);
        let mut log = MemoryDriftLog::default();
        monitor.run(&series, &mut log).unwrap();
        let shift_ts = series.timestamps()[600];
        assert!(log.records().iter().any(|r| r.feature == "flux"
            && r.is_drifted
            && (r.window_start - shift_ts).num_minutes().abs() <= 60));
        let first = &log.records()[0];
        assert_eq!(first.feature, "flux");
        assert!(!first.is_drifted);
    }

    #[test]
    fn check_compares_explicit_samples() {
        let monitor = RollingDriftMonitor::new(config(10, 10)).unwrap();
        let reference = shifted_series(300, 1000, 0.0);
        let drifted = shifted_series(300, 0, 3.0);
        let records = monitor.check(&reference, &drifted).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_drifted);
        assert!(!records[1].is_drifted);
        let identical = monitor.check(&reference, &reference).unwrap();
        assert!(identical.iter().all(|r| r.score == 0.0));
    }

    #[test]
    fn unknown_feature_propagates() {
        let mut cfg = config(100, 50);
        cfg.features = vec!["flux".to_string(), "centroid".to_string()];
        let monitor = RollingDriftMonitor::new(cfg).unwrap();
        let mut log = MemoryDriftLog::default();
        let err = monitor
            .run(&shifted_series(400, 1000, 0.0), &mut log)
            .unwrap_err();
        assert!(matches!(err, DriftError::UnknownFeature(name) if name == "centroid"));
    }

    /// Accepts `ok_batches` appends, then fails every later one.
    struct FailingLog {
        inner: MemoryDriftLog,
        ok_batches: usize,
    }

    impl DriftLog for FailingLog {
        fn append(&mut self, records: &[DriftRecord]) -> Result<()> {
            if self.ok_batches == 0 {
                return Err(DriftError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.ok_batches -= 1;
            self.inner.append(records)
        }

        fn load(&self) -> Result<Vec<DriftRecord>> {
            self.inner.load()
        }
    }

    #[test]
    fn append_failure_aborts_walk_and_keeps_earlier_batches() {
        let monitor = RollingDriftMonitor::new(config(100, 50)).unwrap();
        let mut log = FailingLog {
            inner: MemoryDriftLog::default(),
            ok_batches: 2,
        };
        let err = monitor
            .run(&shifted_series(400, 1000, 0.0), &mut log)
            .unwrap_err();
        assert!(matches!(err, DriftError::Io(_)));
        let kept = log.load().unwrap();
        assert_eq!(kept.len(), 4);
        assert_eq!(kept[0].window_start, kept[1].window_start);
        assert!(kept[1].window_start < kept[2].window_start);
    }

    #[test]
    fn csv_append_to_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let monitor = RollingDriftMonitor::new(config(100, 50)).unwrap();
        let mut log = crate::log::CsvDriftLog::open(dir.path());
        let err = monitor
            .run(&shifted_series(400, 1000, 0.0), &mut log)
            .unwrap_err();
        assert!(matches!(err, DriftError::Io(_)));
    }
}
