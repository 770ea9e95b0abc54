use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::{DriftError, Result};

/// Julian date of the Kepler BKJD zero point.
const KEPLER_EPOCH_JD: f64 = 2_454_833.0;
/// Julian date of 1970-01-01T00:00:00Z.
const UNIX_EPOCH_JD: f64 = 2_440_587.5;

const TIME_COLUMNS: [&str; 3] = ["datetime", "timestamp", "time"];

/// Time-ordered measurements with named numeric feature columns.
#[derive(Debug, Clone)]
pub struct Series {
    timestamps: Vec<DateTime<Utc>>,
    features: BTreeMap<String, Vec<f64>>,
}

impl Series {
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        features: BTreeMap<String, Vec<f64>>,
    ) -> Result<Self> {
        if features.is_empty() {
            return Err(DriftError::InvalidConfig(
                "series needs at least one feature column".to_string(),
            ));
        }
        if let Some(index) = timestamps
            .windows(2)
            .position(|pair| pair[0] >= pair[1])
        {
            return Err(DriftError::NonMonotonicTimestamps { index: index + 1 });
        }
        for (name, values) in &features {
            if values.len() != timestamps.len() {
                return Err(DriftError::InvalidConfig(format!(
                    "feature `{name}` has {} values for {} timestamps",
                    values.len(),
                    timestamps.len()
                )));
            }
            if let Some(row) = values.iter().position(|v| !v.is_finite()) {
                return Err(DriftError::NonFiniteValue {
                    column: name.clone(),
                    row,
                });
            }
        }
        Ok(Self {
            timestamps,
            features,
        })
    }

    /// Reads a cleaned series from CSV. The time column may hold RFC 3339
    /// timestamps or Kepler BKJD day offsets; every other column is a feature.
    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let time_idx = TIME_COLUMNS
            .iter()
            .find_map(|name| headers.iter().position(|h| h == *name))
            .ok_or_else(|| {
                DriftError::Parse(format!("{} has no time column", path.display()))
            })?;

        let columns: Vec<(usize, String)> = headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !TIME_COLUMNS.contains(h))
            .map(|(idx, h)| (idx, h.to_string()))
            .collect();

        let mut timestamps = Vec::new();
        let mut features: BTreeMap<String, Vec<f64>> = columns
            .iter()
            .map(|(_, name)| (name.clone(), Vec::new()))
            .collect();

        for (row, record) in reader.records().enumerate() {
            let record = record?;
            timestamps.push(parse_timestamp(&record[time_idx])?);
            for (idx, name) in &columns {
                let cell = record[*idx].trim();
                let value = cell.parse::<f64>().map_err(|_| {
                    DriftError::Parse(format!("row {row}, column `{name}`: `{cell}` is not numeric"))
                })?;
                if let Some(values) = features.get_mut(name) {
                    values.push(value);
                }
            }
        }

        Self::new(timestamps, features)
    }

    /// Adds `time_diff`: seconds since the previous sample, zero for the first.
    pub fn with_time_diff(mut self) -> Self {
        let mut diffs = Vec::with_capacity(self.timestamps.len());
        let mut previous = None;
        for ts in &self.timestamps {
            let diff = previous
                .map(|prev: DateTime<Utc>| (*ts - prev).num_milliseconds() as f64 / 1000.0)
                .unwrap_or(0.0);
            diffs.push(diff);
            previous = Some(*ts);
        }
        self.features.insert("time_diff".to_string(), diffs);
        self
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn feature(&self, name: &str) -> Result<&[f64]> {
        self.features
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| DriftError::UnknownFeature(name.to_string()))
    }

    pub fn feature_names(&self) -> impl Iterator<Item = &str> {
        self.features.keys().map(String::as_str)
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]` (taken as UTC), or a BKJD float.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(days) = raw.parse::<f64>() {
        return from_bkjd(days);
    }
    Err(DriftError::Parse(format!("unrecognized timestamp `{raw}`")))
}

/// Converts Kepler barycentric days (BJD - 2454833) to UTC.
pub fn from_bkjd(days: f64) -> Result<DateTime<Utc>> {
    let unix_seconds = (days + KEPLER_EPOCH_JD - UNIX_EPOCH_JD) * 86_400.0;
    if !unix_seconds.is_finite() {
        return Err(DriftError::Parse(format!("BKJD value {days} out of range")));
    }
    DateTime::from_timestamp_micros((unix_seconds * 1e6).round() as i64)
        .ok_or_else(|| DriftError::Parse(format!("BKJD value {days} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::io::Write;

    fn t(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2009, 5, 2, 0, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn rejects_duplicate_timestamps() {
        let features = BTreeMap::from([("flux".to_string(), vec![1.0, 2.0, 3.0])]);
        let err = Series::new(vec![t(0), t(1), t(1)], features).unwrap_err();
        assert!(matches!(err, DriftError::NonMonotonicTimestamps { index: 2 }));
    }

    #[test]
    fn rejects_non_finite_values() {
        let features = BTreeMap::from([("flux".to_string(), vec![1.0, f64::NAN])]);
        let err = Series::new(vec![t(0), t(1)], features).unwrap_err();
        assert!(matches!(err, DriftError::NonFiniteValue { row: 1, .. }));
    }

    #[test]
    fn unknown_feature_is_an_error() {
        let features = BTreeMap::from([("flux".to_string(), vec![1.0])]);
        let series = Series::new(vec![t(0)], features).unwrap();
        assert!(matches!(
            series.feature("flux_err"),
            Err(DriftError::UnknownFeature(_))
        ));
    }

    #[test]
    fn bkjd_zero_is_kepler_epoch() {
        let ts = from_bkjd(0.0).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2009, 1, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn parses_supported_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2009, 5, 2, 6, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2009-05-02T06:30:00Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2009-05-02 06:30:00").unwrap(), expected);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn time_diff_starts_at_zero() {
        let features = BTreeMap::from([("flux".to_string(), vec![1.0, 1.0, 1.0])]);
        let series = Series::new(vec![t(0), t(1), t(3)], features)
            .unwrap()
            .with_time_diff();
        assert_eq!(series.feature("time_diff").unwrap(), &[0.0, 60.0, 120.0]);
    }

    #[test]
    fn reads_kepler_csv() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "time,flux,flux_err").unwrap();
        writeln!(file, "131.5,1.0002,0.0001").unwrap();
        writeln!(file, "131.52,0.9998,0.0001").unwrap();
        let series = Series::from_csv_path(file.path()).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series.feature("flux").unwrap(), &[1.0002, 0.9998]);
        assert_eq!(
            series.feature_names().collect::<Vec<_>>(),
            vec!["flux", "flux_err"]
        );
    }
}
