use thiserror::Error;

/// Failures raised by scoring, monitoring, log storage and correction.
///
/// Degenerate distributions and unmatched spectrum bins are not errors:
/// the scorer floors empty bins and the corrector treats unmatched bins
/// as clean.
#[derive(Debug, Error)]
pub enum DriftError {
    #[error("insufficient data to score feature `{feature}`: {len} samples")]
    InsufficientData { feature: String, len: usize },

    #[error("no drift log has been written yet: {0}")]
    LogNotFound(String),

    #[error("unknown feature `{0}`")]
    UnknownFeature(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("timestamps must be strictly increasing (violated at row {index})")]
    NonMonotonicTimestamps { index: usize },

    #[error("non-finite value in column `{column}` at row {row}")]
    NonFiniteValue { column: String, row: usize },

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, DriftError>;
