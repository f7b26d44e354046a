use std::path::PathBuf;

use metcore::CalibrationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AlignError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("parameter '{key}': cannot parse '{value}'")]
    Param { key: String, value: String },

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed feature table {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("{}: row {row}, column '{column}': {message}", path.display())]
    Field {
        path: PathBuf,
        row: usize,
        column: String,
        message: String,
    },

    #[error("failed to serialize summary: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AlignError>;
