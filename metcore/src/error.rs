use thiserror::Error;

/// Errors raised by the calibration and matching core.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("insufficient data for {stage}: found {found}, need at least {required}")]
    InsufficientData {
        stage: &'static str,
        found: usize,
        required: usize,
    },

    /// All responses are identical, so no curve can be estimated.
    #[error("degenerate regression: response has zero spread")]
    DegenerateRegression,
}

pub type Result<T> = std::result::Result<T, CalibrationError>;
