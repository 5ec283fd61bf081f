//! Error types for gammafit-core.

use thiserror::Error;

/// Result type alias for gammafit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for gammafit operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// A spectrum with no channels was supplied.
    #[error("spectrum has no channels")]
    EmptySpectrum,

    /// Counts must be finite and non-negative.
    #[error("invalid count {value} in channel {channel}")]
    InvalidCount { channel: usize, value: f64 },

    /// Bit depth outside the supported range.
    #[error("invalid bit depth: {0}")]
    InvalidBits(u16),

    /// Coefficient vector does not fit the curve family.
    #[error("{family} expects at least {expected} coefficients, got {actual}")]
    CoefficientCount {
        family: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Calibration fit or lookup failed.
    #[error("calibration error: {0}")]
    Calibration(String),

    /// Settings failed validation.
    #[error("invalid setting `{name}`: {reason}")]
    InvalidSetting { name: &'static str, reason: String },

    /// Text could not be parsed into counts.
    #[error("parse error on line {line}: {reason}")]
    Parse { line: usize, reason: String },
}
