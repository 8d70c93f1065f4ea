//! Errors
//!
//! Custom error types used throughout the `tgbm` crate.
use thiserror::Error;

/// Errors that can occur while training, storing or predicting with an ensemble.
#[derive(Debug, Error)]
pub enum TgbmError {
    /// Inconsistent or malformed sparse input, or buffers of the wrong length.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// The objective string is not one the engine knows about.
    #[error("Unknown objective {0}, expected one of {1}.")]
    UnknownObjective(String, String),
    /// A device failed while computing its share of the work.
    #[error("Device {0} failed: {1}")]
    DeviceError(usize, String),
    /// Model file, or dataset file, could not be read or written.
    #[error("IO error: {0}")]
    IoError(String),
    /// A model file parsed, but failed structural validation, or did not parse at all.
    #[error("Corrupt model: {0}")]
    CorruptModel(String),
    /// Input the engine does not accept, such as a dense feature matrix.
    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),
    /// Invalid value parsing.
    #[error("Invalid value {0} passed for {1}, expected one of {2}.")]
    ParseString(String, String, String),
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
}
