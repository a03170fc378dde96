//! Error types for the RustASR CTC workspace.

use thiserror::Error;

/// Main error type shared by all crates of the workspace.
#[derive(Error, Debug)]
pub enum AsrError {
    /// Audio decoding and resampling errors.
    #[error("Audio error: {0}")]
    Audio(String),

    /// Model construction or weight loading errors.
    #[error("Model error: {0}")]
    Model(String),

    /// Invalid configuration, detected at construction time.
    #[error("Config error: {0}")]
    Config(String),

    /// Data errors: malformed manifests, oversized examples, bad batches.
    #[error("Data error: {0}")]
    Data(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for ASR operations.
pub type AsrResult<T> = Result<T, AsrError>;
