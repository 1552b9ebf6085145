//! Error types for dynamic system models.
//!
//! Every failure the crate can report is a [`DynSysError`]. Failures raised by
//! a predictor (shape mismatches inside a layer, numerical errors) arrive as
//! [`DynSysError::Candle`] and are passed through untouched: the simulation
//! core cannot tell a predictor bug from caller misuse, so it never tries to
//! recover from them.
//!
//! # Example
//!
//! ```rust
//! use dynsys_model_rs::{DynSysError, ErrorKind, RunMode};
//!
//! let err = "backwards".parse::<RunMode>().unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::Configuration);
//! assert!(matches!(err, DynSysError::InvalidMode(_)));
//! ```

use std::path::PathBuf;

use thiserror::Error;

/// Result type for dynamic model operations.
pub type DynSysResult<T> = Result<T, DynSysError>;

/// Coarse classification of a [`DynSysError`].
///
/// None of these are retried anywhere in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unsupported architecture, optimizer or mode; bad hyper-parameters.
    Configuration,
    /// The caller broke a precondition (missing target, mismatched signals).
    Precondition,
    /// A checkpoint could not be found, read or written.
    Persistence,
    /// The predictor or the tensor backend failed.
    Predictor,
}

/// Errors that can occur while building, running or persisting a model.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DynSysError {
    /// Tensor operation failed (raised by the predictor or the backend)
    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Unknown predictor architecture name
    #[error("unsupported model architecture: {0}")]
    UnsupportedModel(String),

    /// Unknown optimizer name
    #[error("unsupported optimizer: {0}")]
    UnsupportedOptimizer(String),

    /// Unknown run mode passed to `set_mode`
    #[error("unknown run mode: {0}")]
    InvalidMode(String),

    /// Run mode cannot be dispatched with the current predictor configuration
    #[error("unsupported run mode {mode} at dispatch: {reason}")]
    UnsupportedMode { mode: String, reason: String },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid configuration file
    #[error("invalid config file: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// A target signal was required but not supplied
    #[error("mode {mode} requires a target output signal")]
    MissingTarget { mode: String },

    /// Signal shapes disagree
    #[error("shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: String,
        expected: String,
        got: String,
    },

    /// Checkpoint file does not exist
    #[error("could not find model: {}", path.display())]
    ModelNotFound { path: PathBuf },

    /// Checkpoint exists but could not be read or written
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl DynSysError {
    /// Create a shape mismatch error
    pub fn shape_mismatch(
        what: impl Into<String>,
        expected: impl Into<String>,
        got: impl Into<String>,
    ) -> Self {
        Self::ShapeMismatch {
            what: what.into(),
            expected: expected.into(),
            got: got.into(),
        }
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Candle(_) => ErrorKind::Predictor,
            Self::UnsupportedModel(_)
            | Self::UnsupportedOptimizer(_)
            | Self::InvalidMode(_)
            | Self::UnsupportedMode { .. }
            | Self::InvalidConfig(_)
            | Self::ConfigParse(_) => ErrorKind::Configuration,
            Self::MissingTarget { .. } | Self::ShapeMismatch { .. } => ErrorKind::Precondition,
            Self::ModelNotFound { .. } | Self::Checkpoint(_) | Self::Io(_) | Self::Serde(_) => {
                ErrorKind::Persistence
            }
        }
    }
}
