//! Error types for the cross-validation harness

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("dataset error at {path}:{line}: {msg}")]
    Dataset {
        path: PathBuf,
        line: usize,
        msg: String,
    },

    #[error("dataset error: {0}")]
    InvalidDataset(String),

    #[error("normalizer scale is degenerate (std = {std}); targets have no spread")]
    DegenerateNormalizer { std: f64 },

    #[error("only binary classification is implemented, model produced {0} classes")]
    UnsupportedClassCount(usize),

    #[error("regression model must produce one output column, got {0}")]
    RegressionWidth(usize),

    #[error("non-finite {what} ({value}) in fold {fold}, epoch {epoch}, batch {batch}")]
    NonFinite {
        what: &'static str,
        value: f64,
        fold: usize,
        epoch: usize,
        batch: usize,
    },

    #[error("checkpoint error at {path}: {msg}")]
    Checkpoint { path: PathBuf, msg: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("tensor data error: {0}")]
    Tensor(String),
}

impl HarnessError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn invalid(name: &str, value: impl ToString, reason: &str) -> Self {
        HarnessError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}
