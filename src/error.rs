use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use warp::reject::Reject;

use crate::lln::error::NetworkError;

pub type Result<T> = std::result::Result<T, PredictorError>;

/// Everything that can go wrong between an HTTP request and the durable mirrors.
#[derive(Debug, Error)]
pub enum PredictorError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("dataset file {} is corrupt: {source}", path.display())]
    CorruptDataset {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("model artifact {} is unusable: {reason}", path.display())]
    CorruptModel { path: PathBuf, reason: String },

    #[error("sample {index} has {got} features, expected {expected}")]
    RaggedSample {
        index: usize,
        got: usize,
        expected: usize,
    },

    #[error("training failed: {0}")]
    Training(#[from] NetworkError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("server error: {0}")]
    Server(#[from] warp::Error),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl PredictorError {
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn invalid_input(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }

    pub fn corrupt_model(path: impl AsRef<Path>, reason: impl ToString) -> Self {
        Self::CorruptModel {
            path: path.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }
    }

    /// Whether the caller, not the service, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }
}

impl Reject for PredictorError {}
