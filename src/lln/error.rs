use ndarray::ShapeError;
use thiserror::Error;

/// The result type used across the network library.
pub type Result<T> = std::result::Result<T, NetworkError>;

/// Errors raised while building, training or running a `Sequential`.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("size mismatch in {what}: got {got}, expected {expected}")]
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },

    #[error("cannot fit on an empty dataset")]
    EmptyDataset,

    #[error("validation split {split} leaves no training rows out of {rows}")]
    NoTrainingRows { rows: usize, split: f64 },

    #[error("invalid dropout rate {0}, expected a value in [0, 1)")]
    InvalidDropoutRate(f32),

    #[error("the network has no layers")]
    NoLayers,

    #[error("shape error: {0}")]
    Shape(#[from] ShapeError),
}
