use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UqError {
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Invalid probability in row {row}: {detail}")]
    InvalidProbability { row: usize, detail: String },

    #[error("Invalid pixel value {value} in image {image}")]
    InvalidPixel { image: usize, value: f64 },

    #[error("Empty batch")]
    EmptyBatch,

    #[error("Insufficient samples: {passes} pass(es), at least 2 required")]
    InsufficientSamples { passes: usize },

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Incomparable scores: {0}")]
    IncomparableScores(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl UqError {
    pub fn shape_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        UqError::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

pub type UqResult<T> = Result<T, UqError>;
