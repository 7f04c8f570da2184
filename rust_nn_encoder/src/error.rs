use thiserror::Error;

/// Everything that can go wrong while building or running an encoder.
#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        context: &'static str,
        expected: String,
        found: String,
    },

    #[error(
        "token id {id} at (batch {batch}, position {position}) is outside the vocabulary of size {vocab_size}"
    )]
    TokenOutOfRange {
        id: usize,
        batch: usize,
        position: usize,
        vocab_size: usize,
    },

    #[error("sequence length {len} exceeds the maximum of {max} positions")]
    SequenceTooLong { len: usize, max: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, EncoderError>;

impl EncoderError {
    pub(crate) fn shape(
        context: &'static str,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        EncoderError::ShapeMismatch {
            context,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
