use thiserror::Error;

/// Errors produced while validating or transforming identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid length: expected {expected}, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("invalid character {character:?} at position {position}")]
    Alphabet { character: char, position: usize },

    #[error("secret key must be exactly {expected} bytes, got {actual}")]
    KeyLength { expected: usize, actual: usize },

    #[error("malformed base64 input: {reason}")]
    Malformed { reason: String },
}

impl CodecError {
    pub fn length(expected: usize, actual: usize) -> Self {
        Self::Length { expected, actual }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Whether the error comes from a per-request identifier rather than
    /// from the key supplied at startup.
    pub fn is_input_error(&self) -> bool {
        !matches!(self, Self::KeyLength { .. })
    }
}
