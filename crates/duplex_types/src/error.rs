//! Errors raised by native-side values and containers.

/// Failure converting or storing a boundary value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("index {index} out of range for length {len}")]
    OutOfRange { index: usize, len: usize },

    #[error("object already carries id {0}")]
    IdAlreadyAssigned(u64),
}

impl ValueError {
    pub fn mismatch(expected: impl ToString, found: impl ToString) -> Self {
        ValueError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}
