use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic validation failed or the underlying store refused a
    /// concurrent write. Safe to retry.
    #[error("Transaction conflict: {0}")]
    Conflict(String),

    #[error("Lock misuse: {0}")]
    LockMisuse(String),

    #[error("Closed: {0}")]
    Closed(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Errors that indicate a caller bug or a dead resource.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LockMisuse(_) | Self::Closed(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StoreError::Conflict("k".into()).is_conflict());
        assert!(!StoreError::Conflict("k".into()).is_fatal());
        assert!(StoreError::LockMisuse("release".into()).is_fatal());
        assert!(StoreError::Closed("shutdown".into()).is_fatal());
        assert!(!StoreError::Encoding("bad".into()).is_conflict());
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::Closed("store shut down".into());
        assert_eq!(err.to_string(), "Closed: store shut down");
    }
}
