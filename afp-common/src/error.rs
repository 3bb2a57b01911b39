//! Common error types for the audio feature pipeline

use thiserror::Error;

/// Common result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the pipeline services
///
/// Duplicate inserts are deliberately not represented here: the feature
/// store signals a duplicate through `write` returning `Ok(false)`.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or incomplete message; isolated to one message,
    /// drain loops skip it and continue
    #[error("invalid message: {0}")]
    Validation(String),

    /// A message with the wrong discriminator tag reached a stage
    #[error("unexpected feature type: expected '{expected}', got '{actual}'")]
    TypeMismatch { expected: String, actual: String },

    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Underlying transport or storage adapter cannot be reached.
    /// Fatal to the calling operation; never swallowed as "empty".
    #[error("resource unavailable: {0}")]
    Unavailable(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// True for failures that are confined to a single message.
    ///
    /// Drain loops (`process_all`, `flush`) log these and continue with the
    /// next item; everything else aborts the whole operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::TypeMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_and_type_mismatch_are_recoverable() {
        assert!(Error::Validation("missing field".into()).is_recoverable());
        assert!(Error::TypeMismatch {
            expected: "A".into(),
            actual: "B".into()
        }
        .is_recoverable());
    }

    #[test]
    fn resource_failures_are_not_recoverable() {
        assert!(!Error::Unavailable("broker gone".into()).is_recoverable());
        assert!(!Error::Config("bad value".into()).is_recoverable());
    }
}
