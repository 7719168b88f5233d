//! Error types for the Weft engine.

use crate::record::RecordIdentity;
use crate::TransformId;
use thiserror::Error;

/// All possible errors from the Weft engine.
///
/// Errors are `Clone` so they can travel inside notification events
/// alongside the request that produced them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Log errors
    #[error("transform not logged: {0}")]
    TransformNotLogged(TransformId),

    #[error("log position {position} out of range [0, {length}]")]
    OutOfRange { position: i64, length: usize },

    // Query errors
    #[error("record not found: {0}")]
    RecordNotFound(RecordIdentity),

    #[error("relationship '{relationship}' not found on {record}")]
    RelationshipNotFound {
        record: RecordIdentity,
        relationship: String,
    },

    #[error("invalid query expression: {0}")]
    Query(String),

    // Protocol errors
    #[error("operation not allowed: source '{source}' does not support {verb}")]
    OperationNotAllowed { source: String, verb: String },

    // State errors
    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("bucket persistence failed: {0}")]
    Bucket(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::TransformNotLogged("t1".into());
        assert_eq!(err.to_string(), "transform not logged: t1");

        let err = Error::OutOfRange {
            position: -1,
            length: 4,
        };
        assert_eq!(err.to_string(), "log position -1 out of range [0, 4]");

        let err = Error::RecordNotFound(RecordIdentity::new("planet", "p1"));
        assert_eq!(err.to_string(), "record not found: planet:p1");

        let err = Error::OperationNotAllowed {
            source: "remote".into(),
            verb: "push".into(),
        };
        assert_eq!(
            err.to_string(),
            "operation not allowed: source 'remote' does not support push"
        );
    }
}
