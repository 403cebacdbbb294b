//! Error types for the annotation engine.
//!
//! Callers need to tell apart three situations: the call itself was wrong
//! ([`AnnotationError::Argument`]), required domain data is missing
//! ([`AnnotationError::Data`]), or the backend refused the request
//! ([`AnnotationError::Server`]).

use thiserror::Error;

/// Failure reported by an annotations backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Server error {status}: {message}")]
pub struct ServerError {
    /// HTTP-like status code
    pub status: u16,
    /// Message returned by the backend
    pub message: String,
}

impl ServerError {
    /// Create a server error with a status code and message.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Errors that can occur while working with an annotation collection.
#[derive(Error, Debug)]
pub enum AnnotationError {
    /// A caller-supplied value violates a contract (bad type, unknown label,
    /// out-of-range frame, malformed filter, unsaved object...)
    #[error("Argument error: {0}")]
    Argument(String),

    /// Required domain data is absent (e.g. a shape without points)
    #[error("Data error: {0}")]
    Data(String),

    /// Backend failure, propagated unchanged
    #[error(transparent)]
    Server(#[from] ServerError),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error in a file-backed backend
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnnotationError {
    /// Create an argument error with a message.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::Argument(message.into())
    }

    /// Create a data error with a message.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Whether this is an [`AnnotationError::Argument`].
    pub fn is_argument(&self) -> bool {
        matches!(self, Self::Argument(_))
    }

    /// Whether this is an [`AnnotationError::Data`].
    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data(_))
    }

    /// Whether this is an [`AnnotationError::Server`].
    pub fn is_server(&self) -> bool {
        matches!(self, Self::Server(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_are_distinguishable() {
        assert!(AnnotationError::argument("bad frame").is_argument());
        assert!(AnnotationError::data("no points").is_data());
        let err: AnnotationError = ServerError::new(500, "boom").into();
        assert!(err.is_server());
        assert!(!err.is_argument());
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::new(409, "version conflict");
        assert_eq!(err.to_string(), "Server error 409: version conflict");
        let wrapped = AnnotationError::from(err);
        assert_eq!(wrapped.to_string(), "Server error 409: version conflict");
    }
}
