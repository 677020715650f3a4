//! Common error types for SealShare.

use std::fmt;
use thiserror::Error;

/// Top-level error type for SealShare operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Operation requires a logged-in session.
    #[error("Not logged in")]
    NotLoggedIn,

    /// File is not in the open/closed state the operation requires.
    #[error("File state error: {0}")]
    FileState(String),

    /// Integrity value did not match: the file is corrupted or was tampered with.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    /// Cryptographic operation failed (malformed ciphertext, wrap/unwrap failure).
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Certificate could not be verified against the pinned root.
    #[error("Trust error: {0}")]
    Trust(String),

    /// A collaborator call failed.
    #[error("Remote error: {0}")]
    Remote(String),

    /// Several independent failures from one bulk operation.
    #[error("{0}")]
    Aggregate(AggregateError),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Operation not permitted.
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the authenticity of data is in question,
    /// as opposed to its availability.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity(_))
    }
}

impl From<AggregateError> for Error {
    fn from(err: AggregateError) -> Self {
        Error::Aggregate(err)
    }
}

/// Collected failures from a bulk operation such as closing every open file.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    /// Create an empty aggregate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a failure.
    pub fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    /// Underlying failures, in the order they happened.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Take the underlying failures.
    pub fn into_errors(self) -> Vec<Error> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// `Ok(())` when nothing failed, otherwise the aggregate as an error.
    pub fn into_result(self) -> Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Aggregate(self))
        }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} operation(s) failed", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n  {}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
