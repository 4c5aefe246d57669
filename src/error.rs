use thiserror::Error;

use crate::{validation::ValidationErrors, vector_math::VectorMathError};

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("Validation error: {0}")]
    ValidationError(ValidationErrors),
    #[error("Vector record not found: {0}")]
    NotFound(String),
    #[error("Vector math error: {0}")]
    MathError(#[from] VectorMathError),
    #[error("Store error during {operation}: {source}")]
    StoreError {
        operation: &'static str,
        #[source]
        source: BackendError,
    },
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RecordStoreError {
    pub fn store(operation: &'static str, source: BackendError) -> Self {
        RecordStoreError::StoreError { operation, source }
    }

    /// Validation and not-found failures are the caller's to fix.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RecordStoreError::ValidationError(_)
                | RecordStoreError::NotFound(_)
                | RecordStoreError::MathError(_)
        )
    }
}

impl From<ValidationErrors> for RecordStoreError {
    fn from(errors: ValidationErrors) -> Self {
        RecordStoreError::ValidationError(errors)
    }
}

/// Failure codes reported by a storage backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    Connection,
    NotConnected,
    DuplicateKey,
    InvalidDimension,
    Serialization,
    UnexpectedShape,
    Query,
}

impl BackendErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendErrorKind::Connection => "connection",
            BackendErrorKind::NotConnected => "not_connected",
            BackendErrorKind::DuplicateKey => "duplicate_key",
            BackendErrorKind::InvalidDimension => "invalid_dimension",
            BackendErrorKind::Serialization => "serialization",
            BackendErrorKind::UnexpectedShape => "unexpected_shape",
            BackendErrorKind::Query => "query",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("[{}] {message}", kind.as_str())]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RecordStoreError>;

/// Result alias for calls made directly against a storage backend.
pub type BackendResult<T> = std::result::Result<T, BackendError>;
