//! Error types for storage initialization and object mapping

use linkpage_core::{PersistError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend section missing or incomplete
    #[error("Invalid storage configuration: {message}")]
    InvalidConfig { message: String },

    /// OpenDAL refused to build the operator
    #[error("Failed to create {backend} operator: {source}")]
    Operator {
        backend: &'static str,
        #[source]
        source: opendal::Error,
    },
}

impl StorageError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    pub fn operator(backend: &'static str, source: opendal::Error) -> Self {
        Self::Operator { backend, source }
    }
}

/// Classify a failed object write for the event queue.
pub(crate) fn persist_error(err: opendal::Error) -> PersistError {
    if err.is_temporary() {
        PersistError::Transient(err.to_string())
    } else {
        PersistError::Fatal(err.to_string())
    }
}

/// Classify a failed object read or write on a request path.
pub(crate) fn store_error(err: opendal::Error) -> StoreError {
    if err.is_temporary() {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}
