//! Typed failures reported across the storage boundary.
//!
//! Stores classify their own failures. The queue decides what to do with a
//! failed batch from the variant alone and never inspects message text.

use thiserror::Error;

/// Outcome of a failed bulk-persist call.
#[derive(Debug, Clone, Error)]
pub enum PersistError {
    /// The batch referenced a parent entity that has since been deleted.
    #[error("batch references a {entity} that no longer exists")]
    MissingParent { entity: &'static str },

    /// An earlier attempt already stored this exact batch.
    #[error("batch was already persisted")]
    AlreadyPersisted,

    /// Network, timeout or availability failure; the batch may succeed later.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Any other failure reported by the store.
    #[error("storage failure: {0}")]
    Fatal(String),
}

impl PersistError {
    /// Ignorable failures are expected under concurrent deletes or resubmission.
    /// The batch is dropped without alarm and never retried.
    pub fn is_ignorable(&self) -> bool {
        matches!(
            self,
            PersistError::MissingParent { .. } | PersistError::AlreadyPersisted
        )
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            PersistError::MissingParent { .. } => "MissingParent",
            PersistError::AlreadyPersisted => "AlreadyPersisted",
            PersistError::Transient(_) => "Transient",
            PersistError::Fatal(_) => "Fatal",
        }
    }
}

/// Failure of a single read or write against the store on a request path.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store request timed out: {0}")]
    Timeout(String),

    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("{0}")]
    Backend(String),
}
