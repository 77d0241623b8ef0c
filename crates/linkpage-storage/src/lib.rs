// linkpage-storage - Durable homes for pages and telemetry events
//
// Two families of backends:
// - `MemoryStore`: structured in-process store, used for development and tests
// - OpenDAL object stores (fs, s3, r2): events as JSON-lines objects, pages as
//   small JSON records

use linkpage_batch::EventSink;
use linkpage_config::{StorageBackend, StorageConfig};
use linkpage_core::{ClickEvent, PageDirectory, ViewEvent};
use std::sync::Arc;
use tracing::info;

mod error;
mod memory;
mod object_store;
mod operator;

pub use error::StorageError;
pub use memory::MemoryStore;
pub use object_store::{ObjectEventStore, ObjectPageDirectory};
pub use operator::build_operator;

/// Everything the server needs from storage, behind trait objects.
#[derive(Clone)]
pub struct StorageHandles {
    pub directory: Arc<dyn PageDirectory>,
    pub views: Arc<dyn EventSink<ViewEvent>>,
    pub clicks: Arc<dyn EventSink<ClickEvent>>,
}

impl StorageHandles {
    /// All three roles served by one in-memory store.
    pub fn in_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            directory: store.clone(),
            views: store.clone(),
            clicks: store,
        }
    }
}

/// Build storage handles from configuration.
pub fn init_storage(config: &StorageConfig) -> Result<StorageHandles, StorageError> {
    if config.backend == StorageBackend::Memory {
        info!("Using in-memory storage");
        return Ok(StorageHandles::in_memory(Arc::new(MemoryStore::new())));
    }

    let operator = build_operator(config)?;
    let prefix = config.normalized_prefix();
    info!(backend = %config.backend, prefix = %prefix, "Using object storage");

    Ok(StorageHandles {
        directory: Arc::new(ObjectPageDirectory::new(operator.clone(), prefix.clone())),
        views: Arc::new(ObjectEventStore::<ViewEvent>::new(
            operator.clone(),
            prefix.clone(),
        )),
        clicks: Arc::new(ObjectEventStore::<ClickEvent>::new(operator, prefix)),
    })
}
