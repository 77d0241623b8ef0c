use async_trait::async_trait;
use linkpage_core::{PersistError, TelemetryEvent};

/// Bulk-persist capability for one event kind.
///
/// Called with a non-empty batch in arrival order. Implementations must treat
/// events already stored as no-ops, and report a batch that references a
/// deleted parent as `PersistError::MissingParent` rather than a hard failure.
#[async_trait]
pub trait EventSink<E: TelemetryEvent>: Send + Sync {
    async fn persist(&self, batch: &[E]) -> Result<(), PersistError>;
}
