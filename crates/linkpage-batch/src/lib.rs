// linkpage-batch - Buffered ingestion of page-view and link-click telemetry
//
// Each event kind owns one `EventQueue`. Handlers enqueue without waiting on
// I/O; a per-queue worker task flushes the buffer in bulk when it reaches the
// batch size, when the flush interval elapses, or when asked explicitly.
// Failed batches are put back at the front of the buffer, bounded by a cap.

use linkpage_core::{EventKind, OverflowPolicy, PersistError};
use std::time::Duration;
use thiserror::Error;

mod buffer;
mod pipeline;
mod queue;
mod sink;

pub use buffer::EventBuffer;
pub use pipeline::IngestPipeline;
pub use queue::EventQueue;
pub use sink::EventSink;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 1000;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 2000;

#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Buffer length that triggers a flush.
    pub max_batch_size: usize,
    /// Period of the background flush timer.
    pub flush_interval: Duration,
    /// Cap applied when a failed batch is put back.
    pub max_queue_size: usize,
    pub overflow_policy: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

/// What a single flush call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was buffered.
    Empty,
    /// Another flush of the same queue was running; nothing was done.
    InProgress,
    /// The batch was stored.
    Persisted { count: usize },
    /// The store rejected the batch as ignorable and it was discarded.
    Dropped { count: usize },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(
        "failed to persist {count} {kind} events ({reinserted} requeued, {dropped} dropped): {source}"
    )]
    Persist {
        kind: EventKind,
        count: usize,
        reinserted: usize,
        dropped: usize,
        #[source]
        source: PersistError,
    },
}

impl IngestError {
    pub fn kind(&self) -> EventKind {
        match self {
            IngestError::Persist { kind, .. } => *kind,
        }
    }
}
