//! Per-kind event queue with a supervising flush worker.
//!
//! The buffer lives behind a short `parking_lot` mutex that is never held
//! across an await. A `processing` flag keeps flushes of one queue from
//! overlapping: whichever trigger wins the flag takes the snapshot, every
//! other trigger is a no-op until the flag is released.

use metrics::{counter, histogram};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

use linkpage_core::{PersistError, TelemetryEvent};

use crate::buffer::EventBuffer;
use crate::sink::EventSink;
use crate::{FlushOutcome, IngestError, QueueConfig};

#[derive(Debug)]
enum FlushRequest {
    /// Buffer reached `max_batch_size`.
    Threshold,
    /// Flush what is left, then exit.
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum FlushTrigger {
    Threshold,
    Timer,
    Shutdown,
}

impl FlushTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Threshold => "threshold",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Shutdown => "shutdown",
        }
    }
}

struct QueueShared<E: TelemetryEvent> {
    config: QueueConfig,
    buffer: Mutex<EventBuffer<E>>,
    processing: AtomicBool,
    /// A threshold request is queued for the worker and not yet picked up.
    flush_requested: AtomicBool,
    /// Woken whenever a flush releases `processing`.
    idle: Notify,
    sink: Arc<dyn EventSink<E>>,
}

/// Releases the processing flag even if the flush future is dropped mid-persist.
struct ProcessingGuard<'a, E: TelemetryEvent>(&'a QueueShared<E>);

impl<E: TelemetryEvent> Drop for ProcessingGuard<'_, E> {
    fn drop(&mut self) {
        self.0.processing.store(false, Ordering::Release);
        self.0.idle.notify_waiters();
    }
}

impl<E: TelemetryEvent> QueueShared<E> {
    async fn flush(&self) -> Result<FlushOutcome, IngestError> {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            trace!(kind = %E::KIND, "Flush already in progress");
            return Ok(FlushOutcome::InProgress);
        }
        let _guard = ProcessingGuard(self);

        let batch = self.buffer.lock().take();
        if batch.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let count = batch.len();
        histogram!("linkpage.queue.batch_size", count as f64, "kind" => E::KIND.as_str());

        match self.sink.persist(&batch).await {
            Ok(()) => {
                counter!("linkpage.queue.flushes", 1, "kind" => E::KIND.as_str());
                debug!(kind = %E::KIND, count, "Persisted event batch");
                Ok(FlushOutcome::Persisted { count })
            }
            Err(err) if err.is_ignorable() => {
                debug!(
                    kind = %E::KIND,
                    count,
                    reason = err.error_type(),
                    "Discarded event batch"
                );
                Ok(FlushOutcome::Dropped { count })
            }
            Err(err) => {
                let dropped = self.buffer.lock().reinsert(
                    batch,
                    self.config.max_queue_size,
                    self.config.overflow_policy,
                );
                let reinserted = count.saturating_sub(dropped);
                counter!("linkpage.queue.flush_failures", 1, "kind" => E::KIND.as_str());

                match &err {
                    PersistError::Fatal(_) => {
                        error!(kind = %E::KIND, count, error = %err, "Failed to persist event batch")
                    }
                    _ => {
                        warn!(kind = %E::KIND, count, error = %err, "Failed to persist event batch")
                    }
                }
                if dropped > 0 {
                    counter!("linkpage.queue.dropped", dropped as u64, "kind" => E::KIND.as_str());
                    warn!(
                        kind = %E::KIND,
                        dropped,
                        max_queue_size = self.config.max_queue_size,
                        policy = ?self.config.overflow_policy,
                        "Queue over capacity after requeue, dropped events"
                    );
                }

                Err(IngestError::Persist {
                    kind: E::KIND,
                    count,
                    reinserted,
                    dropped,
                    source: err,
                })
            }
        }
    }

    /// Flush on behalf of the worker. Failures were already logged by `flush`.
    async fn flush_logged(&self, trigger: FlushTrigger) {
        match self.flush().await {
            Ok(FlushOutcome::Persisted { count }) => {
                debug!(kind = %E::KIND, count, trigger = trigger.as_str(), "Background flush complete")
            }
            Ok(_) => {}
            Err(e) => {
                debug!(kind = %E::KIND, trigger = trigger.as_str(), error = %e, "Background flush failed")
            }
        }
    }
}

/// In-memory buffer for one event kind.
///
/// Must be created inside a tokio runtime: construction spawns the worker
/// that owns the flush timer and serves threshold requests.
pub struct EventQueue<E: TelemetryEvent> {
    shared: Arc<QueueShared<E>>,
    requests: mpsc::UnboundedSender<FlushRequest>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<E: TelemetryEvent> EventQueue<E> {
    pub fn new(config: QueueConfig, sink: Arc<dyn EventSink<E>>) -> Self {
        let config = QueueConfig {
            max_batch_size: config.max_batch_size.max(1),
            flush_interval: config.flush_interval.max(Duration::from_millis(1)),
            ..config
        };
        let shared = Arc::new(QueueShared {
            config,
            buffer: Mutex::new(EventBuffer::new()),
            processing: AtomicBool::new(false),
            flush_requested: AtomicBool::new(false),
            idle: Notify::new(),
            sink,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), rx));

        Self {
            shared,
            requests: tx,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Append an event. Never waits on I/O.
    ///
    /// Reaching `max_batch_size` asks the worker for a flush and returns
    /// without waiting for it.
    pub fn enqueue(&self, event: E) {
        let len = self.shared.buffer.lock().push(event);
        counter!("linkpage.queue.enqueued", 1, "kind" => E::KIND.as_str());

        // At most one threshold request outstanding at a time
        if len >= self.shared.config.max_batch_size
            && !self.shared.flush_requested.swap(true, Ordering::AcqRel)
        {
            trace!(kind = %E::KIND, len, "Batch size reached, requesting flush");
            // Fails only after the worker has exited; explicit flushes still work.
            if self.requests.send(FlushRequest::Threshold).is_err() {
                self.shared.flush_requested.store(false, Ordering::Release);
            }
        }
    }

    /// Snapshot the buffer and persist it.
    ///
    /// Returns `FlushOutcome::InProgress` without doing anything if another
    /// flush of this queue is running.
    pub async fn flush(&self) -> Result<FlushOutcome, IngestError> {
        self.shared.flush().await
    }

    /// Like `flush`, but waits out a flush that is already running and then
    /// flushes whatever is buffered at that point.
    pub async fn drain(&self) -> Result<FlushOutcome, IngestError> {
        loop {
            let idle = self.shared.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            match self.shared.flush().await? {
                FlushOutcome::InProgress => idle.await,
                outcome => return Ok(outcome),
            }
        }
    }

    /// Stop the flush timer and request one last flush without waiting for it.
    pub fn destroy(&self) {
        // Dropping the handle detaches the worker; it exits after the final flush.
        drop(self.worker.lock().take());

        if self.requests.send(FlushRequest::Shutdown).is_err() {
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let shared = Arc::clone(&self.shared);
                runtime.spawn(async move { shared.flush_logged(FlushTrigger::Shutdown).await });
            }
        }
    }

    /// Stop the worker and wait for it to exit. The worker flushes whatever
    /// is still buffered before exiting.
    pub async fn stop(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            let _ = self.requests.send(FlushRequest::Shutdown);
            if let Err(e) = handle.await {
                warn!(kind = %E::KIND, error = %e, "Queue worker ended abnormally");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.buffer.lock().is_empty()
    }

    /// Copy of the buffered events, oldest first.
    pub fn pending(&self) -> Vec<E> {
        self.shared.buffer.lock().iter().cloned().collect()
    }
}

impl<E: TelemetryEvent> Drop for EventQueue<E> {
    fn drop(&mut self) {
        if self.worker.get_mut().take().is_some() {
            let _ = self.requests.send(FlushRequest::Shutdown);
        }
    }
}

async fn run_worker<E: TelemetryEvent>(
    shared: Arc<QueueShared<E>>,
    mut requests: mpsc::UnboundedReceiver<FlushRequest>,
) {
    let period = shared.config.flush_interval;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(
        kind = %E::KIND,
        interval_ms = period.as_millis() as u64,
        "Queue worker started"
    );

    loop {
        tokio::select! {
            request = requests.recv() => match request {
                Some(FlushRequest::Threshold) => {
                    // Cleared first so events arriving mid-flush can ask again
                    shared.flush_requested.store(false, Ordering::Release);
                    shared.flush_logged(FlushTrigger::Threshold).await
                }
                Some(FlushRequest::Shutdown) => {
                    shared.flush_logged(FlushTrigger::Shutdown).await;
                    break;
                }
                None => break,
            },
            _ = ticker.tick() => shared.flush_logged(FlushTrigger::Timer).await,
        }
    }

    debug!(kind = %E::KIND, "Queue worker stopped");
}
