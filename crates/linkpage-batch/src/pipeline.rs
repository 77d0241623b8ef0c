//! Ingestion entry points and the shutdown drain for both event kinds.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, trace, warn};

use linkpage_core::{ClickEvent, ViewEvent};

use crate::queue::EventQueue;
use crate::sink::EventSink;
use crate::{FlushOutcome, IngestError, QueueConfig};

/// Owns the view and click queues. Built once by the composition root and
/// shared with request handlers.
pub struct IngestPipeline {
    views: EventQueue<ViewEvent>,
    clicks: EventQueue<ClickEvent>,
}

impl IngestPipeline {
    pub fn new(
        config: QueueConfig,
        view_sink: Arc<dyn EventSink<ViewEvent>>,
        click_sink: Arc<dyn EventSink<ClickEvent>>,
    ) -> Self {
        Self {
            views: EventQueue::new(config.clone(), view_sink),
            clicks: EventQueue::new(config, click_sink),
        }
    }

    /// Validate, timestamp and buffer a page view. Malformed input is dropped.
    pub fn record_view(&self, page_id: &str, visitor_address: &str, session_token: Option<&str>) {
        match ViewEvent::new(page_id, visitor_address, session_token, Utc::now()) {
            Some(event) => self.views.enqueue(event),
            None => trace!(page_id, "Skipping view with missing page or visitor"),
        }
    }

    /// Validate, timestamp and buffer a link click. Malformed input is dropped.
    pub fn record_click(
        &self,
        link_id: &str,
        page_id: &str,
        visitor_address: &str,
        session_token: Option<&str>,
    ) {
        match ClickEvent::new(link_id, page_id, visitor_address, session_token, Utc::now()) {
            Some(event) => self.clicks.enqueue(event),
            None => trace!(link_id, page_id, "Skipping click with missing link, page or visitor"),
        }
    }

    /// Flush every queue and wait for completion.
    ///
    /// Both queues are attempted; the first error is returned.
    pub async fn flush_all(&self) -> Result<(), IngestError> {
        let views = self.views.drain().await;
        let clicks = self.clicks.drain().await;
        views?;
        clicks?;
        Ok(())
    }

    /// Best-effort final drain, then stop the queue workers.
    ///
    /// Never fails: drain errors are logged and the affected events stay
    /// buffered for the worker's last attempt on the way out.
    pub async fn shutdown(&self) {
        let (views, clicks) = tokio::join!(self.views.drain(), self.clicks.drain());
        for result in [views, clicks] {
            match result {
                Ok(FlushOutcome::Persisted { count }) => {
                    info!(count, "Flushed buffered events before shutdown")
                }
                Ok(_) => {}
                Err(e) => warn!(kind = %e.kind(), error = %e, "Shutdown flush failed"),
            }
        }

        tokio::join!(self.views.stop(), self.clicks.stop());

        let remaining = self.views.len() + self.clicks.len();
        if remaining > 0 {
            warn!(remaining, "Events still buffered at shutdown were lost");
        }
        info!("Ingest pipeline stopped");
    }

    pub fn views(&self) -> &EventQueue<ViewEvent> {
        &self.views
    }

    pub fn clicks(&self) -> &EventQueue<ClickEvent> {
        &self.clicks
    }
}
