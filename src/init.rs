// Initialization utilities for the server
//
// Storage backend and logging/tracing setup

use anyhow::{Context, Result};
use linkpage_batch::{IngestPipeline, QueueConfig};
use linkpage_config::{LogFormat, RuntimeConfig};
use linkpage_storage::StorageHandles;
use tracing::info;

/// Initialize storage handles from RuntimeConfig
pub(crate) fn init_storage(config: &RuntimeConfig) -> Result<StorageHandles> {
    info!(
        "Initializing storage with backend: {}",
        config.storage.backend
    );
    linkpage_storage::init_storage(&config.storage).context("Failed to initialize storage")
}

/// Build the ingest pipeline. Must run inside the tokio runtime.
pub(crate) fn init_pipeline(config: &RuntimeConfig, storage: &StorageHandles) -> IngestPipeline {
    let ingest = &config.ingest;
    let queue_config = QueueConfig {
        max_batch_size: ingest.max_batch_size,
        flush_interval: ingest.flush_interval(),
        max_queue_size: ingest.max_queue_size,
        overflow_policy: ingest.overflow_policy,
    };

    info!(
        "Event queues: max_batch_size={} flush_interval={}ms max_queue_size={} overflow={:?}",
        queue_config.max_batch_size,
        ingest.flush_interval_ms,
        queue_config.max_queue_size,
        queue_config.overflow_policy
    );

    IngestPipeline::new(queue_config, storage.views.clone(), storage.clicks.clone())
}

/// Initialize tracing/logging from RuntimeConfig
pub fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let server = &config.server;

    // Parse log level from config
    let env_filter =
        EnvFilter::try_new(&server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match server.log_format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
        }
        LogFormat::Text => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };
}
