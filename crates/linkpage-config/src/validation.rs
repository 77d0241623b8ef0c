// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{anyhow, bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_ingest_config(&config.ingest)?;
    validate_retry_config(&config.retry)?;
    validate_request_config(&config.request)?;
    validate_storage_config(&config.storage)?;
    validate_server_config(&config.server)?;
    Ok(())
}

fn validate_ingest_config(config: &IngestConfig) -> Result<()> {
    if config.max_batch_size == 0 {
        bail!("ingest.max_batch_size must be greater than 0");
    }

    if config.flush_interval_ms == 0 {
        bail!("ingest.flush_interval_ms must be greater than 0");
    }

    if config.max_queue_size < config.max_batch_size {
        bail!(
            "ingest.max_queue_size ({}) must be at least ingest.max_batch_size ({})",
            config.max_queue_size,
            config.max_batch_size
        );
    }

    if config.max_queue_size > 1_000_000 {
        warn!(
            max_queue_size = config.max_queue_size,
            "ingest.max_queue_size is very large; may cause memory issues"
        );
    }

    if config.flush_interval_ms > 24 * 60 * 60 * 1000 {
        warn!(
            flush_interval_ms = config.flush_interval_ms,
            "ingest.flush_interval_ms exceeds a day; buffered events are at risk on crash"
        );
    }

    Ok(())
}

fn validate_retry_config(config: &RetryConfig) -> Result<()> {
    if config.max_retries > 10 {
        warn!(
            max_retries = config.max_retries,
            "retry.max_retries is very large; backoff doubles on every attempt"
        );
    }

    Ok(())
}

fn validate_request_config(config: &RequestConfig) -> Result<()> {
    if config.max_payload_bytes == 0 {
        bail!("request.max_payload_bytes must be greater than 0");
    }

    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    match config.backend {
        StorageBackend::Memory => {
            warn!("memory storage backend selected; events are not durable");
        }
        StorageBackend::Fs => {
            let fs = config
                .fs
                .as_ref()
                .ok_or_else(|| anyhow!("fs storage backend requires 'fs' configuration"))?;

            if fs.path.is_empty() {
                bail!("storage.fs.path must not be empty");
            }
        }
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| anyhow!("s3 storage backend requires 's3' configuration"))?;

            if s3.bucket.is_empty() {
                bail!("storage.s3.bucket is required for S3 backend");
            }

            if s3.region.is_empty() {
                bail!("storage.s3.region is required for S3 backend");
            }
        }
        StorageBackend::R2 => {
            let r2 = config
                .r2
                .as_ref()
                .ok_or_else(|| anyhow!("r2 storage backend requires 'r2' configuration"))?;

            if r2.bucket.is_empty() {
                bail!("storage.r2.bucket is required for R2 backend");
            }

            if r2.account_id.is_empty() {
                bail!("storage.r2.account_id is required for R2 backend");
            }

            if r2.access_key_id.is_empty() {
                bail!("storage.r2.access_key_id is required for R2 backend");
            }

            if r2.secret_access_key.is_empty() {
                bail!("storage.r2.secret_access_key is required for R2 backend");
            }
        }
    }

    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.listen_addr.is_empty() {
        bail!("server.listen_addr must not be empty");
    }

    let port = config
        .listen_addr
        .rsplit_once(':')
        .map(|(_, port)| port)
        .ok_or_else(|| anyhow!("server.listen_addr must be in format 'host:port'"))?;
    if port.parse::<u16>().is_err() {
        bail!(
            "server.listen_addr has an invalid port: {}",
            config.listen_addr
        );
    }

    Ok(())
}
