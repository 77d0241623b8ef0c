use crate::{FsConfig, LogFormat, R2Config, RuntimeConfig, S3Config, StorageBackend};
use anyhow::{anyhow, Context, Result};
use linkpage_core::OverflowPolicy;
use std::str::FromStr;

pub const ENV_PREFIX: &str = "LINKPAGE_";

/// Abstraction over environment-variable lookups so tests can supply their own.
pub trait EnvSource {
    /// Get a variable by its name without the `LINKPAGE_` prefix.
    fn get(&self, key: &str) -> Option<String>;

    /// Get a variable by its full name.
    /// Used for AWS standard variables (AWS_ACCESS_KEY_ID, etc.)
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Ingest queues
    if let Some(val) = get_env_parsed::<_, usize>(env, "MAX_BATCH_SIZE")? {
        config.ingest.max_batch_size = val;
    }
    if let Some(val) = get_env_parsed::<_, u64>(env, "FLUSH_INTERVAL_MS")? {
        config.ingest.flush_interval_ms = val;
    }
    if let Some(val) = get_env_parsed::<_, usize>(env, "MAX_QUEUE_SIZE")? {
        config.ingest.max_queue_size = val;
    }
    if let Some(policy) = env.get("OVERFLOW_POLICY") {
        config.ingest.overflow_policy = policy
            .parse::<OverflowPolicy>()
            .map_err(|e| anyhow!(e))
            .context("Invalid LINKPAGE_OVERFLOW_POLICY value")?;
    }

    // Read-path retry
    if let Some(val) = get_env_parsed::<_, u32>(env, "RETRY_MAX_RETRIES")? {
        config.retry.max_retries = val;
    }
    if let Some(val) = get_env_parsed::<_, u64>(env, "RETRY_INITIAL_DELAY_MS")? {
        config.retry.initial_delay_ms = val;
    }

    // Request configuration
    if let Some(val) = get_env_parsed::<_, usize>(env, "MAX_PAYLOAD_BYTES")? {
        config.request.max_payload_bytes = val;
    }

    // Server configuration (listen addr, log level/format)
    if let Some(addr) = env.get("LISTEN_ADDR") {
        config.server.listen_addr = addr;
    }
    if let Some(level) = env.get("LOG_LEVEL") {
        config.server.log_level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.server.log_format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    // Storage backend
    if let Some(backend) = env.get("STORAGE_BACKEND") {
        config.storage.backend = backend
            .parse::<StorageBackend>()
            .context("Invalid LINKPAGE_STORAGE_BACKEND value")?;
    }
    if let Some(prefix) = env.get("STORAGE_PREFIX") {
        config.storage.prefix = Some(prefix);
    }

    // Filesystem storage
    if let Some(path) = env.get("STORAGE_PATH") {
        config.storage.fs.get_or_insert_with(FsConfig::default).path = path;
    }

    // S3 storage
    if let Some(bucket) = env.get("S3_BUCKET") {
        ensure_s3(config).bucket = bucket;
    }
    if let Some(region) = env.get("S3_REGION") {
        ensure_s3(config).region = region;
    }
    if let Some(endpoint) = env.get("S3_ENDPOINT") {
        ensure_s3(config).endpoint = Some(endpoint);
    }

    // R2 storage
    if let Some(bucket) = env.get("R2_BUCKET") {
        ensure_r2(config).bucket = bucket;
    }
    if let Some(account_id) = env.get("R2_ACCOUNT_ID") {
        ensure_r2(config).account_id = account_id;
    }
    // AWS standard variables (without LINKPAGE_ prefix for compatibility),
    // routed to whichever object-store backend is active
    match config.storage.backend {
        StorageBackend::R2 => {
            if let Some(access_key_id) = env.get_raw("AWS_ACCESS_KEY_ID") {
                ensure_r2(config).access_key_id = access_key_id;
            }
            if let Some(secret_access_key) = env.get_raw("AWS_SECRET_ACCESS_KEY") {
                ensure_r2(config).secret_access_key = secret_access_key;
            }
            if let Some(endpoint) = env.get_raw("AWS_ENDPOINT_URL") {
                ensure_r2(config).endpoint = Some(endpoint);
            }
        }
        // S3 credentials are picked up from the environment by the operator;
        // LINKPAGE_S3_ENDPOINT takes precedence over the generic endpoint
        StorageBackend::S3 => {
            if let Some(endpoint) = env.get_raw("AWS_ENDPOINT_URL") {
                ensure_s3(config).endpoint.get_or_insert(endpoint);
            }
        }
        StorageBackend::Memory | StorageBackend::Fs => {}
    }

    Ok(())
}

fn ensure_s3(config: &mut RuntimeConfig) -> &mut S3Config {
    config.storage.s3.get_or_insert_with(S3Config::default)
}

fn ensure_r2(config: &mut RuntimeConfig) -> &mut R2Config {
    config.storage.r2.get_or_insert_with(R2Config::default)
}

fn get_env_parsed<E, T>(env: &E, key: &str) -> Result<Option<T>>
where
    E: EnvSource,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
