//! OpenDAL operator construction from `StorageConfig`

use crate::error::StorageError;
use linkpage_config::{StorageBackend, StorageConfig};
use opendal::{services, Operator};
use tracing::debug;

/// Build an operator for an object-store backend.
///
/// `StorageBackend::Memory` maps to OpenDAL's in-memory service; callers that
/// want the structured in-process store use `MemoryStore` instead.
pub fn build_operator(config: &StorageConfig) -> Result<Operator, StorageError> {
    let operator = match config.backend {
        StorageBackend::Memory => Operator::new(services::Memory::default())
            .map_err(|e| StorageError::operator("memory", e))?
            .finish(),
        StorageBackend::Fs => {
            let fs = config.fs.as_ref().ok_or_else(|| {
                StorageError::invalid_config("fs config required for filesystem backend")
            })?;

            Operator::new(services::Fs::default().root(&fs.path))
                .map_err(|e| StorageError::operator("filesystem", e))?
                .finish()
        }
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| StorageError::invalid_config("s3 config required for S3 backend"))?;

            let mut builder = services::S3::default()
                .bucket(&s3.bucket)
                .region(&s3.region);
            if let Some(endpoint) = &s3.endpoint {
                builder = builder.endpoint(endpoint);
            }

            Operator::new(builder)
                .map_err(|e| StorageError::operator("S3", e))?
                .finish()
        }
        StorageBackend::R2 => {
            let r2 = config
                .r2
                .as_ref()
                .ok_or_else(|| StorageError::invalid_config("r2 config required for R2 backend"))?;

            // Use endpoint from config if provided, otherwise construct from account_id
            let endpoint = r2
                .endpoint
                .clone()
                .unwrap_or_else(|| format!("https://{}.r2.cloudflarestorage.com", r2.account_id));

            let builder = services::S3::default()
                .bucket(&r2.bucket)
                .region("auto")
                .endpoint(&endpoint)
                .access_key_id(&r2.access_key_id)
                .secret_access_key(&r2.secret_access_key);

            Operator::new(builder)
                .map_err(|e| StorageError::operator("R2", e))?
                .finish()
        }
    };

    debug!(backend = %config.backend, "Storage operator initialized");
    Ok(operator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkpage_config::FsConfig;

    #[test]
    fn fs_backend_requires_section() {
        let config = StorageConfig {
            backend: StorageBackend::Fs,
            ..StorageConfig::default()
        };
        let err = build_operator(&config).unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfig { .. }));
    }

    #[test]
    fn fs_backend_builds() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig {
            backend: StorageBackend::Fs,
            fs: Some(FsConfig {
                path: dir.path().to_string_lossy().into_owned(),
            }),
            ..StorageConfig::default()
        };
        assert!(build_operator(&config).is_ok());
    }
}
