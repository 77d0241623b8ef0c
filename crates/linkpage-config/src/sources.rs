// Configuration source loading.
//
// Priority order:
// 1. Environment variables (LINKPAGE_* prefix)
// 2. Config file path from LINKPAGE_CONFIG
// 3. Inline config content from LINKPAGE_CONFIG_CONTENT
// 4. Default config files (./config.toml, ./.linkpage.toml)
// 5. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::RuntimeConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_PATHS: &[&str] = &["./config.toml", "./.linkpage.toml"];

pub fn load_config() -> Result<RuntimeConfig> {
    let env_source = StdEnvSource;
    let mut config = load_from_file(&env_source)?.unwrap_or_default();

    env_overrides::apply_env_overrides(&mut config, &env_source)?;
    config.validate()?;
    Ok(config)
}

fn load_from_file<E: EnvSource>(env: &E) -> Result<Option<RuntimeConfig>> {
    if let Some(path) = env.get("CONFIG") {
        return read_file(Path::new(&path)).map(Some);
    }

    if let Some(content) = env.get("CONFIG_CONTENT") {
        let config: RuntimeConfig = toml::from_str(&content)
            .context("Failed to parse inline config from LINKPAGE_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    for path in DEFAULT_CONFIG_PATHS {
        let path = Path::new(path);
        if path.exists() {
            return read_file(path).map(Some);
        }
    }

    Ok(None)
}

fn read_file(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Load configuration from a specific file path (for CLI --config flag).
/// Returns error if file doesn't exist or can't be parsed.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let mut config = read_file(path.as_ref())?;

    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    config.validate()?;
    Ok(config)
}

/// Build a configuration from optional inline TOML plus overrides from `env`.
pub fn load_with_env<E: EnvSource>(content: Option<&str>, env: &E) -> Result<RuntimeConfig> {
    let mut config = match content {
        Some(content) => {
            toml::from_str(content).context("Failed to parse inline config content")?
        }
        None => RuntimeConfig::default(),
    };

    env_overrides::apply_env_overrides(&mut config, env)?;
    config.validate()?;
    Ok(config)
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }

    fn get_raw(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env_overrides::tests::MapEnv;
    use crate::StorageBackend;
    use std::io::Write;

    #[test]
    fn env_overrides_inline_content() {
        let env = MapEnv::default().with("MAX_BATCH_SIZE", "10");
        let config = load_with_env(
            Some(
                r#"
                [ingest]
                max_batch_size = 500
                max_queue_size = 600
                "#,
            ),
            &env,
        )
        .unwrap();

        assert_eq!(config.ingest.max_batch_size, 10);
        assert_eq!(config.ingest.max_queue_size, 600);
    }

    #[test]
    fn config_path_from_env_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[storage]\nbackend = \"fs\"\n\n[storage.fs]\npath = \"/tmp/linkpage\""
        )
        .unwrap();

        let env = MapEnv::default().with("CONFIG", file.path().to_str().unwrap());
        let config = load_from_file(&env).unwrap().unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Fs);
        assert_eq!(config.storage.fs.unwrap().path, "/tmp/linkpage");
    }

    #[test]
    fn missing_config_path_is_an_error() {
        let env = MapEnv::default().with("CONFIG", "/nonexistent/linkpage.toml");
        let err = load_from_file(&env).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn invalid_result_fails_validation() {
        let env = MapEnv::default()
            .with("MAX_BATCH_SIZE", "500")
            .with("MAX_QUEUE_SIZE", "100");
        assert!(load_with_env(None, &env).is_err());
    }
}
