use anyhow::{Context, Result};
use clap::Parser;
use linkpage_config::{RuntimeConfig, StorageBackend};
use std::path::PathBuf;

/// Link-in-bio page server with buffered view and click analytics
#[derive(Parser)]
#[command(name = "linkpage")]
#[command(version)]
#[command(about = "Link-in-bio page server with buffered view and click analytics", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP listen port (overrides config file)
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Output directory for event objects (filesystem backend only)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(config_path) => RuntimeConfig::load_from_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?,
        None => RuntimeConfig::load().context("Failed to load configuration")?,
    };

    // CLI flags win over file and environment
    apply_cli_overrides(&mut config, &cli)?;
    config.validate()?;

    // run_with_config initializes tracing again; that call is a no-op
    linkpage::init_tracing(&config);

    validate_storage(&config)?;
    display_startup_info(&config);

    linkpage::run_with_config(config).await
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) -> Result<()> {
    if let Some(port) = cli.port {
        config.server.listen_addr = format!("0.0.0.0:{}", port);
    }

    if let Some(output) = &cli.output {
        if config.storage.backend != StorageBackend::Fs {
            anyhow::bail!(
                "--output flag only works with filesystem backend, but backend is '{}'.\n\
                Either remove --output flag or set backend to 'fs' in config file.",
                config.storage.backend
            );
        }

        let fs_config = config.storage.fs.get_or_insert_with(Default::default);
        fs_config.path = output.to_string_lossy().to_string();
    }

    if let Some(level) = &cli.log_level {
        config.server.log_level = level.clone();
    }

    Ok(())
}

fn display_startup_info(config: &RuntimeConfig) {
    use tracing::info;

    info!("╭─────────────────────────────────────────────────");
    info!("│ linkpage v{}", env!("CARGO_PKG_VERSION"));
    info!("├─────────────────────────────────────────────────");
    info!("│ Listen address: http://{}", config.server.listen_addr);
    info!("│ Storage backend: {}", config.storage.backend);

    match config.storage.backend {
        StorageBackend::Fs => {
            if let Some(fs) = &config.storage.fs {
                info!("│ Output directory: {}", fs.path);
            }
        }
        StorageBackend::S3 => {
            if let Some(s3) = &config.storage.s3 {
                info!("│ S3 bucket: {}", s3.bucket);
                info!("│ S3 region: {}", s3.region);
            }
        }
        StorageBackend::R2 => {
            if let Some(r2) = &config.storage.r2 {
                info!("│ R2 bucket: {}", r2.bucket);
                info!("│ R2 account: {}", r2.account_id);
            }
        }
        StorageBackend::Memory => info!("│ Events are kept in memory only"),
    }

    info!("│ Log level: {}", config.server.log_level);
    info!("│ Event queues:");
    info!("│   - Max batch size: {}", config.ingest.max_batch_size);
    info!("│   - Flush interval: {}ms", config.ingest.flush_interval_ms);
    info!("│   - Max queue size: {}", config.ingest.max_queue_size);
    info!("│   - Overflow policy: {:?}", config.ingest.overflow_policy);
    info!(
        "│ Retry: {} retries, {}ms initial delay",
        config.retry.max_retries, config.retry.initial_delay_ms
    );
    info!("╰─────────────────────────────────────────────────");
}

/// Create the output directory and prove it is writable before serving.
fn validate_storage(config: &RuntimeConfig) -> Result<()> {
    use std::fs;
    use tracing::info;

    if config.storage.backend != StorageBackend::Fs {
        return Ok(());
    }

    let fs_config = config
        .storage
        .fs
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("filesystem backend requires storage.fs configuration"))?;

    let output_path = PathBuf::from(&fs_config.path);
    if !output_path.exists() {
        info!("Creating output directory: {}", fs_config.path);
        fs::create_dir_all(&output_path)
            .with_context(|| format!("Failed to create output directory: {}", fs_config.path))?;
    }

    let test_file = output_path.join(".linkpage-write-test");
    fs::write(&test_file, b"test").with_context(|| {
        format!(
            "Output directory '{}' is not writable. Check permissions.",
            fs_config.path
        )
    })?;
    fs::remove_file(&test_file).context("Failed to remove test file")?;
    info!("Output directory validated: {}", fs_config.path);

    Ok(())
}
