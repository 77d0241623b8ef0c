// linkpage server - public page endpoints plus buffered analytics ingestion
//
// Features:
// - Axum HTTP server (HTTP/1.1, HTTP/2)
// - View and click events buffered per kind and flushed in bulk
// - Memory, filesystem, S3 and R2 storage
// - Structured logging with tracing
// - Graceful shutdown with a final drain of every event queue

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use linkpage_batch::IngestPipeline;
use linkpage_config::RuntimeConfig;
use linkpage_core::{PageDirectory, PublicIdGenerator, RetryPolicy};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

mod handlers;
mod init;

use handlers::{
    create_page, delete_page, flush_queues, health_check, ready_check, record_click, record_view,
    show_page,
};
pub use init::init_tracing;
use init::{init_pipeline, init_storage};

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub(crate) pipeline: Arc<IngestPipeline>,
    pub(crate) directory: Arc<dyn PageDirectory>,
    pub(crate) ids: PublicIdGenerator,
    pub(crate) retry: RetryPolicy,
    pub(crate) max_payload_bytes: usize,
}

impl AppState {
    pub fn new(
        pipeline: Arc<IngestPipeline>,
        directory: Arc<dyn PageDirectory>,
        retry: RetryPolicy,
        max_payload_bytes: usize,
    ) -> Self {
        Self {
            pipeline,
            directory,
            ids: PublicIdGenerator::default(),
            retry,
            max_payload_bytes,
        }
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }
}

/// Error type that implements IntoResponse
pub(crate) struct AppError {
    status: StatusCode,
    error: anyhow::Error,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request error: {:?}", self.error);
        }
        (
            self.status,
            Json(json!({
                "error": self.error.to_string(),
            })),
        )
            .into_response()
    }
}

impl AppError {
    pub fn with_status(status: StatusCode, error: anyhow::Error) -> Self {
        Self { status, error }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: anyhow::anyhow!(message.into()),
        }
    }

    pub fn internal<E>(error: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: error.into(),
        }
    }
}

/// Routes for the public page, telemetry ingestion and admin operations
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/views", post(record_view))
        .route("/v1/clicks", post(record_click))
        .route("/p/:public_id", get(show_page))
        .route("/admin/pages", post(create_page))
        .route("/admin/pages/:page_id", delete(delete_page))
        .route("/admin/flush", post(flush_queues))
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}

/// Entry point for the server (loads config automatically)
pub async fn run() -> Result<()> {
    let config = RuntimeConfig::load().context("Failed to load configuration")?;
    run_with_config(config).await
}

/// Entry point with pre-loaded configuration (for CLI usage)
pub async fn run_with_config(config: RuntimeConfig) -> Result<()> {
    init_tracing(&config);

    let addr = config.server.listen_addr.clone();
    let storage = init_storage(&config)?;
    let pipeline = Arc::new(init_pipeline(&config, &storage));

    let max_payload_bytes = config.request.max_payload_bytes;
    info!("Max payload size set to {} bytes", max_payload_bytes);

    let state = AppState::new(
        Arc::clone(&pipeline),
        storage.directory.clone(),
        config.retry.policy(),
        max_payload_bytes,
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind to {}", addr))?;

    info!("HTTP endpoint listening on http://{}", addr);
    info!("Routes:");
    info!("  POST   http://{}/v1/views              - Record a page view", addr);
    info!("  POST   http://{}/v1/clicks             - Record a link click", addr);
    info!("  GET    http://{}/p/:public_id          - Resolve a public page", addr);
    info!("  POST   http://{}/admin/pages           - Create a page", addr);
    info!("  DELETE http://{}/admin/pages/:page_id  - Delete a page", addr);
    info!("  POST   http://{}/admin/flush           - Flush event queues", addr);
    info!("  GET    http://{}/health                - Health check", addr);
    info!("  GET    http://{}/ready                 - Readiness check", addr);
    info!("Press Ctrl+C or send SIGTERM to stop");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error");

    // Drain on every exit path, including a server error
    pipeline.shutdown().await;

    served?;
    info!("Server shutdown complete");
    Ok(())
}
