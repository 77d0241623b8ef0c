// HTTP request handlers for server mode
//
// Telemetry ingestion, public page resolution, page admin and health checks

use anyhow::anyhow;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use linkpage_core::{IdError, RetryError, TransientFailure};
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use tracing::{debug, info};

use crate::{AppError, AppState};

const SESSION_HEADER: &str = "x-session-token";

#[derive(Debug, Deserialize)]
struct ViewPayload {
    page_id: String,
    #[serde(default)]
    session_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClickPayload {
    link_id: String,
    page_id: String,
    #[serde(default)]
    session_token: Option<String>,
}

/// POST /v1/views - record a page view
///
/// Always 202 for a body within the size limit. Telemetry problems never
/// surface to the visitor.
pub(crate) async fn record_view(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    check_payload_size(&state, &body, "views")?;

    match serde_json::from_slice::<ViewPayload>(&body) {
        Ok(payload) => {
            let visitor = visitor_address(&headers, connect.as_ref());
            state.pipeline.record_view(
                &payload.page_id,
                &visitor,
                payload.session_token.as_deref(),
            );
            counter!("linkpage.ingest.requests", 1, "kind" => "views");
        }
        Err(e) => {
            debug!(error = %e, "Ignoring malformed view payload");
            counter!("linkpage.ingest.malformed", 1, "kind" => "views");
        }
    }

    Ok(StatusCode::ACCEPTED.into_response())
}

/// POST /v1/clicks - record a link click
pub(crate) async fn record_click(
    State(state): State<AppState>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    check_payload_size(&state, &body, "clicks")?;

    match serde_json::from_slice::<ClickPayload>(&body) {
        Ok(payload) => {
            let visitor = visitor_address(&headers, connect.as_ref());
            state.pipeline.record_click(
                &payload.link_id,
                &payload.page_id,
                &visitor,
                payload.session_token.as_deref(),
            );
            counter!("linkpage.ingest.requests", 1, "kind" => "clicks");
        }
        Err(e) => {
            debug!(error = %e, "Ignoring malformed click payload");
            counter!("linkpage.ingest.malformed", 1, "kind" => "clicks");
        }
    }

    Ok(StatusCode::ACCEPTED.into_response())
}

/// GET /p/:public_id - resolve a public page and count the view
pub(crate) async fn show_page(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
    connect: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let directory = state.directory.as_ref();
    let lookup = public_id.as_str();
    let resolved = linkpage_core::with_transient_retry(&state.retry, "resolve_public_id", move || {
        directory.resolve_public_id(lookup)
    })
    .await;

    let record = match resolved {
        Ok(Some(record)) => record,
        Ok(None) => return Err(AppError::not_found(format!("page {} not found", public_id))),
        Err(e @ RetryError::Exhausted { .. }) => {
            return Err(AppError::with_status(
                StatusCode::SERVICE_UNAVAILABLE,
                anyhow!(e.to_string()),
            ))
        }
        Err(RetryError::Permanent(e)) => return Err(AppError::internal(e)),
    };

    let visitor = visitor_address(&headers, connect.as_ref());
    let session = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok());
    state
        .pipeline
        .record_view(&record.page_id, &visitor, session);

    Ok((
        StatusCode::OK,
        Json(json!({
            "page_id": record.page_id,
            "public_id": record.public_id,
        })),
    )
        .into_response())
}

/// POST /admin/pages - create a page with a fresh public id
pub(crate) async fn create_page(State(state): State<AppState>) -> Result<Response, AppError> {
    let public_id = state
        .ids
        .generate_unique(state.directory.as_ref())
        .await
        .map_err(|e| {
            let status = match &e {
                IdError::Lookup(store) if store.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            AppError::with_status(status, e.into())
        })?;

    let record = state
        .directory
        .insert_page(&public_id)
        .await
        .map_err(AppError::internal)?;

    info!(page_id = %record.page_id, public_id = %record.public_id, "Created page");
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

/// DELETE /admin/pages/:page_id
pub(crate) async fn delete_page(
    State(state): State<AppState>,
    Path(page_id): Path<String>,
) -> Result<Response, AppError> {
    let removed = state
        .directory
        .remove_page(&page_id)
        .await
        .map_err(AppError::internal)?;

    if !removed {
        return Err(AppError::not_found(format!("page {} not found", page_id)));
    }

    info!(page_id = %page_id, "Deleted page");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST /admin/flush - flush both event queues and wait
pub(crate) async fn flush_queues(State(state): State<AppState>) -> Result<Response, AppError> {
    state
        .pipeline
        .flush_all()
        .await
        .map_err(|e| AppError::with_status(StatusCode::BAD_GATEWAY, e.into()))?;

    Ok((StatusCode::OK, Json(json!({"status": "flushed"}))).into_response())
}

/// GET /health - Basic health check
pub(crate) async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "healthy"})))
}

/// GET /ready - Readiness check, with current queue depths
pub(crate) async fn ready_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ready",
            "queued_views": state.pipeline.views().len(),
            "queued_clicks": state.pipeline.clicks().len(),
        })),
    )
}

fn check_payload_size(state: &AppState, body: &Bytes, kind: &'static str) -> Result<(), AppError> {
    if body.len() > state.max_payload_bytes {
        counter!("linkpage.ingest.rejected", 1, "kind" => kind, "reason" => "payload_too_large");
        return Err(AppError::with_status(
            StatusCode::PAYLOAD_TOO_LARGE,
            anyhow!(
                "payload {} bytes exceeds max {} bytes",
                body.len(),
                state.max_payload_bytes
            ),
        ));
    }
    Ok(())
}

/// First hop of X-Forwarded-For, then X-Real-IP, then the peer address.
/// Empty when none is known; the pipeline drops such events.
fn visitor_address(headers: &HeaderMap, connect: Option<&ConnectInfo<SocketAddr>>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(',').next().unwrap_or("").trim().to_string())
            .filter(|value| !value.is_empty())
    };

    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| connect.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("10.9.9.9"));
        assert_eq!(visitor_address(&headers, None), "203.0.113.7");
    }

    #[test]
    fn falls_back_to_real_ip_then_peer() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(visitor_address(&headers, None), "198.51.100.2");

        let peer = ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000)));
        assert_eq!(visitor_address(&HeaderMap::new(), Some(&peer)), "127.0.0.1");
        assert_eq!(visitor_address(&HeaderMap::new(), None), "");
    }
}
