// End-to-end tests for the HTTP surface
//
// Requests go through the full router into an in-memory store, then the
// queues are flushed and the stored rows inspected.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use linkpage::{build_router, AppState};
use linkpage_batch::{IngestPipeline, QueueConfig};
use linkpage_core::{
    IdentifierLookup, PageDirectory, PageRecord, RetryPolicy, StoreError, PUBLIC_ID_LENGTH,
};
use linkpage_storage::{MemoryStore, StorageHandles};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const MAX_PAYLOAD: usize = 1024;

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(1))
}

fn app_with_store() -> (Router, Arc<MemoryStore>, Arc<IngestPipeline>) {
    let store = Arc::new(MemoryStore::new());
    let handles = StorageHandles::in_memory(store.clone());
    let pipeline = Arc::new(IngestPipeline::new(
        QueueConfig::default(),
        handles.views.clone(),
        handles.clicks.clone(),
    ));
    let state = AppState::new(
        pipeline.clone(),
        handles.directory,
        fast_retry(),
        MAX_PAYLOAD,
    );
    (build_router(state), store, pipeline)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn create_page(app: &Router) -> Value {
    let (status, body) = send(
        app,
        Request::post("/admin/pages").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

#[tokio::test]
async fn public_page_visit_is_recorded_as_view() {
    let (app, store, _pipeline) = app_with_store();
    let page = create_page(&app).await;
    let public_id = page["public_id"].as_str().unwrap();
    assert_eq!(public_id.len(), PUBLIC_ID_LENGTH);

    let request = Request::get(format!("/p/{}", public_id))
        .header("x-forwarded-for", "198.51.100.4, 10.0.0.1")
        .header("x-session-token", "sess-1")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["page_id"], page["page_id"]);

    let (status, _) = send(
        &app,
        Request::post("/admin/flush").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let views = store.views();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].visitor_address(), "198.51.100.4");
    assert_eq!(views[0].session_token(), Some("sess-1"));
}

#[tokio::test]
async fn click_endpoint_buffers_until_flush() {
    let (app, store, pipeline) = app_with_store();
    let page = create_page(&app).await;

    let (status, _) = send(
        &app,
        post_json(
            "/v1/clicks",
            serde_json::json!({"link_id": "link-1", "page_id": page["page_id"]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(pipeline.clicks().len(), 1);
    assert!(store.clicks().is_empty());

    pipeline.flush_all().await.unwrap();

    let clicks = store.clicks();
    assert_eq!(clicks.len(), 1);
    assert_eq!(clicks[0].link_id(), "link-1");
    assert_eq!(clicks[0].session_token(), None);
}

#[tokio::test]
async fn malformed_telemetry_is_accepted_and_dropped() {
    let (app, _store, pipeline) = app_with_store();

    let request = Request::post("/v1/views")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // Valid JSON but an empty page id
    let (status, _) = send(&app, post_json("/v1/views", serde_json::json!({"page_id": ""}))).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    assert!(pipeline.views().is_empty());
}

#[tokio::test]
async fn oversized_payload_is_rejected() {
    let (app, _store, pipeline) = app_with_store();
    let huge = "x".repeat(MAX_PAYLOAD + 1);

    let (status, body) = send(
        &app,
        post_json("/v1/views", serde_json::json!({"page_id": huge})),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert!(body["error"].as_str().unwrap().contains("exceeds max"));
    assert!(pipeline.views().is_empty());
}

#[tokio::test]
async fn unknown_public_id_is_not_found() {
    let (app, _store, pipeline) = app_with_store();

    let (status, _) = send(&app, Request::get("/p/nope").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(pipeline.views().is_empty());
}

#[tokio::test]
async fn deleted_page_no_longer_resolves() {
    let (app, _store, _pipeline) = app_with_store();
    let page = create_page(&app).await;
    let page_id = page["page_id"].as_str().unwrap();
    let public_id = page["public_id"].as_str().unwrap();

    let delete = || {
        Request::delete(format!("/admin/pages/{}", page_id))
            .body(Body::empty())
            .unwrap()
    };
    assert_eq!(send(&app, delete()).await.0, StatusCode::NO_CONTENT);
    assert_eq!(send(&app, delete()).await.0, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Request::get(format!("/p/{}", public_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

/// Directory whose lookups always time out.
struct UnreachableDirectory {
    calls: AtomicUsize,
}

#[async_trait]
impl IdentifierLookup for UnreachableDirectory {
    async fn public_id_exists(&self, _candidate: &str) -> Result<bool, StoreError> {
        Err(StoreError::Timeout("lookup".into()))
    }
}

#[async_trait]
impl PageDirectory for UnreachableDirectory {
    async fn resolve_public_id(&self, _public_id: &str) -> Result<Option<PageRecord>, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Timeout("connect timeout".into()))
    }

    async fn insert_page(&self, _public_id: &str) -> Result<PageRecord, StoreError> {
        Err(StoreError::Connection("refused".into()))
    }

    async fn remove_page(&self, _page_id: &str) -> Result<bool, StoreError> {
        Err(StoreError::Connection("refused".into()))
    }
}

#[tokio::test]
async fn unreachable_directory_is_retried_then_unavailable() {
    let store = Arc::new(MemoryStore::new());
    let handles = StorageHandles::in_memory(store);
    let pipeline = Arc::new(IngestPipeline::new(
        QueueConfig::default(),
        handles.views,
        handles.clicks,
    ));
    let directory = Arc::new(UnreachableDirectory {
        calls: AtomicUsize::new(0),
    });
    let state = AppState::new(pipeline, directory.clone(), fast_retry(), MAX_PAYLOAD);
    let app = build_router(state);

    let (status, _) = send(&app, Request::get("/p/abc").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(directory.calls.load(Ordering::SeqCst), 3);

    let (status, _) = send(
        &app,
        Request::post("/admin/pages").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn health_and_ready() {
    let (app, _store, _pipeline) = app_with_store();

    let (status, body) = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");

    let (status, body) = send(&app, Request::get("/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queued_views"], 0);
}
