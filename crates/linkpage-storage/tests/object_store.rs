use chrono::{TimeZone, Utc};
use linkpage_batch::EventSink;
use linkpage_config::{FsConfig, StorageBackend, StorageConfig};
use linkpage_core::{ClickEvent, IdentifierLookup, PageDirectory, PersistError, ViewEvent};
use linkpage_storage::{build_operator, init_storage, ObjectEventStore, ObjectPageDirectory};
use opendal::{services, Operator};

fn memory_operator() -> Operator {
    Operator::new(services::Memory::default()).unwrap().finish()
}

fn views() -> Vec<ViewEvent> {
    let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
    vec![
        ViewEvent::new("page-1", "10.0.0.1", None, at).unwrap(),
        ViewEvent::new("page-1", "10.0.0.2", Some("s1"), at).unwrap(),
    ]
}

#[tokio::test]
async fn batch_written_as_jsonl_under_date_partition() {
    let op = memory_operator();
    let store = ObjectEventStore::<ViewEvent>::new(op.clone(), "prod/");

    store.persist(&views()).await.unwrap();

    let entries = op.list_with("prod/views/").recursive(true).await.unwrap();
    let paths: Vec<String> = entries
        .iter()
        .map(|e| e.path().to_string())
        .filter(|p| p.ends_with(".jsonl"))
        .collect();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].starts_with("prod/views/date=2024-03-09/"));

    let body = op.read(&paths[0]).await.unwrap().to_vec();
    let lines: Vec<serde_json::Value> = String::from_utf8(body)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["visitor_address"], "10.0.0.1");
    assert!(lines[0]["session_token"].is_null());
    assert_eq!(lines[1]["session_token"], "s1");
}

#[tokio::test]
async fn resubmitted_batch_is_already_persisted() {
    let store = ObjectEventStore::<ViewEvent>::new(memory_operator(), "");
    let batch = views();

    store.persist(&batch).await.unwrap();
    let err = store.persist(&batch).await.unwrap_err();
    assert!(matches!(err, PersistError::AlreadyPersisted));
    assert!(err.is_ignorable());
}

async fn stored_rows(op: &Operator, dir: &str) -> Vec<serde_json::Value> {
    let mut rows = Vec::new();
    for entry in op.list_with(dir).recursive(true).await.unwrap() {
        if !entry.path().ends_with(".jsonl") {
            continue;
        }
        let body = op.read(entry.path()).await.unwrap().to_vec();
        for line in String::from_utf8(body).unwrap().lines() {
            rows.push(serde_json::from_str(line).unwrap());
        }
    }
    rows
}

#[tokio::test]
async fn requeued_events_are_not_stored_twice() {
    let op = memory_operator();
    let store = ObjectEventStore::<ViewEvent>::new(op.clone(), "");
    let first = views();
    let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 5, 0).unwrap();
    let newer = ViewEvent::new("page-1", "10.0.0.3", None, at).unwrap();

    store.persist(&first).await.unwrap();

    // Earlier batch requeued ahead of a newer event
    let merged = vec![first[0].clone(), first[1].clone(), newer];
    store.persist(&merged).await.unwrap();

    let rows = stored_rows(&op, "views/").await;
    assert_eq!(rows.len(), 3);
    assert_eq!(
        rows.iter()
            .filter(|row| row["visitor_address"] == "10.0.0.3")
            .count(),
        1
    );

    let err = store.persist(&merged).await.unwrap_err();
    assert!(matches!(err, PersistError::AlreadyPersisted));
}

#[tokio::test]
async fn page_directory_round_trip() {
    let directory = ObjectPageDirectory::new(memory_operator(), "");

    let record = directory.insert_page("abc-123").await.unwrap();
    assert!(directory.public_id_exists("abc-123").await.unwrap());
    assert!(directory.insert_page("abc-123").await.is_err());

    let resolved = directory.resolve_public_id("abc-123").await.unwrap().unwrap();
    assert_eq!(resolved, record);

    assert!(directory.remove_page(&record.page_id).await.unwrap());
    assert!(!directory.remove_page(&record.page_id).await.unwrap());
    assert!(directory.resolve_public_id("abc-123").await.unwrap().is_none());
}

#[tokio::test]
async fn fs_backend_writes_click_objects() {
    let dir = tempfile::tempdir().unwrap();
    let config = StorageConfig {
        backend: StorageBackend::Fs,
        fs: Some(FsConfig {
            path: dir.path().to_string_lossy().into_owned(),
        }),
        ..StorageConfig::default()
    };

    let handles = init_storage(&config).unwrap();
    let at = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
    let click = ClickEvent::new("link-1", "page-1", "10.0.0.1", None, at).unwrap();
    handles.clicks.persist(&[click]).await.unwrap();

    let partition = dir.path().join("clicks").join("date=2024-03-09");
    let files: Vec<_> = std::fs::read_dir(partition).unwrap().collect();
    assert_eq!(files.len(), 1);

    // Operator for the same root sees the object too
    let op = build_operator(&config).unwrap();
    let listed = op.list_with("clicks/").recursive(true).await.unwrap();
    assert!(listed.iter().any(|e| e.path().ends_with(".jsonl")));
}
