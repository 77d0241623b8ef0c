use chrono::Utc;
use linkpage_batch::EventSink;
use linkpage_core::{
    ClickEvent, IdentifierLookup, PageDirectory, PersistError, PublicIdGenerator, ViewEvent,
};
use linkpage_storage::MemoryStore;

#[tokio::test]
async fn views_for_existing_pages_are_stored() {
    let store = MemoryStore::new();
    let page = store.insert_page("pub-1").await.unwrap();

    let batch = vec![
        ViewEvent::new(&page.page_id, "10.0.0.1", None, Utc::now()).unwrap(),
        ViewEvent::new(&page.page_id, "10.0.0.2", None, Utc::now()).unwrap(),
    ];
    store.persist(batch.as_slice()).await.unwrap();

    assert_eq!(store.views(), batch);
}

#[tokio::test]
async fn duplicate_batch_is_skipped() {
    let store = MemoryStore::new();
    let page = store.insert_page("pub-1").await.unwrap();
    let batch = vec![ViewEvent::new(&page.page_id, "10.0.0.1", None, Utc::now()).unwrap()];

    store.persist(batch.as_slice()).await.unwrap();
    let err = store.persist(batch.as_slice()).await.unwrap_err();

    assert!(matches!(err, PersistError::AlreadyPersisted));
    assert_eq!(store.views().len(), 1);
}

#[tokio::test]
async fn deleted_page_reports_missing_parent() {
    let store = MemoryStore::new();
    let kept = store.insert_page("kept").await.unwrap();
    let gone = store.insert_page("gone").await.unwrap();
    assert!(store.remove_page(&gone.page_id).await.unwrap());

    let batch = vec![
        ClickEvent::new("link-1", &kept.page_id, "10.0.0.1", None, Utc::now()).unwrap(),
        ClickEvent::new("link-2", &gone.page_id, "10.0.0.1", None, Utc::now()).unwrap(),
    ];
    let err = store.persist(batch.as_slice()).await.unwrap_err();

    assert!(matches!(err, PersistError::MissingParent { entity: "page" }));
    assert!(err.is_ignorable());
    // Valid rows still land
    assert_eq!(store.clicks().len(), 1);
    assert_eq!(store.clicks()[0].link_id(), "link-1");
}

#[tokio::test]
async fn generated_ids_are_unique_in_store() {
    let store = MemoryStore::new();
    let generator = PublicIdGenerator::default();

    for _ in 0..20 {
        let id = generator.generate_unique(&store).await.unwrap();
        store.insert_page(&id).await.unwrap();
    }

    assert_eq!(store.page_count(), 20);
    assert!(!store.public_id_exists("not-there").await.unwrap());
}
