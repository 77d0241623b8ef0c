//! In-process store for development and tests.
//!
//! Behaves like a relational backend would: events referencing a page that
//! does not exist are rejected, and events already stored are skipped.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use linkpage_batch::EventSink;
use linkpage_core::{
    ClickEvent, EventKey, IdentifierLookup, PageDirectory, PageRecord, PersistError, StoreError,
    TelemetryEvent, ViewEvent,
};

#[derive(Debug, Default)]
struct MemoryState {
    /// Keyed by public id
    pages: HashMap<String, PageRecord>,
    public_ids: HashMap<String, String>,
    views: Vec<ViewEvent>,
    clicks: Vec<ClickEvent>,
    seen: HashSet<EventKey>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn views(&self) -> Vec<ViewEvent> {
        self.state.read().views.clone()
    }

    pub fn clicks(&self) -> Vec<ClickEvent> {
        self.state.read().clicks.clone()
    }

    pub fn page_count(&self) -> usize {
        self.state.read().pages.len()
    }

    fn insert_events<E, F>(&self, batch: &[E], rows: F) -> Result<(), PersistError>
    where
        E: TelemetryEvent,
        F: Fn(&mut MemoryState) -> &mut Vec<E>,
    {
        let mut state = self.state.write();
        let mut inserted = 0;
        let mut duplicates = 0;
        let mut orphans = 0;

        for event in batch {
            let key = event.natural_key();
            if state.seen.contains(&key) {
                duplicates += 1;
                continue;
            }
            if !state.public_ids.contains_key(event.page_id()) {
                orphans += 1;
                continue;
            }
            state.seen.insert(key);
            rows(&mut *state).push(event.clone());
            inserted += 1;
        }

        debug!(
            kind = %E::KIND,
            inserted,
            duplicates,
            orphans,
            "Stored event batch in memory"
        );

        if orphans > 0 {
            Err(PersistError::MissingParent { entity: "page" })
        } else if inserted == 0 {
            Err(PersistError::AlreadyPersisted)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventSink<ViewEvent> for MemoryStore {
    async fn persist(&self, batch: &[ViewEvent]) -> Result<(), PersistError> {
        self.insert_events(batch, |state| &mut state.views)
    }
}

#[async_trait]
impl EventSink<ClickEvent> for MemoryStore {
    async fn persist(&self, batch: &[ClickEvent]) -> Result<(), PersistError> {
        self.insert_events(batch, |state| &mut state.clicks)
    }
}

#[async_trait]
impl IdentifierLookup for MemoryStore {
    async fn public_id_exists(&self, candidate: &str) -> Result<bool, StoreError> {
        Ok(self.state.read().pages.contains_key(candidate))
    }
}

#[async_trait]
impl PageDirectory for MemoryStore {
    async fn resolve_public_id(&self, public_id: &str) -> Result<Option<PageRecord>, StoreError> {
        Ok(self.state.read().pages.get(public_id).cloned())
    }

    async fn insert_page(&self, public_id: &str) -> Result<PageRecord, StoreError> {
        let mut state = self.state.write();
        if state.pages.contains_key(public_id) {
            return Err(StoreError::Backend(format!(
                "public id {} is already taken",
                public_id
            )));
        }

        let record = PageRecord::new(public_id);
        state
            .public_ids
            .insert(record.page_id.clone(), public_id.to_string());
        state.pages.insert(public_id.to_string(), record.clone());
        Ok(record)
    }

    async fn remove_page(&self, page_id: &str) -> Result<bool, StoreError> {
        let mut state = self.state.write();
        match state.public_ids.remove(page_id) {
            Some(public_id) => {
                state.pages.remove(&public_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
