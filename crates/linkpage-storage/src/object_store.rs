//! Object-store persistence through OpenDAL.
//!
//! Each event batch becomes one JSON-lines object named by the blake3 hash of
//! its content. Every stored event also leaves a marker at
//! `{kind}/keys/{natural_key}`; events whose marker exists are skipped, so a
//! requeued batch merged with newer events only writes the new ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opendal::{ErrorKind, Operator};
use std::collections::HashSet;
use std::marker::PhantomData;
use tracing::debug;

use linkpage_batch::EventSink;
use linkpage_core::{
    EventKey, IdentifierLookup, PageDirectory, PageRecord, PersistError, StoreError,
    TelemetryEvent,
};

use crate::error::{persist_error, store_error};

pub struct ObjectEventStore<E> {
    operator: Operator,
    prefix: String,
    _marker: PhantomData<fn(E)>,
}

impl<E: TelemetryEvent> ObjectEventStore<E> {
    /// `prefix` is prepended verbatim; pass "" or a value ending in "/".
    pub fn new(operator: Operator, prefix: impl Into<String>) -> Self {
        Self {
            operator,
            prefix: prefix.into(),
            _marker: PhantomData,
        }
    }

    fn key_path(&self, key: &EventKey) -> String {
        format!(
            "{}{}/keys/{}",
            self.prefix,
            E::KIND.collection(),
            key.to_hex()
        )
    }

    /// Events with no marker yet, first occurrence only.
    async fn unseen<'a>(&self, batch: &'a [E]) -> Result<Vec<(&'a E, String)>, PersistError> {
        let mut keys = HashSet::with_capacity(batch.len());
        let mut fresh = Vec::with_capacity(batch.len());
        for event in batch {
            let key = event.natural_key();
            if !keys.insert(key.to_hex()) {
                continue;
            }
            let marker = self.key_path(&key);
            if !self.operator.exists(&marker).await.map_err(persist_error)? {
                fresh.push((event, marker));
            }
        }
        Ok(fresh)
    }

    fn encode<'a>(batch: impl IntoIterator<Item = &'a E>) -> Result<Vec<u8>, PersistError>
    where
        E: 'a,
    {
        let mut body = Vec::new();
        for event in batch {
            serde_json::to_writer(&mut body, event)
                .map_err(|e| PersistError::Fatal(format!("failed to encode event: {}", e)))?;
            body.push(b'\n');
        }
        Ok(body)
    }

    fn object_path(&self, first: DateTime<Utc>, body: &[u8]) -> String {
        format!(
            "{}{}/date={}/{}.jsonl",
            self.prefix,
            E::KIND.collection(),
            first.format("%Y-%m-%d"),
            blake3::hash(body).to_hex()
        )
    }
}

#[async_trait]
impl<E: TelemetryEvent> EventSink<E> for ObjectEventStore<E> {
    async fn persist(&self, batch: &[E]) -> Result<(), PersistError> {
        if batch.is_empty() {
            return Ok(());
        }

        let fresh = self.unseen(batch).await?;
        let skipped = batch.len() - fresh.len();
        let Some((first, _)) = fresh.first() else {
            return Err(PersistError::AlreadyPersisted);
        };

        let body = Self::encode(fresh.iter().map(|(event, _)| *event))?;
        let path = self.object_path(first.occurred_at(), &body);
        let bytes = body.len();

        // Present when a previous attempt wrote the data but not every marker
        if !self.operator.exists(&path).await.map_err(persist_error)? {
            self.operator
                .write(&path, body)
                .await
                .map_err(persist_error)?;
        }

        for (_, marker) in &fresh {
            self.operator
                .write(marker, path.clone().into_bytes())
                .await
                .map_err(persist_error)?;
        }

        debug!(
            kind = %E::KIND,
            path = %path,
            count = fresh.len(),
            skipped,
            bytes,
            "Wrote event batch"
        );
        Ok(())
    }
}

/// Page directory kept as small JSON objects next to the event data.
///
/// `pages/public/{public_id}.json` holds the record; `pages/id/{page_id}`
/// maps back to the public id for deletes.
pub struct ObjectPageDirectory {
    operator: Operator,
    prefix: String,
}

impl ObjectPageDirectory {
    pub fn new(operator: Operator, prefix: impl Into<String>) -> Self {
        Self {
            operator,
            prefix: prefix.into(),
        }
    }

    fn public_path(&self, public_id: &str) -> String {
        format!("{}pages/public/{}.json", self.prefix, public_id)
    }

    fn id_path(&self, page_id: &str) -> String {
        format!("{}pages/id/{}", self.prefix, page_id)
    }

    async fn read_optional(&self, path: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match self.operator.read(path).await {
            Ok(buffer) => Ok(Some(buffer.to_vec())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(store_error(e)),
        }
    }
}

#[async_trait]
impl IdentifierLookup for ObjectPageDirectory {
    async fn public_id_exists(&self, candidate: &str) -> Result<bool, StoreError> {
        self.operator
            .exists(&self.public_path(candidate))
            .await
            .map_err(store_error)
    }
}

#[async_trait]
impl PageDirectory for ObjectPageDirectory {
    async fn resolve_public_id(&self, public_id: &str) -> Result<Option<PageRecord>, StoreError> {
        let Some(bytes) = self.read_optional(&self.public_path(public_id)).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Backend(format!("corrupt page record {}: {}", public_id, e)))
    }

    async fn insert_page(&self, public_id: &str) -> Result<PageRecord, StoreError> {
        if self.public_id_exists(public_id).await? {
            return Err(StoreError::Backend(format!(
                "public id {} is already taken",
                public_id
            )));
        }

        let record = PageRecord::new(public_id);
        let body = serde_json::to_vec(&record)
            .map_err(|e| StoreError::Backend(format!("failed to encode page record: {}", e)))?;

        self.operator
            .write(&self.public_path(public_id), body)
            .await
            .map_err(store_error)?;
        self.operator
            .write(&self.id_path(&record.page_id), public_id.as_bytes().to_vec())
            .await
            .map_err(store_error)?;

        Ok(record)
    }

    async fn remove_page(&self, page_id: &str) -> Result<bool, StoreError> {
        let id_path = self.id_path(page_id);
        let Some(public_id) = self.read_optional(&id_path).await? else {
            return Ok(false);
        };
        let public_id = String::from_utf8_lossy(&public_id).into_owned();

        self.operator
            .delete(&self.public_path(&public_id))
            .await
            .map_err(store_error)?;
        self.operator.delete(&id_path).await.map_err(store_error)?;
        Ok(true)
    }
}
