//! Page directory: the mapping between internal page ids and public ids.

use crate::error::StoreError;
use crate::ident::IdentifierLookup;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub page_id: String,
    pub public_id: String,
    pub created_at: DateTime<Utc>,
}

impl PageRecord {
    /// New record with a random v4 page id.
    pub fn new(public_id: impl Into<String>) -> Self {
        Self {
            page_id: uuid::Uuid::new_v4().to_string(),
            public_id: public_id.into(),
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait PageDirectory: IdentifierLookup {
    async fn resolve_public_id(&self, public_id: &str) -> Result<Option<PageRecord>, StoreError>;

    /// Fails with `StoreError::Backend` if `public_id` is already taken.
    async fn insert_page(&self, public_id: &str) -> Result<PageRecord, StoreError>;

    /// Returns `false` when no page had that id.
    async fn remove_page(&self, page_id: &str) -> Result<bool, StoreError>;
}
