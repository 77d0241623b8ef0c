//! Telemetry event types shared by the queue, the stores and the server.
//!
//! Events are immutable once built. Construction is the validation boundary:
//! `ViewEvent::new` and `ClickEvent::new` return `None` for malformed input so
//! callers can drop it without ever touching a buffer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The two telemetry categories, each handled by its own queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    View,
    Click,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::View => "view",
            EventKind::Click => "click",
        }
    }

    /// Plural form used for storage paths and table names.
    pub fn collection(&self) -> &'static str {
        match self {
            EventKind::View => "views",
            EventKind::Click => "clicks",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a queue does with a failed batch when reinsertion would overflow its cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the oldest events (the failed batch first), drop the newest.
    #[default]
    KeepOldest,
    /// Keep the newest events, drop from the front of the failed batch.
    KeepNewest,
}

impl std::str::FromStr for OverflowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keep_oldest" | "oldest" => Ok(OverflowPolicy::KeepOldest),
            "keep_newest" | "newest" => Ok(OverflowPolicy::KeepNewest),
            _ => Err(format!(
                "Unsupported overflow policy: {}. Supported: keep_oldest, keep_newest",
                s
            )),
        }
    }
}

/// Natural key of an event, independent of any store-assigned identifier.
///
/// Stores use it for "skip if already present" inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventKey(blake3::Hash);

impl EventKey {
    fn from_parts(kind: EventKind, parts: &[&str], occurred_at: DateTime<Utc>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind.as_str().as_bytes());
        for part in parts {
            // Length prefix keeps ("ab", "c") distinct from ("a", "bc").
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let nanos = occurred_at
            .timestamp_nanos_opt()
            .unwrap_or_else(|| occurred_at.timestamp_micros().saturating_mul(1_000));
        hasher.update(&nanos.to_le_bytes());
        Self(hasher.finalize())
    }

    pub fn to_hex(&self) -> String {
        self.0.to_hex().to_string()
    }
}

/// Behaviour every buffered event type provides to the queue and the stores.
pub trait TelemetryEvent: Clone + fmt::Debug + Send + Sync + Serialize + 'static {
    const KIND: EventKind;

    fn page_id(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn natural_key(&self) -> EventKey;
}

/// A page view recorded on the public page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewEvent {
    page_id: String,
    visitor_address: String,
    session_token: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl ViewEvent {
    /// Build a view event, or `None` when a required field is blank after trimming.
    pub fn new(
        page_id: &str,
        visitor_address: &str,
        session_token: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Option<Self> {
        Some(Self {
            page_id: required(page_id)?,
            visitor_address: required(visitor_address)?,
            session_token: optional(session_token),
            occurred_at,
        })
    }

    pub fn visitor_address(&self) -> &str {
        &self.visitor_address
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl TelemetryEvent for ViewEvent {
    const KIND: EventKind = EventKind::View;

    fn page_id(&self) -> &str {
        &self.page_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn natural_key(&self) -> EventKey {
        EventKey::from_parts(
            Self::KIND,
            &[
                self.page_id.as_str(),
                self.visitor_address.as_str(),
                self.session_token.as_deref().unwrap_or_default(),
            ],
            self.occurred_at,
        )
    }
}

/// A click on one of a page's outbound links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickEvent {
    link_id: String,
    page_id: String,
    visitor_address: String,
    session_token: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl ClickEvent {
    /// Build a click event, or `None` when a required field is blank after trimming.
    pub fn new(
        link_id: &str,
        page_id: &str,
        visitor_address: &str,
        session_token: Option<&str>,
        occurred_at: DateTime<Utc>,
    ) -> Option<Self> {
        Some(Self {
            link_id: required(link_id)?,
            page_id: required(page_id)?,
            visitor_address: required(visitor_address)?,
            session_token: optional(session_token),
            occurred_at,
        })
    }

    pub fn link_id(&self) -> &str {
        &self.link_id
    }

    pub fn visitor_address(&self) -> &str {
        &self.visitor_address
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl TelemetryEvent for ClickEvent {
    const KIND: EventKind = EventKind::Click;

    fn page_id(&self) -> &str {
        &self.page_id
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    fn natural_key(&self) -> EventKey {
        EventKey::from_parts(
            Self::KIND,
            &[
                self.link_id.as_str(),
                self.page_id.as_str(),
                self.visitor_address.as_str(),
                self.session_token.as_deref().unwrap_or_default(),
            ],
            self.occurred_at,
        )
    }
}

fn required(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn optional(value: Option<&str>) -> Option<String> {
    value.and_then(required)
}
