// linkpage-core - Shared primitives for the analytics ingestion pipeline
//
// Everything here is runtime-agnostic: event types and their boundary validation,
// the typed persistence outcome returned by stores, the transient-retry wrapper
// used on read paths, and the public identifier generator used at page creation.

pub mod directory;
pub mod error;
pub mod ident;
pub mod retry;
pub mod types;

pub use directory::{PageDirectory, PageRecord};
pub use error::{PersistError, StoreError};
pub use ident::{
    IdError, IdentifierLookup, PublicIdGenerator, MAX_GENERATION_ATTEMPTS, PUBLIC_ID_ALPHABET,
    PUBLIC_ID_LENGTH,
};
pub use retry::{
    message_is_transient, with_transient_retry, RetryError, RetryPolicy, TransientFailure,
};
pub use types::{ClickEvent, EventKey, EventKind, OverflowPolicy, TelemetryEvent, ViewEvent};
