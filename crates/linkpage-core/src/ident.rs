//! Short public identifiers for pages.
//!
//! Identifiers are drawn from the OS CSPRNG and checked for uniqueness against
//! the store. On collision a fresh candidate is rolled, up to a fixed number of
//! attempts.

use crate::error::StoreError;
use async_trait::async_trait;
use rand::rngs::{OsRng, SmallRng};
use rand::{RngCore, SeedableRng};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, warn};

/// Characters a public identifier may contain.
pub const PUBLIC_ID_ALPHABET: &[u8; 37] = b"abcdefghijklmnopqrstuvwxyz0123456789-";

pub const PUBLIC_ID_LENGTH: usize = 21;

pub const MAX_GENERATION_ATTEMPTS: u32 = 10;

// Smallest all-ones mask covering the alphabet indices.
const INDEX_MASK: u8 = 63;

#[derive(Debug, Error)]
pub enum IdError {
    #[error("could not generate a unique public id after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },

    #[error("public id lookup failed: {0}")]
    Lookup(#[from] StoreError),
}

/// Existence check used to reject colliding candidates.
#[async_trait]
pub trait IdentifierLookup: Send + Sync {
    async fn public_id_exists(&self, candidate: &str) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, Copy)]
pub struct PublicIdGenerator {
    length: usize,
    max_attempts: u32,
}

impl Default for PublicIdGenerator {
    fn default() -> Self {
        Self {
            length: PUBLIC_ID_LENGTH,
            max_attempts: MAX_GENERATION_ATTEMPTS,
        }
    }
}

impl PublicIdGenerator {
    pub fn new(length: usize, max_attempts: u32) -> Self {
        Self {
            length,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Produce one candidate without checking the store.
    pub fn generate(&self) -> String {
        let mut id = String::with_capacity(self.length);
        let mut bytes = [0u8; 64];

        while id.len() < self.length {
            fill_random(&mut bytes);
            for byte in bytes {
                // Rejection sampling keeps the distribution uniform over 37 symbols
                let index = (byte & INDEX_MASK) as usize;
                if index < PUBLIC_ID_ALPHABET.len() {
                    id.push(PUBLIC_ID_ALPHABET[index] as char);
                    if id.len() == self.length {
                        break;
                    }
                }
            }
        }

        id
    }

    /// Generate a candidate that the lookup reports as unused.
    pub async fn generate_unique<L>(&self, lookup: &L) -> Result<String, IdError>
    where
        L: IdentifierLookup + ?Sized,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = self.generate();
            if !lookup.public_id_exists(&candidate).await? {
                return Ok(candidate);
            }
            debug!(attempt, "Public id collision, regenerating");
        }

        warn!(
            attempts = self.max_attempts,
            "Exhausted public id generation attempts"
        );
        Err(IdError::GenerationExhausted {
            attempts: self.max_attempts,
        })
    }
}

fn fill_random(buf: &mut [u8]) {
    if let Err(e) = OsRng.try_fill_bytes(buf) {
        warn!(error = %e, "OS random source unavailable, using seeded fallback");
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        SmallRng::seed_from_u64(seed).fill_bytes(buf);
    }
}
