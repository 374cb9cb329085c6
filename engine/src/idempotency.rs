//! Idempotency keys.
//!
//! A key is generated exactly once, when an entry is enqueued, and travels with
//! every submission of that entry. The remote keeps a uniqueness constraint on
//! it, which turns a replay of an already committed write into an
//! "already applied" answer instead of a second application.

use crate::{error::Result, Error};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable identifier attached to a queued mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    const MAX_LENGTH: usize = 128;

    /// Generate a fresh key with 122 bits of randomness.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse a key read back from storage or the wire.
    pub fn parse(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(Error::InvalidIdempotencyKey("key cannot be empty".into()));
        }
        if value.len() > Self::MAX_LENGTH {
            return Err(Error::InvalidIdempotencyKey(format!(
                "key exceeds {} characters",
                Self::MAX_LENGTH
            )));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::InvalidIdempotencyKey(format!(
                "key contains invalid characters: {value}"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
