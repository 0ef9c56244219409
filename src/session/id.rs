//! Session and owner identifier types.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::SessionKind;
use crate::error::SessionError;

/// Maximum accepted length of a session ID.
pub const MAX_ID_LEN: usize = 128;

/// Global counter for owner ID generation.
static OWNER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifier of a session.
///
/// IDs are opaque strings chosen by the caller or generated as
/// `<prefix>-<uuid>`. They are unique only among concurrently live
/// sessions; a closed session's ID may be reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a caller-supplied ID.
    pub fn parse(raw: impl Into<String>) -> Result<Self, SessionError> {
        let raw = raw.into();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_ID_LEN
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'));
        if valid {
            Ok(Self(raw))
        } else {
            Err(SessionError::InvalidId(raw))
        }
    }

    /// Generate a fresh ID for a session of the given kind.
    pub fn generate(kind: SessionKind) -> Self {
        Self(format!("{}-{}", kind.id_prefix(), uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::parse(raw).map_err(serde::de::Error::custom)
    }
}

/// Identifier of the connection (window) that owns sessions.
///
/// Generated from an atomic counter, unique within a process lifetime.
/// Displayed as `owner-XXXXXXXX`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "String")]
pub struct OwnerId(u64);

impl OwnerId {
    /// Allocate a new unique owner ID.
    pub fn new() -> Self {
        Self(OWNER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Create an OwnerId from a raw value, for tests and diagnostics.
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner-{:08x}", self.0)
    }
}

impl From<OwnerId> for String {
    fn from(id: OwnerId) -> Self {
        id.to_string()
    }
}
