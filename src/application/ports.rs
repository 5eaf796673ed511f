//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.
//!
//! Two ports exist:
//! - [`Clock`]: wall-clock time in epoch milliseconds, shared by every engine
//!   instance talking to the same store.
//! - [`Store`]: the shared key space holding windows, counters, hashes, sets
//!   and serialized records. The in-memory adapter backs single-process
//!   deployments and tests; the Redis adapter backs horizontally scaled ones.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

/// Port for obtaining current time.
///
/// Time is expressed as milliseconds since the Unix epoch so that several
/// stateless instances agree on window boundaries stored in a shared store.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_millis(&self) -> u64 {
        (**self).now_millis()
    }
}

/// Error returned by a [`Store`] adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing service could not be reached or rejected the command
    Unavailable(String),
    /// A key held a value of a different shape than the operation expects
    WrongType {
        /// Offending key
        key: String,
    },
    /// A stored record could not be encoded or decoded
    Codec(String),
    /// The circuit breaker is open and the store was not contacted
    CircuitOpen,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Unavailable(reason) => write!(f, "store unavailable: {}", reason),
            StoreError::WrongType { key } => {
                write!(f, "key '{}' holds a value of the wrong type", key)
            }
            StoreError::Codec(reason) => write!(f, "record codec error: {}", reason),
            StoreError::CircuitOpen => write!(f, "store circuit is open"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Codec(e.to_string())
    }
}

/// Parameters of one atomic sliding-window check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRequest {
    /// Current time in epoch milliseconds
    pub now_ms: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Maximum number of entries allowed inside the window
    pub limit: u64,
    /// Unique member recorded when the request is admitted
    pub member: String,
}

/// Result of an atomic sliding-window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Whether the entry was inserted
    pub allowed: bool,
    /// Entries in the window after the operation
    pub count: u64,
    /// Score of the oldest entry still inside the window, if any
    pub oldest_ms: Option<u64>,
}

/// A single scored member of an ordered window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    /// Timestamp score in epoch milliseconds
    pub score: u64,
    /// Member payload
    pub member: String,
}

/// TTL for keys that must stay until they are deleted explicitly.
pub const NO_EXPIRY: u64 = 0;

/// Port for the shared key space.
///
/// Every method is a single logical operation against the backing store.
/// Adapters must make [`Store::check_and_insert`] atomic: prune, count and
/// conditional insert happen as one unit with respect to concurrent callers
/// on the same key.
///
/// TTLs are relative milliseconds and are refreshed by every write that
/// carries one. A TTL of [`NO_EXPIRY`] leaves the key without expiry. Glob patterns passed to [`Store::scan`] use `*` as the only
/// wildcard; `\` escapes the next character.
pub trait Store: Send + Sync + Debug {
    /// Drop window entries with score `<= now - window`, count the rest and
    /// insert `member` at score `now` when the count is below `limit`.
    fn check_and_insert(&self, key: &str, request: &WindowRequest)
        -> Result<WindowOutcome, StoreError>;

    /// Unconditionally append a member, dropping entries with score
    /// `<= cutoff` first. Returns the resulting entry count.
    fn append_to_window(
        &self,
        key: &str,
        score: u64,
        member: &str,
        cutoff: u64,
        ttl_ms: u64,
    ) -> Result<u64, StoreError>;

    /// Entries with `min_score <= score <= max_score`, oldest first.
    fn window_entries(
        &self,
        key: &str,
        min_score: u64,
        max_score: u64,
    ) -> Result<Vec<WindowEntry>, StoreError>;

    /// Number of entries with score `> cutoff`.
    fn count_window(&self, key: &str, cutoff: u64) -> Result<u64, StoreError>;

    /// Remove one member from a window. Returns whether it was present.
    fn remove_from_window(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Add `delta` to an integer counter, creating it at zero.
    fn increment(&self, key: &str, delta: i64, ttl_ms: u64) -> Result<i64, StoreError>;

    /// Current value of an integer counter, zero when absent.
    fn counter(&self, key: &str) -> Result<i64, StoreError>;

    /// Add `delta` to one integer field of a hash.
    fn increment_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl_ms: u64,
    ) -> Result<i64, StoreError>;

    /// One field of a hash.
    fn field(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError>;

    /// All fields of a hash.
    fn fields(&self, key: &str) -> Result<HashMap<String, i64>, StoreError>;

    /// Add a member to an unordered set.
    fn add_member(&self, key: &str, member: &str, ttl_ms: u64) -> Result<(), StoreError>;

    /// All members of an unordered set.
    fn members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Read a serialized record.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write a serialized record.
    fn put(&self, key: &str, value: &[u8], ttl_ms: u64) -> Result<(), StoreError>;

    /// Delete keys. Returns how many existed.
    fn delete(&self, keys: &[String]) -> Result<u64, StoreError>;

    /// Keys matching a glob pattern.
    fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn check_and_insert(
        &self,
        key: &str,
        request: &WindowRequest,
    ) -> Result<WindowOutcome, StoreError> {
        (**self).check_and_insert(key, request)
    }

    fn append_to_window(
        &self,
        key: &str,
        score: u64,
        member: &str,
        cutoff: u64,
        ttl_ms: u64,
    ) -> Result<u64, StoreError> {
        (**self).append_to_window(key, score, member, cutoff, ttl_ms)
    }

    fn window_entries(
        &self,
        key: &str,
        min_score: u64,
        max_score: u64,
    ) -> Result<Vec<WindowEntry>, StoreError> {
        (**self).window_entries(key, min_score, max_score)
    }

    fn count_window(&self, key: &str, cutoff: u64) -> Result<u64, StoreError> {
        (**self).count_window(key, cutoff)
    }

    fn remove_from_window(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        (**self).remove_from_window(key, member)
    }

    fn increment(&self, key: &str, delta: i64, ttl_ms: u64) -> Result<i64, StoreError> {
        (**self).increment(key, delta, ttl_ms)
    }

    fn counter(&self, key: &str) -> Result<i64, StoreError> {
        (**self).counter(key)
    }

    fn increment_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl_ms: u64,
    ) -> Result<i64, StoreError> {
        (**self).increment_field(key, field, delta, ttl_ms)
    }

    fn field(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        (**self).field(key, field)
    }

    fn fields(&self, key: &str) -> Result<HashMap<String, i64>, StoreError> {
        (**self).fields(key)
    }

    fn add_member(&self, key: &str, member: &str, ttl_ms: u64) -> Result<(), StoreError> {
        (**self).add_member(key, member, ttl_ms)
    }

    fn members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        (**self).members(key)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8], ttl_ms: u64) -> Result<(), StoreError> {
        (**self).put(key, value, ttl_ms)
    }

    fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        (**self).delete(keys)
    }

    fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        (**self).scan(pattern)
    }
}
