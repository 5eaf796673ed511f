//! Store double that can be switched into an outage.

use crate::application::ports::{
    Clock, Store, StoreError, WindowEntry, WindowOutcome, WindowRequest,
};
use crate::infrastructure::memory_store::MemoryStore;
use crate::infrastructure::mocks::MockClock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Store that delegates to an inner store until told to fail.
///
/// While failing, every operation returns [`StoreError::Unavailable`]
/// without touching the inner store. Every call is counted either way, so
/// tests can assert that an open circuit stopped traffic. Record reads
/// can be failed on their own with [`FailingStore::set_failing_reads`].
///
/// ```
/// use api_throttle::infrastructure::mocks::FailingStore;
/// use api_throttle::application::ports::Store;
///
/// let store = FailingStore::new();
/// assert!(store.counter("k").is_err());
///
/// store.set_failing(false);
/// assert_eq!(store.counter("k").unwrap(), 0);
/// assert_eq!(store.calls(), 2);
/// ```
#[derive(Debug)]
pub struct FailingStore {
    inner: Arc<dyn Store>,
    failing: AtomicBool,
    failing_reads: AtomicBool,
    calls: AtomicU64,
}

impl FailingStore {
    /// A store that fails every call.
    pub fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(MockClock::default());
        Self::wrapping(Arc::new(MemoryStore::new(clock)), true)
    }

    /// Wrap `inner`, starting healthy or failing.
    pub fn wrapping(inner: Arc<dyn Store>, failing: bool) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(failing),
            failing_reads: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only [`Store::get`], leaving every other operation alone.
    pub fn set_failing_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    /// Operations attempted against this store.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn gate(&self) -> Result<&dyn Store, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("simulated outage".to_string()))
        } else {
            Ok(self.inner.as_ref())
        }
    }
}

impl Default for FailingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for FailingStore {
    fn check_and_insert(
        &self,
        key: &str,
        request: &WindowRequest,
    ) -> Result<WindowOutcome, StoreError> {
        self.gate()?.check_and_insert(key, request)
    }

    fn append_to_window(
        &self,
        key: &str,
        score: u64,
        member: &str,
        cutoff: u64,
        ttl_ms: u64,
    ) -> Result<u64, StoreError> {
        self.gate()?
            .append_to_window(key, score, member, cutoff, ttl_ms)
    }

    fn window_entries(
        &self,
        key: &str,
        min_score: u64,
        max_score: u64,
    ) -> Result<Vec<WindowEntry>, StoreError> {
        self.gate()?.window_entries(key, min_score, max_score)
    }

    fn count_window(&self, key: &str, cutoff: u64) -> Result<u64, StoreError> {
        self.gate()?.count_window(key, cutoff)
    }

    fn remove_from_window(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        self.gate()?.remove_from_window(key, member)
    }

    fn increment(&self, key: &str, delta: i64, ttl_ms: u64) -> Result<i64, StoreError> {
        self.gate()?.increment(key, delta, ttl_ms)
    }

    fn counter(&self, key: &str) -> Result<i64, StoreError> {
        self.gate()?.counter(key)
    }

    fn increment_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl_ms: u64,
    ) -> Result<i64, StoreError> {
        self.gate()?.increment_field(key, field, delta, ttl_ms)
    }

    fn field(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        self.gate()?.field(key, field)
    }

    fn fields(&self, key: &str) -> Result<HashMap<String, i64>, StoreError> {
        self.gate()?.fields(key)
    }

    fn add_member(&self, key: &str, member: &str, ttl_ms: u64) -> Result<(), StoreError> {
        self.gate()?.add_member(key, member, ttl_ms)
    }

    fn members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.gate()?.members(key)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let store = self.gate()?;
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated read failure".to_string()));
        }
        store.get(key)
    }

    fn put(&self, key: &str, value: &[u8], ttl_ms: u64) -> Result<(), StoreError> {
        self.gate()?.put(key, value, ttl_ms)
    }

    fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.gate()?.delete(keys)
    }

    fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.gate()?.scan(pattern)
    }
}
