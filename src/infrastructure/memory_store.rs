//! In-process store backed by a sharded concurrent map.
//!
//! Mirrors the subset of Redis semantics the engine relies on: ordered
//! windows, integer counters, integer hashes, sets and opaque blobs, each
//! with an optional expiry. Expired keys are dropped lazily on access and in
//! bulk by [`MemoryStore::purge_expired`].

use crate::application::ports::{
    Clock, Store, StoreError, WindowEntry, WindowOutcome, WindowRequest, NO_EXPIRY,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Value {
    /// Ordered by (score, member); members are unique per key
    Window(BTreeSet<(u64, String)>),
    Counter(i64),
    Hash(HashMap<String, i64>),
    Set(HashSet<String>),
    Blob(Vec<u8>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Window(w) => w.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::Counter(_) | Value::Blob(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<u64>,
}

impl Slot {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_ms)
    }
}

/// Thread-safe store backed by DashMap.
///
/// DashMap shards keys across independently locked buckets, so operations
/// on one key hold only that key's shard lock. Every [`Store`] method runs
/// under a single entry guard, which makes window check-and-insert atomic.
#[derive(Debug)]
pub struct MemoryStore {
    map: DashMap<String, Slot>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store reading expiry time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            map: DashMap::new(),
            clock,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now_millis();
        self.map.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.map.clear();
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.map.len();
        self.map.retain(|_, slot| !slot.is_expired(now));
        before.saturating_sub(self.map.len())
    }

    /// Run `f` on the live value at `key`, creating it with `create` when
    /// absent or expired. The shard lock is held for the whole call.
    fn update<R>(
        &self,
        key: &str,
        ttl_ms: Option<u64>,
        create: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> Option<R>,
    ) -> Result<R, StoreError> {
        let now = self.clock.now_millis();
        let result = {
            let mut slot = match self.map.entry(key.to_string()) {
                Entry::Occupied(occupied) => {
                    let mut slot = occupied.into_ref();
                    if slot.is_expired(now) {
                        *slot = Slot {
                            value: create(),
                            expires_at: None,
                        };
                    }
                    slot
                }
                Entry::Vacant(vacant) => vacant.insert(Slot {
                    value: create(),
                    expires_at: None,
                }),
            };
            let result = f(&mut slot.value).ok_or_else(|| StoreError::WrongType {
                key: key.to_string(),
            })?;
            if let Some(ttl) = ttl_ms {
                slot.expires_at = deadline(now, ttl);
            }
            result
        };
        self.map
            .remove_if(key, |_, slot| slot.value.is_empty());
        Ok(result)
    }

    /// Read the live value at `key` without creating it.
    fn read<R>(
        &self,
        key: &str,
        f: impl FnOnce(&Value) -> Option<R>,
    ) -> Result<Option<R>, StoreError> {
        let now = self.clock.now_millis();
        match self.map.get(key) {
            Some(slot) if !slot.is_expired(now) => f(&slot.value)
                .map(Some)
                .ok_or_else(|| StoreError::WrongType {
                    key: key.to_string(),
                }),
            _ => Ok(None),
        }
    }
}

fn deadline(now: u64, ttl_ms: u64) -> Option<u64> {
    (ttl_ms != NO_EXPIRY).then(|| now.saturating_add(ttl_ms))
}

fn prune(window: &mut BTreeSet<(u64, String)>, cutoff: u64) {
    // Everything scored at or below cutoff sorts before (cutoff + 1, "")
    let keep = window.split_off(&(cutoff.saturating_add(1), String::new()));
    *window = keep;
}

impl Store for MemoryStore {
    fn check_and_insert(
        &self,
        key: &str,
        request: &WindowRequest,
    ) -> Result<WindowOutcome, StoreError> {
        let cutoff = request.now_ms.saturating_sub(request.window_ms);
        self.update(
            key,
            Some(request.window_ms),
            || Value::Window(BTreeSet::new()),
            |value| match value {
                Value::Window(window) => {
                    prune(window, cutoff);
                    let allowed = (window.len() as u64) < request.limit;
                    if allowed {
                        window.insert((request.now_ms, request.member.clone()));
                    }
                    Some(WindowOutcome {
                        allowed,
                        count: window.len() as u64,
                        oldest_ms: window.first().map(|(score, _)| *score),
                    })
                }
                _ => None,
            },
        )
    }

    fn append_to_window(
        &self,
        key: &str,
        score: u64,
        member: &str,
        cutoff: u64,
        ttl_ms: u64,
    ) -> Result<u64, StoreError> {
        self.update(
            key,
            Some(ttl_ms),
            || Value::Window(BTreeSet::new()),
            |value| match value {
                Value::Window(window) => {
                    prune(window, cutoff);
                    window.insert((score, member.to_string()));
                    Some(window.len() as u64)
                }
                _ => None,
            },
        )
    }

    fn window_entries(
        &self,
        key: &str,
        min_score: u64,
        max_score: u64,
    ) -> Result<Vec<WindowEntry>, StoreError> {
        Ok(self
            .read(key, |value| match value {
                Value::Window(window) => Some(
                    window
                        .iter()
                        .filter(|(score, _)| (min_score..=max_score).contains(score))
                        .map(|(score, member)| WindowEntry {
                            score: *score,
                            member: member.clone(),
                        })
                        .collect(),
                ),
                _ => None,
            })?
            .unwrap_or_default())
    }

    fn count_window(&self, key: &str, cutoff: u64) -> Result<u64, StoreError> {
        Ok(self
            .read(key, |value| match value {
                Value::Window(window) => {
                    Some(window.iter().filter(|(score, _)| *score > cutoff).count() as u64)
                }
                _ => None,
            })?
            .unwrap_or(0))
    }

    fn remove_from_window(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        if self.read(key, |_| Some(()))?.is_none() {
            return Ok(false);
        }
        self.update(
            key,
            None,
            || Value::Window(BTreeSet::new()),
            |value| match value {
                Value::Window(window) => {
                    let found = window.iter().find(|(_, m)| m == member).cloned();
                    Some(found.map(|entry| window.remove(&entry)).unwrap_or(false))
                }
                _ => None,
            },
        )
    }

    fn increment(&self, key: &str, delta: i64, ttl_ms: u64) -> Result<i64, StoreError> {
        self.update(
            key,
            Some(ttl_ms),
            || Value::Counter(0),
            |value| match value {
                Value::Counter(n) => {
                    *n += delta;
                    Some(*n)
                }
                _ => None,
            },
        )
    }

    fn counter(&self, key: &str) -> Result<i64, StoreError> {
        Ok(self
            .read(key, |value| match value {
                Value::Counter(n) => Some(*n),
                _ => None,
            })?
            .unwrap_or(0))
    }

    fn increment_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl_ms: u64,
    ) -> Result<i64, StoreError> {
        self.update(
            key,
            Some(ttl_ms),
            || Value::Hash(HashMap::new()),
            |value| match value {
                Value::Hash(hash) => {
                    let n = hash.entry(field.to_string()).or_insert(0);
                    *n += delta;
                    Some(*n)
                }
                _ => None,
            },
        )
    }

    fn field(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        Ok(self
            .read(key, |value| match value {
                Value::Hash(hash) => Some(hash.get(field).copied()),
                _ => None,
            })?
            .flatten())
    }

    fn fields(&self, key: &str) -> Result<HashMap<String, i64>, StoreError> {
        Ok(self
            .read(key, |value| match value {
                Value::Hash(hash) => Some(hash.clone()),
                _ => None,
            })?
            .unwrap_or_default())
    }

    fn add_member(&self, key: &str, member: &str, ttl_ms: u64) -> Result<(), StoreError> {
        self.update(
            key,
            Some(ttl_ms),
            || Value::Set(HashSet::new()),
            |value| match value {
                Value::Set(set) => {
                    set.insert(member.to_string());
                    Some(())
                }
                _ => None,
            },
        )
    }

    fn members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .read(key, |value| match value {
                Value::Set(set) => Some(set.iter().cloned().collect()),
                _ => None,
            })?
            .unwrap_or_default())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(key, |value| match value {
            Value::Blob(bytes) => Some(bytes.clone()),
            _ => None,
        })
    }

    fn put(&self, key: &str, value: &[u8], ttl_ms: u64) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        self.map.insert(
            key.to_string(),
            Slot {
                value: Value::Blob(value.to_vec()),
                expires_at: deadline(now, ttl_ms),
            },
        );
        Ok(())
    }

    fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let now = self.clock.now_millis();
        Ok(keys
            .iter()
            .filter_map(|key| self.map.remove(key))
            .filter(|(_, slot)| !slot.is_expired(now))
            .count() as u64)
    }

    fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now_millis();
        let pattern = parse_glob(pattern);
        Ok(self
            .map
            .iter()
            .filter(|entry| !entry.is_expired(now) && glob_matches(&pattern, entry.key()))
            .map(|entry| entry.key().clone())
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GlobToken {
    Any,
    Literal(char),
}

fn parse_glob(pattern: &str) -> Vec<GlobToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => tokens.push(GlobToken::Any),
            '\\' => tokens.push(GlobToken::Literal(chars.next().unwrap_or('\\'))),
            other => tokens.push(GlobToken::Literal(other)),
        }
    }
    tokens
}

/// Iterative wildcard match with single-star backtracking.
fn glob_matches(pattern: &[GlobToken], text: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(GlobToken::Literal(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            Some(GlobToken::Any) => {
                star = Some((p, t));
                p += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|token| *token == GlobToken::Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use std::thread;

    fn store() -> (MemoryStore, MockClock) {
        let clock = MockClock::new(1_000_000);
        (MemoryStore::new(Arc::new(clock.clone())), clock)
    }

    fn request(now_ms: u64, limit: u64, member: &str) -> WindowRequest {
        WindowRequest {
            now_ms,
            window_ms: 1_000,
            limit,
            member: member.to_string(),
        }
    }

    #[test]
    fn test_check_and_insert_limits() {
        let (store, _) = store();
        for i in 0..3 {
            let outcome = store.check_and_insert("w", &request(1_000_000, 3, &i.to_string())).unwrap();
            assert!(outcome.allowed);
            assert_eq!(outcome.count, i + 1);
        }
        let denied = store.check_and_insert("w", &request(1_000_000, 3, "x")).unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.count, 3);
        assert_eq!(denied.oldest_ms, Some(1_000_000));
    }

    #[test]
    fn test_window_prunes_at_boundary() {
        let (store, _) = store();
        store.check_and_insert("w", &request(1_000_000, 1, "a")).unwrap();
        // Exactly one window later the old entry is pruned
        let outcome = store.check_and_insert("w", &request(1_001_000, 1, "b")).unwrap();
        assert!(outcome.allowed);
        assert_eq!(outcome.oldest_ms, Some(1_001_000));
    }

    #[test]
    fn test_concurrent_check_and_insert_is_atomic() {
        let (store, _) = store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    (0..50)
                        .filter(|i| {
                            store
                                .check_and_insert("w", &request(1_000_000, 100, &format!("{t}-{i}")))
                                .unwrap()
                                .allowed
                        })
                        .count()
                })
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
    }

    #[test]
    fn test_ttl_expiry() {
        let (store, clock) = store();
        store.increment("c", 5, 1_000).unwrap();
        assert_eq!(store.counter("c").unwrap(), 5);
        clock.advance_ms(1_000);
        assert_eq!(store.counter("c").unwrap(), 0);
        assert_eq!(store.increment("c", 1, 1_000).unwrap(), 1);
        clock.advance_ms(5_000);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_no_expiry_keeps_key() {
        let (store, clock) = store();
        store.put("r", b"x", NO_EXPIRY).unwrap();
        store.append_to_window("w", 5, "m", 0, NO_EXPIRY).unwrap();
        clock.advance_ms(365 * 24 * 3_600_000);
        assert_eq!(store.purge_expired(), 0);
        assert_eq!(store.get("r").unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.count_window("w", 0).unwrap(), 1);

        // A later write with a TTL puts the key back on a clock
        store.put("r", b"y", 1_000).unwrap();
        clock.advance_ms(1_000);
        assert_eq!(store.get("r").unwrap(), None);
    }

    #[test]
    fn test_wrong_type() {
        let (store, _) = store();
        store.increment("k", 1, 10_000).unwrap();
        assert_eq!(
            store.add_member("k", "m", 10_000),
            Err(StoreError::WrongType { key: "k".to_string() })
        );
        assert!(store.get("k").is_err());
    }

    #[test]
    fn test_hash_and_set() {
        let (store, _) = store();
        store.increment_field("h", "a", 2, 10_000).unwrap();
        store.increment_field("h", "a", 3, 10_000).unwrap();
        store.increment_field("h", "b", 1, 10_000).unwrap();
        assert_eq!(store.field("h", "a").unwrap(), Some(5));
        assert_eq!(store.field("h", "zzz").unwrap(), None);
        assert_eq!(store.fields("h").unwrap().len(), 2);

        store.add_member("s", "x", 10_000).unwrap();
        store.add_member("s", "x", 10_000).unwrap();
        assert_eq!(store.members("s").unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn test_remove_from_window_drops_empty_key() {
        let (store, _) = store();
        store.append_to_window("w", 5, "m", 0, 10_000).unwrap();
        assert!(store.remove_from_window("w", "m").unwrap());
        assert!(!store.remove_from_window("w", "m").unwrap());
        assert!(store.scan("w").unwrap().is_empty());
    }

    #[test]
    fn test_window_entries_range() {
        let (store, _) = store();
        for score in [10, 20, 30] {
            store
                .append_to_window("w", score, &score.to_string(), 0, 10_000)
                .unwrap();
        }
        let entries = store.window_entries("w", 15, 30).unwrap();
        assert_eq!(entries.iter().map(|e| e.score).collect::<Vec<_>>(), vec![20, 30]);
        assert_eq!(store.count_window("w", 10).unwrap(), 2);
    }

    #[test]
    fn test_scan_and_delete() {
        let (store, _) = store();
        store.put("ns:rl:rl:ip:1:GET /a", b"x", 10_000).unwrap();
        store.put("ns:rl:rl:ip:12:GET /a", b"x", 10_000).unwrap();
        store.put("ns:rl:rl:user:*:GET /a", b"x", 10_000).unwrap();

        let mut keys = store.scan("ns:rl:*ip:1*").unwrap();
        keys.sort();
        assert_eq!(keys.len(), 2);

        assert_eq!(store.scan("ns:rl:*user:\\**").unwrap().len(), 1);
        assert_eq!(store.delete(&keys).unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_glob_matching() {
        let m = |p: &str, t: &str| glob_matches(&parse_glob(p), t);
        assert!(m("a*c", "abbbc"));
        assert!(m("*", ""));
        assert!(m("a*b*c", "aXbYbZc"));
        assert!(!m("a*c", "abcd"));
        assert!(m("a\\*c", "a*c"));
        assert!(!m("a\\*c", "abc"));
        assert!(m("a?c", "a?c"));
    }
}
