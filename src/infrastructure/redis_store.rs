//! Redis-backed store implementation.
//!
//! Provides a shared store using Redis, so that any number of stateless
//! engine instances enforce the same windows, penalties and bans.
//!
//! ## Data model
//!
//! | Store shape | Redis type | Commands |
//! |-------------|------------|----------|
//! | window      | sorted set (score = epoch ms) | Lua script, ZADD, ZRANGEBYSCORE, ZCOUNT, ZREM |
//! | counter     | string integer | INCRBY, GET |
//! | hash        | hash of integers | HINCRBY, HGET, HGETALL |
//! | set         | set | SADD, SMEMBERS |
//! | record      | string (bincode) | GET, SET PX |
//!
//! Every write that carries a TTL refreshes it with PEXPIRE in the same
//! MULTI block. The window check runs as a single Lua script, which makes
//! prune, count and conditional insert atomic across instances.
//!
//! ## Runtime
//!
//! The [`Store`] port is synchronous. Inside a multi-threaded tokio runtime
//! calls run through `block_in_place`; outside any runtime a temporary one
//! is created. A current-thread runtime cannot block in place, and the
//! resulting panic is contained by the engine's guard and treated as a
//! store failure.
//!
//! ## Example
//!
//! ```rust,ignore
//! use api_throttle::{EngineBuilder, RedisStore, Settings};
//! use std::sync::Arc;
//!
//! #[tokio::main(flavor = "multi_thread")]
//! async fn main() {
//!     let store = RedisStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let engine = EngineBuilder::new()
//!         .with_settings(Settings::default())
//!         .with_store(Arc::new(store))
//!         .build()
//!         .unwrap();
//! }
//! ```

use crate::application::ports::{
    Store, StoreError, WindowEntry, WindowOutcome, WindowRequest, NO_EXPIRY,
};
use crate::domain::keys::escape_glob;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError, RedisResult, Script};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;

const WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
  redis.call('ZADD', key, now, ARGV[4])
  count = count + 1
  allowed = 1
end
if count > 0 then
  redis.call('PEXPIRE', key, window)
end

local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
local oldest_ms = -1
if oldest[2] then
  oldest_ms = tonumber(oldest[2])
end
return {allowed, count, oldest_ms}
"#;

/// Configuration for Redis storage.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prepended to every key (default: empty, the engine namespace
    /// already prefixes its keys)
    pub key_prefix: String,
    /// COUNT hint for SCAN iterations (default: 100)
    pub scan_count: usize,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            scan_count: 100,
        }
    }
}

/// Redis-backed store for distributed rate limiting.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    window_script: Script,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self {
            connection,
            window_script: Script::new(WINDOW_SCRIPT),
            config,
        })
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Drive `fut` to completion from synchronous code.
    fn run<T, F>(&self, key: &str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        let result = if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tokio::task::block_in_place(|| handle.block_on(fut))
        } else {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| StoreError::Unavailable(format!("tokio runtime: {}", e)))?;
            rt.block_on(fut)
        };
        result.map_err(|e| map_error(key, e))
    }
}

fn map_error(key: &str, e: RedisError) -> StoreError {
    if e.code() == Some("WRONGTYPE") {
        StoreError::WrongType {
            key: key.to_string(),
        }
    } else {
        StoreError::Unavailable(e.to_string())
    }
}

/// Millisecond expiry to apply, `None` for keys that must persist.
fn expiry(ttl_ms: u64) -> Option<u64> {
    (ttl_ms != NO_EXPIRY).then_some(ttl_ms)
}

/// Queue the expiry refresh for `key`. PEXPIRE rejects zero, so keys
/// without expiry get PERSIST instead.
fn expire<'a>(pipe: &'a mut redis::Pipeline, key: &str, ttl_ms: u64) -> &'a mut redis::Pipeline {
    match expiry(ttl_ms) {
        Some(ttl) => pipe.cmd("PEXPIRE").arg(key).arg(ttl).ignore(),
        None => pipe.cmd("PERSIST").arg(key).ignore(),
    }
}

impl Store for RedisStore {
    fn check_and_insert(
        &self,
        key: &str,
        request: &WindowRequest,
    ) -> Result<WindowOutcome, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        let (allowed, count, oldest): (i64, u64, i64) = self.run(key, async {
            self.window_script
                .key(&redis_key)
                .arg(request.now_ms)
                .arg(request.window_ms)
                .arg(request.limit)
                .arg(&request.member)
                .invoke_async(&mut conn)
                .await
        })?;

        Ok(WindowOutcome {
            allowed: allowed == 1,
            count,
            oldest_ms: u64::try_from(oldest).ok(),
        })
    }

    fn append_to_window(
        &self,
        key: &str,
        score: u64,
        member: &str,
        cutoff: u64,
        ttl_ms: u64,
    ) -> Result<u64, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&redis_key)
            .arg("-inf")
            .arg(cutoff)
            .ignore()
            .cmd("ZADD")
            .arg(&redis_key)
            .arg(score)
            .arg(member)
            .ignore();
        expire(&mut pipe, &redis_key, ttl_ms)
            .cmd("ZCARD")
            .arg(&redis_key);
        let (count,): (u64,) = self.run(key, async { pipe.query_async(&mut conn).await })?;
        Ok(count)
    }

    fn window_entries(
        &self,
        key: &str,
        min_score: u64,
        max_score: u64,
    ) -> Result<Vec<WindowEntry>, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        let raw: Vec<(String, f64)> = self.run(key, async {
            redis::cmd("ZRANGEBYSCORE")
                .arg(&redis_key)
                .arg(min_score)
                .arg(max_score)
                .arg("WITHSCORES")
                .query_async(&mut conn)
                .await
        })?;

        Ok(raw
            .into_iter()
            .map(|(member, score)| WindowEntry {
                score: score as u64,
                member,
            })
            .collect())
    }

    fn count_window(&self, key: &str, cutoff: u64) -> Result<u64, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        self.run(key, async {
            redis::cmd("ZCOUNT")
                .arg(&redis_key)
                .arg(format!("({}", cutoff))
                .arg("+inf")
                .query_async(&mut conn)
                .await
        })
    }

    fn remove_from_window(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        let removed: u64 = self.run(key, async {
            redis::cmd("ZREM")
                .arg(&redis_key)
                .arg(member)
                .query_async(&mut conn)
                .await
        })?;
        Ok(removed > 0)
    }

    fn increment(&self, key: &str, delta: i64, ttl_ms: u64) -> Result<i64, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("INCRBY").arg(&redis_key).arg(delta);
        expire(&mut pipe, &redis_key, ttl_ms);
        let (value,): (i64,) = self.run(key, async { pipe.query_async(&mut conn).await })?;
        Ok(value)
    }

    fn counter(&self, key: &str) -> Result<i64, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        let value: Option<i64> = self.run(key, async {
            redis::cmd("GET").arg(&redis_key).query_async(&mut conn).await
        })?;
        Ok(value.unwrap_or(0))
    }

    fn increment_field(
        &self,
        key: &str,
        field: &str,
        delta: i64,
        ttl_ms: u64,
    ) -> Result<i64, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HINCRBY")
            .arg(&redis_key)
            .arg(field)
            .arg(delta);
        expire(&mut pipe, &redis_key, ttl_ms);
        let (value,): (i64,) = self.run(key, async { pipe.query_async(&mut conn).await })?;
        Ok(value)
    }

    fn field(&self, key: &str, field: &str) -> Result<Option<i64>, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        self.run(key, async {
            redis::cmd("HGET")
                .arg(&redis_key)
                .arg(field)
                .query_async(&mut conn)
                .await
        })
    }

    fn fields(&self, key: &str) -> Result<HashMap<String, i64>, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        self.run(key, async {
            redis::cmd("HGETALL")
                .arg(&redis_key)
                .query_async(&mut conn)
                .await
        })
    }

    fn add_member(&self, key: &str, member: &str, ttl_ms: u64) -> Result<(), StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("SADD").arg(&redis_key).arg(member).ignore();
        expire(&mut pipe, &redis_key, ttl_ms);
        self.run(key, async { pipe.query_async(&mut conn).await })
    }

    fn members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        self.run(key, async {
            redis::cmd("SMEMBERS")
                .arg(&redis_key)
                .query_async(&mut conn)
                .await
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        self.run(key, async {
            redis::cmd("GET").arg(&redis_key).query_async(&mut conn).await
        })
    }

    fn put(&self, key: &str, value: &[u8], ttl_ms: u64) -> Result<(), StoreError> {
        let redis_key = self.key(key);
        let mut conn = self.connection.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(&redis_key).arg(value);
        if let Some(ttl) = expiry(ttl_ms) {
            cmd.arg("PX").arg(ttl);
        }
        self.run(key, async { cmd.query_async(&mut conn).await })
    }

    fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let redis_keys: Vec<String> = keys.iter().map(|k| self.key(k)).collect();
        let mut conn = self.connection.clone();
        self.run(&keys[0], async {
            redis::cmd("DEL")
                .arg(&redis_keys)
                .query_async(&mut conn)
                .await
        })
    }

    fn scan(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let redis_pattern = format!("{}{}", escape_glob(&self.config.key_prefix), pattern);
        let mut conn = self.connection.clone();

        // SCAN may return a key more than once
        let keys: BTreeSet<String> = self.run(pattern, async {
            let mut found = BTreeSet::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&redis_pattern)
                    .arg("COUNT")
                    .arg(self.config.scan_count)
                    .query_async(&mut conn)
                    .await?;
                found.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            Ok::<_, RedisError>(found)
        })?;

        Ok(keys
            .into_iter()
            .filter_map(|key| {
                key.strip_prefix(&self.config.key_prefix)
                    .map(str::to_string)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RedisStoreConfig::default();
        assert!(config.key_prefix.is_empty());
        assert_eq!(config.scan_count, 100);
    }

    #[test]
    fn test_no_expiry_skips_pexpire() {
        assert_eq!(expiry(NO_EXPIRY), None);
        assert_eq!(expiry(60_000), Some(60_000));
    }

    #[test]
    fn test_io_errors_map_to_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = map_error("k", RedisError::from(io));
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
