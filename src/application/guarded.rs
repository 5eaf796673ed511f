//! Store access shared by every component.
//!
//! Each store call goes through [`GuardedStore::call`], which consults the
//! circuit breaker, isolates adapter panics, and records and logs failures.
//! Callers only decide what their fail-open answer is.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::metrics::Metrics;
use crate::application::ports::{Store, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::panic;
use std::sync::Arc;

/// Store handle with circuit breaking and failure accounting.
#[derive(Debug, Clone)]
pub struct GuardedStore {
    store: Arc<dyn Store>,
    breaker: Arc<CircuitBreaker>,
    metrics: Metrics,
}

impl GuardedStore {
    pub fn new(store: Arc<dyn Store>, breaker: Arc<CircuitBreaker>, metrics: Metrics) -> Self {
        Self {
            store,
            breaker,
            metrics,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Run one store operation.
    ///
    /// Returns [`StoreError::CircuitOpen`] without touching the store while
    /// the breaker is open.
    pub fn call<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&dyn Store) -> Result<R, StoreError>,
    ) -> Result<R, StoreError> {
        if !self.breaker.allow_request() {
            log_store_error(operation, &StoreError::CircuitOpen);
            return Err(StoreError::CircuitOpen);
        }

        let result = panic::catch_unwind(panic::AssertUnwindSafe(|| f(self.store.as_ref())))
            .unwrap_or_else(|_| Err(StoreError::Unavailable("store adapter panicked".to_string())));

        match &result {
            Ok(_) => self.breaker.record_success(),
            // A malformed record is a data problem, not an outage
            Err(StoreError::Codec(_)) | Err(StoreError::WrongType { .. }) => {
                self.breaker.record_success();
                self.metrics.record_store_failure();
            }
            Err(_) => {
                self.breaker.record_failure();
                self.metrics.record_store_failure();
            }
        }
        if let Err(e) = &result {
            log_store_error(operation, e);
        }
        result
    }

    /// Read and decode a bincode record.
    pub fn get_record<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let bytes = self.call(operation, |store| store.get(key))?;
        bytes
            .map(|bytes| bincode::deserialize(&bytes).map_err(StoreError::from))
            .transpose()
    }

    /// Encode and write a bincode record.
    pub fn put_record<T: Serialize>(
        &self,
        operation: &'static str,
        key: &str,
        value: &T,
        ttl_ms: u64,
    ) -> Result<(), StoreError> {
        let bytes = bincode::serialize(value)?;
        self.call(operation, |store| store.put(key, &bytes, ttl_ms))
    }
}

fn log_store_error(operation: &'static str, error: &StoreError) {
    match error {
        StoreError::CircuitOpen => {
            tracing::debug!(operation, "store circuit open, skipping");
        }
        _ => {
            tracing::error!(operation, error = %error, "store operation failed");
        }
    }
}
