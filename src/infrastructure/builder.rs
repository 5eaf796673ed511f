//! Engine construction.
//!
//! The builder validates [`Settings`] and fills in adapters the caller did
//! not provide: an in-process [`MemoryStore`] and the [`SystemClock`].

use crate::application::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::application::engine::Engine;
use crate::application::ports::{Clock, Store};
use crate::domain::settings::{Settings, SettingsError};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::memory_store::MemoryStore;
use std::sync::Arc;

/// Error returned when building an engine fails.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// Settings validation failed
    Settings(SettingsError),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::Settings(e) => write!(f, "invalid settings: {}", e),
        }
    }
}

impl std::error::Error for BuildError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BuildError::Settings(e) => Some(e),
        }
    }
}

impl From<SettingsError> for BuildError {
    fn from(e: SettingsError) -> Self {
        BuildError::Settings(e)
    }
}

/// Builder for constructing an [`Engine`].
///
/// # Example
///
/// ```
/// use api_throttle::{Endpoint, EngineBuilder, Role, Settings, UserContext};
///
/// let engine = EngineBuilder::new()
///     .with_settings(Settings::default())
///     .build()
///     .unwrap();
///
/// let ctx = UserContext::authenticated("42", Role::User, "203.0.113.7");
/// assert!(engine.check(&Endpoint::parse("GET /orders"), &ctx).is_allowed());
/// ```
#[derive(Debug, Default)]
pub struct EngineBuilder {
    settings: Settings,
    store: Option<Arc<dyn Store>>,
    clock: Option<Arc<dyn Clock>>,
    breaker_config: CircuitBreakerConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine settings.
    ///
    /// Settings are validated in [`EngineBuilder::build`].
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Use a shared store instead of the in-process default.
    ///
    /// Every engine instance that should enforce the same limits must point
    /// at the same store and namespace.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set a custom clock (for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Tune the circuit breaker that guards store access.
    pub fn with_circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Build the engine.
    ///
    /// # Errors
    /// Returns `BuildError::Settings` if the settings are inconsistent.
    pub fn build(self) -> Result<Engine, BuildError> {
        self.settings.validate()?;

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new(clock.clone())) as Arc<dyn Store>);
        let breaker = Arc::new(CircuitBreaker::with_config(self.breaker_config, clock.clone()));

        tracing::debug!(
            namespace = %self.settings.namespace,
            endpoints = self.settings.endpoints.len(),
            penalties = self.settings.penalties_enabled,
            monitoring = self.settings.monitoring_enabled,
            "rate limiting engine built"
        );

        Ok(Engine::new(self.settings, store, clock, breaker))
    }
}
