//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and owns every read and write
//! against the shared store:
//! - Sliding window counting and combined IP/user checks
//! - Limit resolution (overrides, role table, endpoint patterns)
//! - Violations, progressive penalties and bans
//! - Monitoring counters, alerts and cleanup
//! - The [`engine::Engine`] that ties them into one request decision
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod admin;
pub mod bans;
pub mod circuit_breaker;
pub mod combined;
pub mod engine;
pub mod guarded;
pub mod metrics;
pub mod monitoring;
pub mod penalty;
pub mod ports;
pub mod resolver;
pub mod scheduler;
pub mod window;
