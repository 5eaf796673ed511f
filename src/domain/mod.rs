//! Domain layer - pure business logic with no external dependencies.
//!
//! This layer contains the core concepts and invariants of the engine:
//! - Configuration and role tables
//! - Endpoint normalization and store key layout
//! - Window results and their combination
//! - Violation analysis, ban records and alerts
//!
//! All types in this layer are pure and easily testable.

pub mod alert;
pub mod ban;
pub mod context;
pub mod endpoint;
pub mod keys;
pub mod metrics_report;
pub mod penalty;
pub mod rejection;
pub mod result;
pub mod settings;
