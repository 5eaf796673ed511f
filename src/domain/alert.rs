//! Security alerts raised by the monitoring rules.

use crate::domain::penalty::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// One identifier blocked too often within the hour
    HighViolationRate,
    /// One endpoint blocked too often within the hour
    SuspiciousPattern,
    /// Too many blocks system wide within the hour
    MassBlocking,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::HighViolationRate => "HIGH_VIOLATION_RATE",
            AlertType::SuspiciousPattern => "SUSPICIOUS_PATTERN",
            AlertType::MassBlocking => "MASS_BLOCKING",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            AlertType::HighViolationRate => Severity::High,
            AlertType::SuspiciousPattern => Severity::Medium,
            AlertType::MassBlocking => Severity::Critical,
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raised alert. Moves from active to resolved only through explicit
/// resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// `{type}:{subject}:{hour bucket}`, one alert per subject per hour
    pub id: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub timestamp: u64,
    /// Client key, endpoint or `system`
    pub identifier: String,
    pub details: BTreeMap<String, String>,
    pub resolved: bool,
    pub resolved_at: Option<u64>,
}

impl Alert {
    pub fn new(
        alert_type: AlertType,
        identifier: impl Into<String>,
        hour_bucket: u64,
        now_ms: u64,
        details: BTreeMap<String, String>,
    ) -> Self {
        let identifier = identifier.into();
        Self {
            id: format!("{}:{}:{}", alert_type, identifier, hour_bucket),
            alert_type,
            severity: alert_type.severity(),
            timestamp: now_ms,
            identifier,
            details,
            resolved: false,
            resolved_at: None,
        }
    }

    pub fn resolve(&mut self, now_ms: u64) {
        self.resolved = true;
        self.resolved_at = Some(now_ms);
    }
}
