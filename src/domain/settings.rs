//! Engine configuration.
//!
//! [`Settings`] is the whole externally supplied configuration surface. It is
//! plain data: deserializable from JSON, validated once, and then shared
//! read-only by every component.

use crate::domain::penalty::Severity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Role of an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Manager,
    Sales,
    Accountant,
    Technician,
    Operator,
    User,
    Viewer,
}

impl Role {
    /// Every role, most privileged first.
    pub const ALL: [Role; 9] = [
        Role::SuperAdmin,
        Role::Admin,
        Role::Manager,
        Role::Sales,
        Role::Accountant,
        Role::Technician,
        Role::Operator,
        Role::User,
        Role::Viewer,
    ];

    /// Stable lowercase name used in store keys and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Manager => "manager",
            Role::Sales => "sales",
            Role::Accountant => "accountant",
            Role::Technician => "technician",
            Role::Operator => "operator",
            Role::User => "user",
            Role::Viewer => "viewer",
        }
    }

    /// Built-in limit multiplier for this role.
    pub fn default_multiplier(&self) -> f64 {
        match self {
            Role::SuperAdmin => 10.0,
            Role::Admin => 5.0,
            Role::Manager => 3.0,
            Role::Sales | Role::Accountant | Role::Technician => 2.0,
            Role::Operator => 1.5,
            Role::User => 1.0,
            Role::Viewer => 0.5,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SettingsError::UnknownRole(s.to_string()))
    }
}

/// Coarse class of an operation, derived from method and path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Read,
    Write,
    Delete,
    Admin,
}

impl OperationClass {
    /// Classify a request: any `/admin` path is administrative, safe methods
    /// read, `DELETE` deletes, everything else writes.
    pub fn classify(method: &str, path: &str) -> Self {
        if path.contains("/admin") {
            return OperationClass::Admin;
        }
        match method.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" | "OPTIONS" => OperationClass::Read,
            "DELETE" => OperationClass::Delete,
            _ => OperationClass::Write,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Read => "read",
            OperationClass::Write => "write",
            OperationClass::Delete => "delete",
            OperationClass::Admin => "admin",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A window length and request allotment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSpec {
    /// Window length in milliseconds
    pub window_size_ms: u64,
    /// Requests allowed per window
    pub max_requests: u64,
    /// Explicit allotment for the IP-scoped check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_max_requests: Option<u64>,
}

impl LimitSpec {
    pub fn new(window_size_ms: u64, max_requests: u64) -> Self {
        Self {
            window_size_ms,
            max_requests,
            ip_max_requests: None,
        }
    }

    pub fn per_minute(max_requests: u64) -> Self {
        Self::new(MINUTE_MS, max_requests)
    }

    pub fn with_ip_max(mut self, ip_max_requests: u64) -> Self {
        self.ip_max_requests = Some(ip_max_requests);
        self
    }
}

/// Per-role scaling and ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RoleLimits {
    /// Factor applied to every allotment for this role
    pub multiplier: f64,
    /// Hard ceiling on a single window's effective limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burst_limit: Option<u64>,
    /// Requests allowed per rolling 24 hours across all endpoints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_limit: Option<u64>,
}

impl RoleLimits {
    pub fn scaled(multiplier: f64) -> Self {
        Self {
            multiplier,
            burst_limit: None,
            daily_limit: None,
        }
    }
}

/// One step of the ban escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyTier {
    /// Hourly violations needed to reach this tier
    pub violations: u32,
    /// Ban duration in milliseconds
    pub duration_ms: u64,
    /// High and critical tiers raise a security alert when imposed
    #[serde(default)]
    pub severity: Severity,
}

/// Violation count threshold dividing the effective limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyMultiplier {
    pub min_violations: u32,
    pub multiplier: u32,
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Prefix of every store key
    pub namespace: String,
    /// Limit applied when nothing more specific matches; `None` allows
    pub default_limit: Option<LimitSpec>,
    /// IP allotment as a fraction of the user allotment
    pub ip_ratio: f64,
    /// Exact (`/auth/login`, `POST /orders`) or prefix (`/auth/*`) entries
    pub endpoints: BTreeMap<String, LimitSpec>,
    pub roles: BTreeMap<Role, RoleLimits>,
    /// Role by operation class allotments; zero forbids the operation
    pub operation_limits: BTreeMap<Role, BTreeMap<OperationClass, LimitSpec>>,
    pub penalty_tiers: Vec<PenaltyTier>,
    pub penalty_multipliers: Vec<PenaltyMultiplier>,
    /// Rolling window of the violation history
    pub violation_window_ms: u64,
    /// Lower bound of the timespan used for violation rates
    pub min_rate_span_ms: u64,
    /// Highest ban level that can still be appealed
    pub appeal_max_level: u32,
    /// Client identifiers (`ip:...`, `user:...` or bare values) never limited
    pub trusted_identifiers: Vec<String>,
    pub bypass_super_admin: bool,
    /// Hourly blocks of one identifier raising HIGH_VIOLATION_RATE
    pub alert_threshold: u64,
    /// Hourly blocks on one endpoint raising SUSPICIOUS_PATTERN
    pub suspicious_endpoint_threshold: u64,
    /// Hourly blocks system wide raising MASS_BLOCKING
    pub mass_blocking_threshold: u64,
    pub monitoring_enabled: bool,
    pub penalties_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let mut endpoints = BTreeMap::new();
        endpoints.insert("/auth/login".to_string(), LimitSpec::new(15 * MINUTE_MS, 5));
        endpoints.insert("/auth/*".to_string(), LimitSpec::per_minute(20));

        Self {
            namespace: "api-throttle".to_string(),
            default_limit: Some(LimitSpec::per_minute(100)),
            ip_ratio: 0.8,
            endpoints,
            roles: Role::ALL
                .iter()
                .map(|role| (*role, RoleLimits::scaled(role.default_multiplier())))
                .collect(),
            operation_limits: BTreeMap::new(),
            penalty_tiers: default_penalty_tiers(),
            penalty_multipliers: default_penalty_multipliers(),
            violation_window_ms: HOUR_MS,
            min_rate_span_ms: MINUTE_MS,
            appeal_max_level: 6,
            trusted_identifiers: Vec::new(),
            bypass_super_admin: false,
            alert_threshold: 50,
            suspicious_endpoint_threshold: 50,
            mass_blocking_threshold: 1000,
            monitoring_enabled: true,
            penalties_enabled: true,
        }
    }
}

impl Settings {
    /// Parse and validate settings from JSON. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: Settings =
            serde_json::from_str(json).map_err(|e| SettingsError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Multiplier for a role, or 1 for anonymous callers.
    pub fn role_multiplier(&self, role: Option<Role>) -> f64 {
        role.map(|r| {
            self.roles
                .get(&r)
                .map(|limits| limits.multiplier)
                .unwrap_or_else(|| r.default_multiplier())
        })
        .unwrap_or(1.0)
    }

    /// Limits configured for a role.
    pub fn role_limits(&self, role: Role) -> Option<&RoleLimits> {
        self.roles.get(&role)
    }

    /// Install the role by operation class table of the reference deployment.
    pub fn with_standard_operation_limits(mut self) -> Self {
        self.operation_limits = standard_operation_limits();
        self
    }

    /// Check internal consistency.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.namespace.is_empty() {
            return Err(SettingsError::EmptyNamespace);
        }
        if !(self.ip_ratio > 0.0 && self.ip_ratio <= 1.0) {
            return Err(SettingsError::InvalidIpRatio(self.ip_ratio));
        }

        let limits = self
            .default_limit
            .iter()
            .map(|spec| ("default".to_string(), spec))
            .chain(self.endpoints.iter().map(|(k, v)| (k.clone(), v)));
        for (name, spec) in limits {
            if spec.window_size_ms == 0 {
                return Err(SettingsError::ZeroWindow(name));
            }
        }
        for (role, classes) in &self.operation_limits {
            for (class, spec) in classes {
                if spec.window_size_ms == 0 {
                    return Err(SettingsError::ZeroWindow(format!("{}/{}", role, class)));
                }
            }
        }

        for (role, limits) in &self.roles {
            if !(limits.multiplier.is_finite() && limits.multiplier > 0.0) {
                return Err(SettingsError::InvalidMultiplier(*role));
            }
        }

        if self.penalty_tiers.is_empty() {
            return Err(SettingsError::EmptyPenaltyTiers);
        }
        for pair in self.penalty_tiers.windows(2) {
            if pair[1].violations <= pair[0].violations || pair[1].duration_ms <= pair[0].duration_ms
            {
                return Err(SettingsError::UnorderedPenaltyTiers);
            }
        }
        for pair in self.penalty_multipliers.windows(2) {
            if pair[1].min_violations <= pair[0].min_violations {
                return Err(SettingsError::UnorderedPenaltyMultipliers);
            }
        }
        if self.penalty_multipliers.iter().any(|m| m.multiplier == 0) {
            return Err(SettingsError::UnorderedPenaltyMultipliers);
        }

        if self.violation_window_ms == 0 {
            return Err(SettingsError::ZeroWindow("violation_window".to_string()));
        }
        Ok(())
    }
}

/// Built-in escalation ladder: 5 violations earn 5 minutes, 200 earn 30 days.
pub fn default_penalty_tiers() -> Vec<PenaltyTier> {
    use Severity::*;
    [
        (5, 5 * MINUTE_MS, Low),
        (10, 15 * MINUTE_MS, Low),
        (20, HOUR_MS, Medium),
        (35, 4 * HOUR_MS, Medium),
        (50, 12 * HOUR_MS, High),
        (75, DAY_MS, High),
        (100, 3 * DAY_MS, Critical),
        (150, 7 * DAY_MS, Critical),
        (200, 30 * DAY_MS, Critical),
    ]
    .into_iter()
    .map(|(violations, duration_ms, severity)| PenaltyTier {
        violations,
        duration_ms,
        severity,
    })
    .collect()
}

pub fn default_penalty_multipliers() -> Vec<PenaltyMultiplier> {
    [(1, 1), (10, 2), (25, 4), (50, 8), (100, 16)]
        .into_iter()
        .map(|(min_violations, multiplier)| PenaltyMultiplier {
            min_violations,
            multiplier,
        })
        .collect()
}

/// Role by operation class allotments of the reference deployment.
///
/// Viewers cannot write, only the top six roles delete, and only managers and
/// above reach administrative endpoints.
pub fn standard_operation_limits() -> BTreeMap<Role, BTreeMap<OperationClass, LimitSpec>> {
    use OperationClass::*;
    let rows: [(Role, [u64; 4]); 9] = [
        (Role::SuperAdmin, [2000, 500, 100, 1000]),
        (Role::Admin, [1000, 200, 50, 500]),
        (Role::Manager, [500, 100, 20, 100]),
        (Role::Sales, [300, 50, 10, 0]),
        (Role::Accountant, [300, 50, 5, 0]),
        (Role::Technician, [200, 30, 5, 0]),
        (Role::Operator, [150, 20, 0, 0]),
        (Role::User, [100, 10, 0, 0]),
        (Role::Viewer, [50, 0, 0, 0]),
    ];

    rows.into_iter()
        .map(|(role, [read, write, delete, admin])| {
            let mut classes = BTreeMap::new();
            classes.insert(Read, LimitSpec::per_minute(read));
            classes.insert(Write, LimitSpec::per_minute(write));
            classes.insert(Delete, LimitSpec::new(5 * MINUTE_MS, delete));
            classes.insert(Admin, LimitSpec::per_minute(admin));
            (role, classes)
        })
        .collect()
}

/// Errors produced while loading or validating [`Settings`].
#[derive(Debug, Clone, PartialEq)]
pub enum SettingsError {
    /// JSON could not be parsed
    Parse(String),
    EmptyNamespace,
    /// IP ratio outside `(0, 1]`
    InvalidIpRatio(f64),
    /// A limit has a zero-length window
    ZeroWindow(String),
    /// A role multiplier is not a positive finite number
    InvalidMultiplier(Role),
    EmptyPenaltyTiers,
    /// Tier thresholds or durations do not strictly increase
    UnorderedPenaltyTiers,
    /// Multiplier thresholds do not strictly increase, or a multiplier is zero
    UnorderedPenaltyMultipliers,
    UnknownRole(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::Parse(e) => write!(f, "invalid settings: {}", e),
            SettingsError::EmptyNamespace => write!(f, "namespace must not be empty"),
            SettingsError::InvalidIpRatio(r) => {
                write!(f, "ip_ratio must be in (0, 1], got {}", r)
            }
            SettingsError::ZeroWindow(name) => {
                write!(f, "limit '{}' must have a window greater than 0", name)
            }
            SettingsError::InvalidMultiplier(role) => {
                write!(f, "multiplier for role '{}' must be positive", role)
            }
            SettingsError::EmptyPenaltyTiers => write!(f, "penalty_tiers must not be empty"),
            SettingsError::UnorderedPenaltyTiers => write!(
                f,
                "penalty_tiers must strictly increase in both violations and duration"
            ),
            SettingsError::UnorderedPenaltyMultipliers => write!(
                f,
                "penalty_multipliers must strictly increase and be non-zero"
            ),
            SettingsError::UnknownRole(name) => write!(f, "unknown role '{}'", name),
        }
    }
}

impl std::error::Error for SettingsError {}
