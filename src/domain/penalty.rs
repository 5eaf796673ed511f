//! Violation analysis.
//!
//! Pure functions turning a violation history into a severity, a risk
//! assessment and a ban tier. The Penalty Escalator feeds them from the store
//! and acts on the result.

use crate::domain::settings::{PenaltyMultiplier, PenaltyTier};
use serde::{Deserialize, Serialize};
use std::fmt;

const HOUR_MS: u64 = 60 * 60 * 1000;

/// Severity of an offender's recent behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Low
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        })
    }
}

/// Risk level shares the severity scale.
pub type RiskLevel = Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    Monitor,
    Warn,
    TempBan,
    ExtendedBan,
    PermanentBan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationPattern {
    Sporadic,
    Burst,
    Sustained,
    Escalating,
}

/// Risk assessment of one offender.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PenaltyAnalysis {
    pub risk_level: RiskLevel,
    pub recommended_action: RecommendedAction,
    pub violation_pattern: ViolationPattern,
    /// 0 to 100, lower is more suspicious
    pub trust_score: u8,
}

/// Persistent per-offender penalty state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub identifier: String,
    /// Violations inside the rolling window
    pub violations: u32,
    pub last_violation: u64,
    /// Oldest violation still inside the rolling window
    pub first_violation: u64,
    /// Level of the last ban imposed, 0 when never banned
    pub penalty_level: u32,
    /// Sum of all ban durations imposed, in milliseconds
    pub total_ban_time: u64,
    /// Distinct endpoints violated inside the rolling window
    pub endpoints: Vec<String>,
    pub severity: Severity,
}

impl ViolationRecord {
    pub fn new(identifier: impl Into<String>, now_ms: u64) -> Self {
        Self {
            identifier: identifier.into(),
            violations: 0,
            last_violation: now_ms,
            first_violation: now_ms,
            penalty_level: 0,
            total_ban_time: 0,
            endpoints: Vec::new(),
            severity: Severity::Low,
        }
    }

    /// Milliseconds between the first and last violation.
    pub fn timespan_ms(&self) -> u64 {
        self.last_violation.saturating_sub(self.first_violation)
    }
}

/// Violations per hour, with the timespan floored at `min_span_ms` so a
/// first violation does not read as an infinite rate.
pub fn violations_per_hour(violations: u32, timespan_ms: u64, min_span_ms: u64) -> f64 {
    let span = timespan_ms.max(min_span_ms).max(1);
    violations as f64 * HOUR_MS as f64 / span as f64
}

/// Classify severity from count and hourly rate.
pub fn classify_severity(violations: u32, rate_per_hour: f64) -> Severity {
    if violations >= 100 || rate_per_hour >= 50.0 {
        Severity::Critical
    } else if violations >= 50 || rate_per_hour >= 25.0 {
        Severity::High
    } else if violations >= 20 || rate_per_hour >= 10.0 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Trust score in `[0, 100]`.
pub fn trust_score(violations: u32, endpoints: usize, rate_per_hour: f64, penalty_level: u32) -> u8 {
    let score = 100.0
        - (violations as f64 * 2.0).min(50.0)
        - (endpoints as f64 * 3.0).min(20.0)
        - (rate_per_hour * 2.0).min(20.0)
        - (penalty_level as f64 * 2.0).min(10.0);
    score.clamp(0.0, 100.0).floor() as u8
}

/// Assess a record whose severity is already classified.
pub fn analyze(record: &ViolationRecord, rate_per_hour: f64) -> PenaltyAnalysis {
    let violation_pattern = if rate_per_hour >= 20.0 {
        ViolationPattern::Burst
    } else if rate_per_hour >= 5.0 {
        ViolationPattern::Sustained
    } else if record.violations >= 50 && record.timespan_ms() > HOUR_MS {
        ViolationPattern::Escalating
    } else {
        ViolationPattern::Sporadic
    };

    let trust = trust_score(
        record.violations,
        record.endpoints.len(),
        rate_per_hour,
        record.penalty_level,
    );

    let risk_level = if trust < 20 || record.severity == Severity::Critical {
        Severity::Critical
    } else if trust < 40 || record.severity == Severity::High {
        Severity::High
    } else if trust < 60 || record.severity == Severity::Medium {
        Severity::Medium
    } else {
        Severity::Low
    };

    let recommended_action = match risk_level {
        Severity::Critical if record.violations >= 200 => RecommendedAction::PermanentBan,
        Severity::Critical => RecommendedAction::ExtendedBan,
        Severity::High => RecommendedAction::TempBan,
        Severity::Medium => RecommendedAction::Warn,
        Severity::Low => RecommendedAction::Monitor,
    };

    PenaltyAnalysis {
        risk_level,
        recommended_action,
        violation_pattern,
        trust_score: trust,
    }
}

/// Ban level (1-based index into `tiers`) earned by `violations`, raised one
/// step for high risk and two for critical. Zero when no tier is met.
pub fn penalty_level(tiers: &[PenaltyTier], violations: u32, risk: RiskLevel) -> u32 {
    let base = tiers
        .iter()
        .take_while(|tier| violations >= tier.violations)
        .count() as u32;
    if base == 0 {
        return 0;
    }
    let bump = match risk {
        Severity::Critical => 2,
        Severity::High => 1,
        _ => 0,
    };
    (base + bump).min(tiers.len() as u32)
}

/// Tier for a 1-based level.
pub fn tier_for_level(tiers: &[PenaltyTier], level: u32) -> Option<&PenaltyTier> {
    level
        .checked_sub(1)
        .and_then(|index| tiers.get(index as usize))
}

/// Smallest level whose duration covers `duration_ms`, or the last level.
pub fn level_for_duration(tiers: &[PenaltyTier], duration_ms: u64) -> u32 {
    tiers
        .iter()
        .position(|tier| tier.duration_ms >= duration_ms)
        .map(|index| index as u32 + 1)
        .unwrap_or(tiers.len() as u32)
}

/// Divisor applied to the effective limit of a repeat offender.
pub fn penalty_multiplier(table: &[PenaltyMultiplier], violations: u64) -> u64 {
    table
        .iter()
        .filter(|entry| violations >= entry.min_violations as u64)
        .map(|entry| entry.multiplier as u64)
        .last()
        .unwrap_or(1)
        .max(1)
}
