//! Store key layout.
//!
//! Every key starts with the configured namespace so several deployments can
//! share one store. Time-bucketed families end in `:hour:{bucket}` or
//! `:day:{bucket}` with the bucket in epoch milliseconds, which lets cleanup
//! parse the age out of the key itself.

use crate::domain::settings::Role;

pub const HOUR_MS: u64 = 60 * 60 * 1000;
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Kind of a recorded monitoring event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Request,
    Allow,
    Block,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Request => "request",
            EventKind::Allow => "allow",
            EventKind::Block => "block",
        }
    }
}

/// Hourly key families purged by cleanup.
pub const HOURLY_FAMILIES: [&str; 7] = [
    "metrics",
    "violators",
    "endpoints",
    "roles",
    "ips",
    "users",
    "blocked_ips",
];

/// Also hourly; kept separate because the role sits before the bucket.
pub const ROLE_USERS_FAMILY: &str = "role_users";

pub fn hour_bucket(now_ms: u64) -> u64 {
    now_ms - now_ms % HOUR_MS
}

pub fn day_bucket(now_ms: u64) -> u64 {
    now_ms - now_ms % DAY_MS
}

/// Hour buckets overlapping `[start, end)`, oldest first.
pub fn hour_buckets(start_ms: u64, end_ms: u64) -> Vec<u64> {
    let mut buckets = Vec::new();
    let mut current = hour_bucket(start_ms);
    while current < end_ms {
        buckets.push(current);
        current += HOUR_MS;
    }
    buckets
}

/// Escape glob metacharacters so a value matches only itself.
pub fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Granularity of a parsed bucket key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hour,
    Day,
}

/// Key builder bound to one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    namespace: String,
}

impl KeySpace {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Sliding window of one identifier under one prefix.
    pub fn window(&self, prefix: &str, identifier: &str) -> String {
        format!("{}:rl:{}:{}", self.namespace, prefix, identifier)
    }

    /// Glob matching every window whose identifier contains `fragment`.
    pub fn window_pattern(&self, fragment: &str) -> String {
        format!("{}:rl:*{}*", escape_glob(&self.namespace), escape_glob(fragment))
    }

    /// Rolling violation history of a client key.
    pub fn violations(&self, client: &str) -> String {
        format!("{}:penalty:violations:{}", self.namespace, client)
    }

    pub fn penalty_record(&self, client: &str) -> String {
        format!("{}:penalty:record:{}", self.namespace, client)
    }

    pub fn ban(&self, client: &str) -> String {
        format!("{}:penalty:ban:{}", self.namespace, client)
    }

    pub fn event_counter(&self, kind: EventKind, granularity: Granularity, bucket: u64) -> String {
        let unit = match granularity {
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        };
        format!("{}:metrics:{}:{}:{}", self.namespace, kind.as_str(), unit, bucket)
    }

    pub fn violators(&self, bucket: u64) -> String {
        format!("{}:violators:hour:{}", self.namespace, bucket)
    }

    pub fn endpoints(&self, kind: EventKind, bucket: u64) -> String {
        format!("{}:endpoints:{}:hour:{}", self.namespace, kind.as_str(), bucket)
    }

    pub fn roles(&self, kind: EventKind, bucket: u64) -> String {
        format!("{}:roles:{}:hour:{}", self.namespace, kind.as_str(), bucket)
    }

    pub fn role_users(&self, role: Role, bucket: u64) -> String {
        format!("{}:{}:{}:hour:{}", self.namespace, ROLE_USERS_FAMILY, role, bucket)
    }

    pub fn ips(&self, bucket: u64) -> String {
        format!("{}:ips:hour:{}", self.namespace, bucket)
    }

    pub fn users(&self, bucket: u64) -> String {
        format!("{}:users:hour:{}", self.namespace, bucket)
    }

    pub fn blocked_ips(&self, bucket: u64) -> String {
        format!("{}:blocked_ips:hour:{}", self.namespace, bucket)
    }

    pub fn alert(&self, id: &str) -> String {
        format!("{}:alert:{}", self.namespace, id)
    }

    /// Ordered index of alert ids by creation time.
    pub fn active_alerts(&self) -> String {
        format!("{}:alerts:active", self.namespace)
    }

    /// Glob matching every hour or day bucketed key of this namespace.
    pub fn bucket_pattern(&self, granularity: Granularity) -> String {
        match granularity {
            Granularity::Hour => format!("{}:*:hour:*", escape_glob(&self.namespace)),
            Granularity::Day => format!("{}:metrics:*:day:*", escape_glob(&self.namespace)),
        }
    }

    /// Bucket timestamp of a time-bucketed monitoring key, `None` for any
    /// other key.
    pub fn parse_bucket(&self, key: &str, granularity: Granularity) -> Option<u64> {
        let rest = key.strip_prefix(&self.namespace)?.strip_prefix(':')?;
        let (family, _) = rest.split_once(':')?;
        let marker = match granularity {
            Granularity::Hour => {
                if !HOURLY_FAMILIES.contains(&family) && family != ROLE_USERS_FAMILY {
                    return None;
                }
                ":hour:"
            }
            Granularity::Day => {
                if family != "metrics" {
                    return None;
                }
                ":day:"
            }
        };
        let (_, bucket) = rest.rsplit_once(marker)?;
        bucket.parse().ok()
    }
}
