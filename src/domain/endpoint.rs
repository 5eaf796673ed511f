//! Endpoint identifiers.
//!
//! Requests for `/orders/42` and `/orders/43` must share one window, so the
//! raw path is collapsed into a template before it reaches any key.

use crate::domain::settings::OperationClass;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized `METHOD /path` identifier.
///
/// Numeric segments become `:id`, UUID segments become `:uuid`, the query
/// string is dropped and a trailing slash is trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    method: String,
    path: String,
}

impl Endpoint {
    /// Normalize a raw method and request path.
    pub fn new(method: &str, raw_path: &str) -> Self {
        Self {
            method: method.trim().to_ascii_uppercase(),
            path: normalize_path(raw_path),
        }
    }

    /// Parse an already formatted `METHOD /path` string. A bare path is
    /// treated as `GET`.
    pub fn parse(s: &str) -> Self {
        match s.trim().split_once(' ') {
            Some((method, path)) => Self::new(method, path),
            None => Self::new("GET", s),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Operation class of this endpoint.
    pub fn operation(&self) -> OperationClass {
        OperationClass::classify(&self.method, &self.path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

fn normalize_path(raw: &str) -> String {
    let path = raw.split(['?', '#']).next().unwrap_or_default();

    let segments: Vec<&str> = path
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| {
            if is_numeric(segment) {
                ":id"
            } else if is_uuid(segment) {
                ":uuid"
            } else {
                segment
            }
        })
        .collect();

    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

fn is_numeric(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn is_uuid(segment: &str) -> bool {
    uuid::Uuid::try_parse(segment).is_ok() && segment.len() == 36
}
