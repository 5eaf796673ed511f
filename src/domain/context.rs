//! Caller identity as seen by the engine.

use crate::domain::settings::Role;
use serde::{Deserialize, Serialize};

/// Identity of the caller behind one request.
///
/// Supplied by the request pipeline; the engine never authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserContext {
    pub user_id: Option<String>,
    pub role: Option<Role>,
    pub ip: String,
    pub is_authenticated: bool,
}

impl UserContext {
    /// Unauthenticated caller known only by address.
    pub fn anonymous(ip: impl Into<String>) -> Self {
        Self {
            user_id: None,
            role: None,
            ip: ip.into(),
            is_authenticated: false,
        }
    }

    /// Authenticated caller.
    pub fn authenticated(user_id: impl Into<String>, role: Role, ip: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: Some(role),
            ip: ip.into(),
            is_authenticated: true,
        }
    }

    /// Client key of the source address: `ip:<addr>`.
    pub fn ip_key(&self) -> String {
        format!("ip:{}", self.ip)
    }

    /// Client key of the user, present only when the user-scoped check runs.
    pub fn user_key(&self) -> Option<String> {
        match (&self.user_id, self.is_authenticated) {
            (Some(id), true) => Some(format!("user:{}", id)),
            _ => None,
        }
    }

    /// Every client key this caller is tracked under.
    pub fn client_keys(&self) -> Vec<String> {
        let mut keys = vec![self.ip_key()];
        keys.extend(self.user_key());
        keys
    }
}
