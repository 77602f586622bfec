//! Shared request-scoped and project types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Database role a request runs under.
///
/// `ServiceRole` bypasses row-level security; the other two are
/// policy-evaluated by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anon,
    Authenticated,
    ServiceRole,
}

impl Role {
    /// The role name as it exists in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Anon => "anon",
            Role::Authenticated => "authenticated",
            Role::ServiceRole => "service_role",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "anon" => Some(Role::Anon),
            "authenticated" => Some(Role::Authenticated),
            "service_role" => Some(Role::ServiceRole),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload bound onto the engine session for the lifetime of one
/// logical request. Observable inside SQL via `auth.role()`, `auth.uid()`
/// and `auth.jwt()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    pub role: Role,
    pub user_id: Option<Uuid>,
    /// Verified JWT claims, empty object for key-derived contexts.
    pub claims: serde_json::Value,
}

impl SessionContext {
    pub fn anon() -> Self {
        Self {
            role: Role::Anon,
            user_id: None,
            claims: serde_json::json!({ "role": "anon" }),
        }
    }

    pub fn service_role() -> Self {
        Self {
            role: Role::ServiceRole,
            user_id: None,
            claims: serde_json::json!({ "role": "service_role" }),
        }
    }

    pub fn user(user_id: Uuid, claims: serde_json::Value) -> Self {
        Self {
            role: Role::Authenticated,
            user_id: Some(user_id),
            claims,
        }
    }

    pub fn is_service_role(&self) -> bool {
        self.role == Role::ServiceRole
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::anon()
    }
}

/// Persisted metadata for a logical project.
///
/// `database_name` is stable for the project's lifetime and uniquely
/// identifies its engine. At most one project is active at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMeta {
    pub id: String,
    pub name: String,
    pub database_name: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_name() {
        for role in [Role::Anon, Role::Authenticated, Role::ServiceRole] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("superuser"), None);
    }

    #[test]
    fn default_context_is_anon() {
        let ctx = SessionContext::default();
        assert_eq!(ctx.role, Role::Anon);
        assert!(ctx.user_id.is_none());
    }
}
