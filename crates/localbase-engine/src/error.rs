//! Error types for the engine crate.

use localbase_core::ApiError;
use thiserror::Error;

/// Errors that can occur while talking to a project engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Connecting to the database failed after bounded retries.
    #[error("failed to connect to {database} after {attempts} attempts: {source}")]
    ConnectFailed {
        database: String,
        attempts: u32,
        source: sqlx::Error,
    },

    /// The engine has been torn down.
    #[error("engine is closed")]
    Closed,

    /// A statement exceeded the soft timeout.
    #[error("statement timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// The engine rejected the statement with a SQLSTATE.
    #[error("sql error {sqlstate}: {message}")]
    Sql { sqlstate: String, message: String },

    /// Row-level security denied the statement (SQLSTATE 42501).
    #[error("permission denied: {0}")]
    PolicyDenied(String),

    /// Connection-level failure not attributable to the statement.
    #[error("engine protocol error: {0}")]
    Protocol(String),

    /// Internal error.
    #[error("internal engine error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// SQLSTATEs surfaced to clients as their own 4xx rather than a bare 500.
fn client_fault(sqlstate: &str) -> bool {
    sqlstate.starts_with("22")
        || sqlstate.starts_with("23")
        || sqlstate.starts_with("42")
        || sqlstate == "P0001"
}

impl EngineError {
    /// Convert into the client-visible error shape. `authenticated`
    /// decides whether a policy denial reads as 401 or 403.
    pub fn into_api(self, authenticated: bool) -> ApiError {
        match self {
            EngineError::PolicyDenied(message) => ApiError::rls_denied(authenticated, message),
            EngineError::Timeout { seconds } => {
                ApiError::timeout(format!("statement timed out after {seconds}s"))
            }
            EngineError::Sql { sqlstate, message } => match sqlstate.as_str() {
                "23505" => ApiError::conflict("23505", message),
                "42P01" => ApiError::engine(404, "42P01", message),
                state if client_fault(state) => ApiError::engine(400, sqlstate, message),
                _ => ApiError::internal(format!("sql error {sqlstate}: {message}")),
            },
            EngineError::Closed => ApiError::internal("engine is closed"),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) => {
                let sqlstate = db.code().map(|c| c.to_string()).unwrap_or_default();
                if sqlstate == "42501" {
                    EngineError::PolicyDenied(db.message().to_string())
                } else {
                    EngineError::Sql {
                        sqlstate,
                        message: db.message().to_string(),
                    }
                }
            }
            _ => EngineError::Protocol(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_violation_maps_to_conflict() {
        let err = EngineError::Sql {
            sqlstate: "23505".into(),
            message: "duplicate key value".into(),
        };
        let api = err.into_api(false);
        assert_eq!(api.status, 409);
        assert_eq!(api.code, "23505");
    }

    #[test]
    fn policy_denial_status_follows_role() {
        let anon = EngineError::PolicyDenied("nope".into()).into_api(false);
        assert_eq!(anon.status, 401);
        let authed = EngineError::PolicyDenied("nope".into()).into_api(true);
        assert_eq!(authed.status, 403);
    }

    #[test]
    fn unknown_sqlstate_is_opaque() {
        let err = EngineError::Sql {
            sqlstate: "XX000".into(),
            message: "exploded".into(),
        };
        let api = err.into_api(false);
        assert_eq!(api.status, 500);
        assert_eq!(api.code, "internal_error");
    }
}
