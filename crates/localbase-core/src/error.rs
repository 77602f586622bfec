//! The unified API error surface.
//!
//! Every failure that reaches a client is converted into an [`ApiError`]
//! carrying a stable code, an HTTP status, and the canonical body shape
//! `{ code, message, details?, hint? }`. Crate-local error enums convert
//! into this type at the boundary where they become client-visible.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification used for propagation policy and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    Conflict,
    RlsDenied,
    Engine,
    Timeout,
    Internal,
}

/// Canonical wire shape of an error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// A client-visible error with a stable code and status.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub status: u16,
    pub code: String,
    pub message: String,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl ApiError {
    pub fn new(kind: ErrorKind, status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            code: code.into(),
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Client input could not be parsed or validated. `PGRST100` unless a
    /// more specific code applies.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, 400, code, message)
    }

    pub fn auth(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, status, code, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, 404, "not_found", message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, 409, code, message)
    }

    /// Engine reported a policy violation. 401 for anon, 403 once
    /// authenticated.
    pub fn rls_denied(authenticated: bool, message: impl Into<String>) -> Self {
        let status = if authenticated { 403 } else { 401 };
        Self::new(ErrorKind::RlsDenied, status, "42501", message)
    }

    /// SQL failure surfaced with its SQLSTATE. 400 for known client-caused
    /// states, 500 otherwise.
    pub fn engine(status: u16, sqlstate: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Engine, status, sqlstate, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, 504, "statement_timeout", message)
    }

    /// Details are logged by the caller, never surfaced.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, 500, "internal_error", message.into())
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code.clone(),
            message: self.message.clone(),
            details: self.details.clone(),
            hint: self.hint.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rls_denied_status_depends_on_authentication() {
        assert_eq!(ApiError::rls_denied(false, "denied").status, 401);
        assert_eq!(ApiError::rls_denied(true, "denied").status, 403);
    }

    #[test]
    fn body_omits_empty_optionals() {
        let body = ApiError::validation("PGRST100", "bad query").body();
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["code"], "PGRST100");
        assert!(json.get("details").is_none());
        assert!(json.get("hint").is_none());
    }
}
