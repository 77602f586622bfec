//! Error types for the authentication crate.

use localbase_core::{ApiError, ErrorKind};
use localbase_engine::EngineError;
use thiserror::Error;

/// Errors the auth state machine can surface.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong email/phone or password.
    #[error("invalid login credentials")]
    InvalidCredentials,

    /// Presented refresh token is unknown or already used.
    #[error("invalid refresh token")]
    InvalidRefreshToken,

    /// Email already registered.
    #[error("user already registered")]
    UserExists,

    /// Phone already registered.
    #[error("phone number already registered")]
    PhoneExists,

    /// Password fails the strength rules.
    #[error("password is too weak: {0}")]
    WeakPassword(String),

    #[error("invalid email address: {0}")]
    InvalidEmail(String),

    #[error("invalid phone number: {0}")]
    InvalidPhone(String),

    /// Sign-in or verification input is incomplete.
    #[error("{0}")]
    MissingField(String),

    /// One-time token (signup, recovery, magic link) is unknown.
    #[error("verification token not found")]
    TokenNotFound,

    /// One-time token is past its lifetime.
    #[error("verification token has expired")]
    TokenExpired,

    /// Sign-in attempted before the address was confirmed.
    #[error("email not confirmed")]
    EmailNotConfirmed,

    /// Bearer token does not resolve to a signed-in user.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Caller lacks the required role.
    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("user not found")]
    UserNotFound,

    #[error("MFA factor not found")]
    FactorNotFound,

    #[error("MFA challenge not found or expired")]
    ChallengeExpired,

    /// Wrong TOTP or SMS code.
    #[error("MFA verification failed")]
    MfaVerificationFailed,

    /// Token signing/verification failure inside the codec.
    #[error("jwt error: {0}")]
    Jwt(String),

    /// Underlying engine failure.
    #[error("auth store error: {0}")]
    Store(String),
}

impl AuthError {
    pub fn into_api(self) -> ApiError {
        match self {
            AuthError::InvalidCredentials => {
                ApiError::auth(400, "invalid_grant", "Invalid login credentials")
            }
            AuthError::InvalidRefreshToken => {
                ApiError::auth(400, "invalid_grant", "Invalid Refresh Token: Refresh Token Not Found")
            }
            AuthError::UserExists => ApiError::new(
                ErrorKind::Conflict,
                422,
                "user_already_registered",
                "User already registered",
            ),
            AuthError::PhoneExists => ApiError::new(
                ErrorKind::Conflict,
                422,
                "phone_already_registered",
                "Phone number already registered",
            ),
            AuthError::WeakPassword(reason) => ApiError::new(
                ErrorKind::Auth,
                422,
                "weak_password",
                format!("Password is too weak: {reason}"),
            ),
            AuthError::InvalidEmail(email) => {
                ApiError::auth(400, "validation_failed", format!("Invalid email address: {email}"))
            }
            AuthError::InvalidPhone(phone) => {
                ApiError::auth(400, "validation_failed", format!("Invalid phone number: {phone}"))
            }
            AuthError::MissingField(message) => ApiError::auth(400, "validation_failed", message),
            AuthError::TokenNotFound => {
                ApiError::auth(401, "invalid_token", "Verification token not found")
            }
            AuthError::TokenExpired => {
                ApiError::auth(401, "token_expired", "Verification token has expired")
            }
            AuthError::EmailNotConfirmed => {
                ApiError::auth(400, "email_not_confirmed", "Email not confirmed")
            }
            AuthError::NotAuthenticated => {
                ApiError::auth(401, "not_authenticated", "This endpoint requires a signed-in user")
            }
            AuthError::Forbidden(message) => ApiError::auth(403, "forbidden", message),
            AuthError::UserNotFound => ApiError::not_found("User not found"),
            AuthError::FactorNotFound => ApiError::not_found("MFA factor not found"),
            AuthError::ChallengeExpired => ApiError::new(
                ErrorKind::Auth,
                422,
                "mfa_challenge_failed",
                "MFA challenge not found or expired",
            ),
            AuthError::MfaVerificationFailed => ApiError::new(
                ErrorKind::Auth,
                422,
                "mfa_challenge_failed",
                "Invalid MFA verification code",
            ),
            AuthError::Jwt(detail) => ApiError::internal(format!("jwt failure: {detail}")),
            AuthError::Store(detail) => ApiError::internal(format!("auth store failure: {detail}")),
        }
    }
}

impl From<EngineError> for AuthError {
    fn from(e: EngineError) -> Self {
        AuthError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_password_is_422() {
        let api = AuthError::WeakPassword("too short".into()).into_api();
        assert_eq!(api.status, 422);
        assert_eq!(api.code, "weak_password");
    }

    #[test]
    fn used_refresh_token_is_invalid_grant() {
        let api = AuthError::InvalidRefreshToken.into_api();
        assert_eq!(api.status, 400);
        assert_eq!(api.code, "invalid_grant");
    }
}
