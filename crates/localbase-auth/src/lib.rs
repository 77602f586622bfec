//! Authentication for Localbase: the JWT codec, password hashing, the
//! auth store over the engine, the sign-up/sign-in/refresh/MFA state
//! machine, and TOTP.

pub mod core;
pub mod error;
pub mod jwt;
pub mod models;
pub mod password;
pub mod store;
pub mod totp;

pub use crate::core::{
    AdminUserRequest, AuthCore, ChallengeOutcome, EnrollOutcome, PasswordGrant, SignOutScope,
    SignUpOutcome, SignUpRequest, UpdateUserRequest,
};
pub use error::AuthError;
pub use jwt::{Claims, JwtCodec};
pub use models::{
    AuditEntry, FactorStatus, FactorType, MfaChallenge, MfaFactor, RefreshToken, Session,
    TokenResponse, User,
};
pub use store::{AuthStore, PgAuthStore, RefreshRotation, SCHEMA_SQL};
