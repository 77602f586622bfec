//! Records of the `auth` schema, shaped the way the client SDKs expect
//! them on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub aud: String,
    pub role: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub encrypted_password: Option<String>,
    pub email_confirmed_at: Option<DateTime<Utc>>,
    pub phone_confirmed_at: Option<DateTime<Utc>>,
    pub last_sign_in_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub confirmation_token: Option<String>,
    #[serde(skip_serializing)]
    pub confirmation_sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub recovery_token: Option<String>,
    #[serde(skip_serializing)]
    pub recovery_sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing)]
    pub email_change: Option<String>,
    #[serde(skip_serializing)]
    pub email_change_token: Option<String>,
    #[serde(skip_serializing)]
    pub phone_change: Option<String>,
    #[serde(skip_serializing)]
    pub phone_change_token: Option<String>,
    pub app_metadata: Value,
    pub user_metadata: Value,
    pub is_anonymous: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_confirmed(&self) -> bool {
        self.email_confirmed_at.is_some() || self.phone_confirmed_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub not_after: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub id: i64,
    pub token: String,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorType {
    Totp,
    Phone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorStatus {
    Unverified,
    Verified,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaFactor {
    pub id: Uuid,
    pub user_id: Uuid,
    pub factor_type: FactorType,
    pub friendly_name: Option<String>,
    #[serde(skip_serializing)]
    pub secret: Option<String>,
    pub phone: Option<String>,
    pub status: FactorStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaChallenge {
    pub id: Uuid,
    pub factor_id: Uuid,
    #[serde(skip_serializing)]
    pub otp_code: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// The session payload returned by sign-up, sign-in, refresh, and
/// verification.
#[derive(Debug, Clone, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub expires_at: i64,
    pub refresh_token: String,
    pub user: User,
}

/// One audit log record.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub action: String,
    pub actor_id: Option<Uuid>,
    pub payload: Value,
    pub ip_address: Option<String>,
}

impl AuditEntry {
    pub fn new(action: impl Into<String>, actor_id: Option<Uuid>) -> Self {
        Self {
            action: action.into(),
            actor_id,
            payload: Value::Null,
            ip_address: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}
