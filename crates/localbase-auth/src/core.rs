//! The authentication state machine.
//!
//! Every auth endpoint is a thin adapter over one of these operations.
//! The core owns credential checks, token issuance and rotation, the
//! one-time-token flows, and MFA. It talks to persistence only through
//! the [`AuthStore`] trait and never sees the engine itself.

use crate::error::AuthError;
use crate::jwt::JwtCodec;
use crate::models::{
    AuditEntry, FactorStatus, FactorType, MfaChallenge, MfaFactor, Session, TokenResponse, User,
};
use crate::password;
use crate::store::{AuthStore, RefreshRotation};
use crate::totp;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use localbase_core::AuthSettings;
use rand::RngCore;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::LazyLock;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Lifetime of an MFA challenge.
const CHALLENGE_TTL_SECS: i64 = 300;

/// A throwaway hash used to equalise timing when the user does not
/// exist.
static DUMMY_HASH: LazyLock<String> = LazyLock::new(|| {
    password::hash_password("timing-equalisation-dummy").unwrap_or_default()
});

#[derive(Debug, Default, Deserialize)]
pub struct SignUpRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug)]
pub struct SignUpOutcome {
    pub user: User,
    /// Absent when the account still awaits confirmation.
    pub session: Option<TokenResponse>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PasswordGrant {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutScope {
    Local,
    Others,
    Global,
}

impl SignOutScope {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("others") => SignOutScope::Others,
            Some("global") => SignOutScope::Global,
            _ => SignOutScope::Local,
        }
    }
}

#[derive(Debug)]
pub struct EnrollOutcome {
    pub factor: MfaFactor,
    /// TOTP enrolment exposes the secret and provisioning URI once.
    pub totp_secret: Option<String>,
    pub totp_uri: Option<String>,
}

#[derive(Debug)]
pub struct ChallengeOutcome {
    pub challenge: MfaChallenge,
    pub expires_at: DateTime<Utc>,
    /// Phone factors surface the code locally; there is no SMS gateway.
    pub sms_code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdminUserRequest {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub email_confirm: Option<bool>,
    pub user_metadata: Option<Value>,
    pub app_metadata: Option<Value>,
}

pub struct AuthCore {
    store: std::sync::Arc<dyn AuthStore>,
    jwt: std::sync::Arc<JwtCodec>,
    settings: AuthSettings,
    refresh_failures: Mutex<HashMap<Uuid, VecDeque<Instant>>>,
}

impl AuthCore {
    pub fn new(
        store: std::sync::Arc<dyn AuthStore>,
        jwt: std::sync::Arc<JwtCodec>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            store,
            jwt,
            settings,
            refresh_failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn jwt(&self) -> &JwtCodec {
        &self.jwt
    }

    // -----------------------------------------------------------------
    // Sign-up and sign-in
    // -----------------------------------------------------------------

    pub async fn sign_up(&self, req: SignUpRequest) -> Result<SignUpOutcome, AuthError> {
        let now = Utc::now();
        let anonymous = req.email.is_none() && req.phone.is_none();

        let mut user = User {
            id: Uuid::new_v4(),
            aud: "authenticated".into(),
            role: "authenticated".into(),
            email: None,
            phone: None,
            encrypted_password: None,
            email_confirmed_at: None,
            phone_confirmed_at: None,
            last_sign_in_at: Some(now),
            confirmation_token: None,
            confirmation_sent_at: None,
            recovery_token: None,
            recovery_sent_at: None,
            email_change: None,
            email_change_token: None,
            phone_change: None,
            phone_change_token: None,
            app_metadata: serde_json::json!({ "provider": provider_name(&req), "providers": [provider_name(&req)] }),
            user_metadata: req.data.clone().unwrap_or_else(|| Value::Object(Default::default())),
            is_anonymous: anonymous,
            created_at: now,
            updated_at: now,
        };

        if !anonymous {
            if let Some(email) = &req.email {
                let email = normalize_email(email)?;
                if self.store.user_by_email(&email).await?.is_some() {
                    return Err(AuthError::UserExists);
                }
                user.email = Some(email);
            }
            if let Some(phone) = &req.phone {
                let phone = normalize_phone(phone)?;
                if self.store.user_by_phone(&phone).await?.is_some() {
                    return Err(AuthError::PhoneExists);
                }
                user.phone = Some(phone);
            }
            let password = req
                .password
                .as_deref()
                .ok_or_else(|| AuthError::MissingField("password is required".into()))?;
            password::validate_strength(password, self.settings.password_min_length)?;
            user.encrypted_password = Some(password::hash_password(password)?);

            if self.settings.auto_confirm {
                if user.email.is_some() {
                    user.email_confirmed_at = Some(now);
                }
                if user.phone.is_some() {
                    user.phone_confirmed_at = Some(now);
                }
            } else {
                user.confirmation_token = Some(new_opaque_token());
                user.confirmation_sent_at = Some(now);
            }
        }

        self.store.create_user(&user).await?;
        self.audit("user_signedup", Some(user.id)).await;

        let session = if anonymous || user.is_confirmed() {
            Some(self.issue_session(&user).await?)
        } else {
            None
        };
        Ok(SignUpOutcome { user, session })
    }

    pub async fn sign_in_password(&self, grant: PasswordGrant) -> Result<TokenResponse, AuthError> {
        let password = grant
            .password
            .as_deref()
            .ok_or_else(|| AuthError::MissingField("password is required".into()))?;

        let user = match (&grant.email, &grant.phone) {
            (Some(email), _) => self.store.user_by_email(email.trim()).await?,
            (None, Some(phone)) => self.store.user_by_phone(phone.trim()).await?,
            (None, None) => {
                return Err(AuthError::MissingField("email or phone is required".into()));
            }
        };

        // Verify against a dummy hash when the user is unknown so both
        // paths cost the same.
        let verified = match &user {
            Some(user) => match &user.encrypted_password {
                Some(hash) => password::verify_password(password, hash),
                None => {
                    password::verify_password(password, &DUMMY_HASH);
                    false
                }
            },
            None => {
                password::verify_password(password, &DUMMY_HASH);
                false
            }
        };
        let Some(mut user) = user else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verified {
            self.audit("user_signin_failed", Some(user.id)).await;
            return Err(AuthError::InvalidCredentials);
        }
        if !user.is_confirmed() && !user.is_anonymous {
            return Err(AuthError::EmailNotConfirmed);
        }

        user.last_sign_in_at = Some(Utc::now());
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;
        self.audit("user_signedin", Some(user.id)).await;
        self.issue_session(&user).await
    }

    // -----------------------------------------------------------------
    // Refresh rotation
    // -----------------------------------------------------------------

    pub async fn refresh(&self, presented: &str) -> Result<TokenResponse, AuthError> {
        if presented.is_empty() {
            return Err(AuthError::MissingField("refresh_token is required".into()));
        }

        let replacement = new_opaque_token();
        let rotation = match self
            .store
            .rotate_refresh_token(presented, &replacement)
            .await
        {
            Ok(rotation) => rotation,
            // A concurrent rotation can trip the unique token constraint;
            // retry once with a fresh replacement, then give up.
            Err(AuthError::Store(first)) => {
                tracing::debug!(error = %first, "refresh rotation retry");
                self.store
                    .rotate_refresh_token(presented, &new_opaque_token())
                    .await?
            }
            Err(e) => return Err(e),
        };

        match rotation {
            RefreshRotation::Rotated { old, new } => {
                self.clear_refresh_failures(old.session_id);
                if self.store.session_by_id(old.session_id).await?.is_none() {
                    return Err(AuthError::InvalidRefreshToken);
                }
                let user = self
                    .store
                    .user_by_id(old.user_id)
                    .await?
                    .ok_or(AuthError::InvalidRefreshToken)?;
                let (access_token, claims) = self.jwt.sign_user(&user, old.session_id)?;
                self.audit("token_refreshed", Some(user.id)).await;
                Ok(TokenResponse {
                    access_token,
                    token_type: "bearer",
                    expires_in: self.jwt.expiry_secs(),
                    expires_at: claims.exp,
                    refresh_token: new.token,
                    user,
                })
            }
            RefreshRotation::NotFound => Err(AuthError::InvalidRefreshToken),
            RefreshRotation::Reused { session_id } => {
                if self.record_refresh_failure(session_id) {
                    tracing::warn!(%session_id, "revoking session after repeated refresh reuse");
                    let _ = self.store.delete_session(session_id).await;
                    self.audit("session_revoked", None).await;
                }
                Err(AuthError::InvalidRefreshToken)
            }
        }
    }

    /// Returns true when the failure count within the window crossed the
    /// configured limit and the session must be revoked.
    fn record_refresh_failure(&self, session_id: Uuid) -> bool {
        let window = Duration::from_secs(self.settings.refresh_failure_window_secs);
        let now = Instant::now();
        let mut failures = match self.refresh_failures.lock() {
            Ok(failures) => failures,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = failures.entry(session_id).or_default();
        entry.push_back(now);
        while entry
            .front()
            .is_some_and(|t| now.duration_since(*t) > window)
        {
            entry.pop_front();
        }
        if entry.len() as u32 >= self.settings.refresh_failure_limit {
            failures.remove(&session_id);
            true
        } else {
            false
        }
    }

    fn clear_refresh_failures(&self, session_id: Uuid) {
        if let Ok(mut failures) = self.refresh_failures.lock() {
            failures.remove(&session_id);
        }
    }

    // -----------------------------------------------------------------
    // Sign-out and user management
    // -----------------------------------------------------------------

    pub async fn sign_out(
        &self,
        user_id: Uuid,
        session_id: Option<Uuid>,
        scope: SignOutScope,
    ) -> Result<(), AuthError> {
        match scope {
            SignOutScope::Local => {
                if let Some(session_id) = session_id {
                    self.store.delete_session(session_id).await?;
                }
            }
            SignOutScope::Others => {
                self.store
                    .delete_sessions_for_user(user_id, session_id)
                    .await?;
            }
            SignOutScope::Global => {
                self.store.delete_sessions_for_user(user_id, None).await?;
            }
        }
        self.audit("user_signedout", Some(user_id)).await;
        Ok(())
    }

    pub async fn get_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        self.store
            .user_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    pub async fn current_session(&self, session_id: Uuid) -> Result<Option<Session>, AuthError> {
        self.store.session_by_id(session_id).await
    }

    pub async fn update_user(
        &self,
        user_id: Uuid,
        req: UpdateUserRequest,
    ) -> Result<User, AuthError> {
        let mut user = self.get_user(user_id).await?;
        let now = Utc::now();

        if let Some(email) = &req.email {
            let email = normalize_email(email)?;
            if user.email.as_deref() != Some(email.as_str()) {
                if let Some(existing) = self.store.user_by_email(&email).await? {
                    if existing.id != user.id {
                        return Err(AuthError::UserExists);
                    }
                }
                if self.settings.auto_confirm {
                    user.email = Some(email);
                    user.email_confirmed_at = Some(now);
                } else {
                    user.email_change = Some(email);
                    user.email_change_token = Some(new_opaque_token());
                }
            }
        }
        if let Some(phone) = &req.phone {
            let phone = normalize_phone(phone)?;
            if user.phone.as_deref() != Some(phone.as_str()) {
                if let Some(existing) = self.store.user_by_phone(&phone).await? {
                    if existing.id != user.id {
                        return Err(AuthError::PhoneExists);
                    }
                }
                if self.settings.auto_confirm {
                    user.phone = Some(phone);
                    user.phone_confirmed_at = Some(now);
                } else {
                    user.phone_change = Some(phone);
                    user.phone_change_token = Some(new_opaque_token());
                }
            }
        }
        if let Some(new_password) = &req.password {
            password::validate_strength(new_password, self.settings.password_min_length)?;
            user.encrypted_password = Some(password::hash_password(new_password)?);
        }
        if let Some(Value::Object(updates)) = &req.data {
            let metadata = user
                .user_metadata
                .as_object_mut();
            if let Some(metadata) = metadata {
                for (key, value) in updates {
                    metadata.insert(key.clone(), value.clone());
                }
            } else {
                user.user_metadata = Value::Object(updates.clone());
            }
        }

        user.updated_at = now;
        self.store.update_user(&user).await?;
        self.audit("user_modified", Some(user.id)).await;
        Ok(user)
    }

    // -----------------------------------------------------------------
    // One-time-token flows
    // -----------------------------------------------------------------

    /// Record a recovery token. With no mail gateway in a local install,
    /// the token is handed back to the caller, which is what the
    /// verification step echoes.
    pub async fn recover(&self, email: &str) -> Result<String, AuthError> {
        let mut user = self
            .store
            .user_by_email(email.trim())
            .await?
            .ok_or(AuthError::UserNotFound)?;
        let token = new_opaque_token();
        user.recovery_token = Some(token.clone());
        user.recovery_sent_at = Some(Utc::now());
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;
        self.audit("user_recovery_requested", Some(user.id)).await;
        Ok(token)
    }

    /// Issue a passwordless one-time token, creating the user on first
    /// contact when allowed.
    pub async fn send_otp(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
        create_user: bool,
    ) -> Result<String, AuthError> {
        let mut user = match (email, phone) {
            (Some(email), _) => {
                let email = normalize_email(email)?;
                match self.store.user_by_email(&email).await? {
                    Some(user) => user,
                    None if create_user => {
                        self.sign_up_passwordless(Some(email.clone()), None).await?
                    }
                    None => return Err(AuthError::UserNotFound),
                }
            }
            (None, Some(phone)) => {
                let phone = normalize_phone(phone)?;
                match self.store.user_by_phone(&phone).await? {
                    Some(user) => user,
                    None if create_user => {
                        self.sign_up_passwordless(None, Some(phone.clone())).await?
                    }
                    None => return Err(AuthError::UserNotFound),
                }
            }
            (None, None) => {
                return Err(AuthError::MissingField("email or phone is required".into()));
            }
        };

        let token = new_opaque_token();
        user.confirmation_token = Some(token.clone());
        user.confirmation_sent_at = Some(Utc::now());
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;
        self.audit("user_otp_requested", Some(user.id)).await;
        Ok(token)
    }

    async fn sign_up_passwordless(
        &self,
        email: Option<String>,
        phone: Option<String>,
    ) -> Result<User, AuthError> {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            aud: "authenticated".into(),
            role: "authenticated".into(),
            email,
            phone,
            encrypted_password: None,
            email_confirmed_at: None,
            phone_confirmed_at: None,
            last_sign_in_at: None,
            confirmation_token: None,
            confirmation_sent_at: None,
            recovery_token: None,
            recovery_sent_at: None,
            email_change: None,
            email_change_token: None,
            phone_change: None,
            phone_change_token: None,
            app_metadata: serde_json::json!({ "provider": "otp", "providers": ["otp"] }),
            user_metadata: Value::Object(Default::default()),
            is_anonymous: false,
            created_at: now,
            updated_at: now,
        };
        self.store.create_user(&user).await?;
        self.audit("user_signedup", Some(user.id)).await;
        Ok(user)
    }

    /// Re-issue the pending one-time token for a signup or change flow.
    pub async fn resend(
        &self,
        email: Option<&str>,
        phone: Option<&str>,
    ) -> Result<String, AuthError> {
        let mut user = match (email, phone) {
            (Some(email), _) => self
                .store
                .user_by_email(email.trim())
                .await?
                .ok_or(AuthError::UserNotFound)?,
            (None, Some(phone)) => self
                .store
                .user_by_phone(phone.trim())
                .await?
                .ok_or(AuthError::UserNotFound)?,
            (None, None) => {
                return Err(AuthError::MissingField("email or phone is required".into()));
            }
        };
        let token = new_opaque_token();
        user.confirmation_token = Some(token.clone());
        user.confirmation_sent_at = Some(Utc::now());
        user.updated_at = Utc::now();
        self.store.update_user(&user).await?;
        self.audit("token_resent", Some(user.id)).await;
        Ok(token)
    }

    /// Consume a one-time token of the given kind.
    pub async fn verify(&self, kind: &str, token: &str) -> Result<TokenResponse, AuthError> {
        let now = Utc::now();
        let ttl = ChronoDuration::seconds(self.settings.otp_expiry_secs as i64);

        let mut user = match kind {
            "signup" | "magiclink" | "email" | "sms" | "otp" => {
                let user = self
                    .store
                    .user_by_confirmation_token(token)
                    .await?
                    .ok_or(AuthError::TokenNotFound)?;
                expire_check(user.confirmation_sent_at, ttl, now)?;
                user
            }
            "recovery" => {
                let user = self
                    .store
                    .user_by_recovery_token(token)
                    .await?
                    .ok_or(AuthError::TokenNotFound)?;
                expire_check(user.recovery_sent_at, ttl, now)?;
                user
            }
            "email_change" => self
                .store
                .user_by_email_change_token(token)
                .await?
                .ok_or(AuthError::TokenNotFound)?,
            "phone_change" => self
                .store
                .user_by_phone_change_token(token)
                .await?
                .ok_or(AuthError::TokenNotFound)?,
            other => {
                return Err(AuthError::MissingField(format!(
                    "unknown verification type: {other}"
                )));
            }
        };

        match kind {
            "signup" | "magiclink" | "email" | "otp" => {
                user.email_confirmed_at = Some(now);
                user.confirmation_token = None;
                user.confirmation_sent_at = None;
            }
            "sms" => {
                user.phone_confirmed_at = Some(now);
                user.confirmation_token = None;
                user.confirmation_sent_at = None;
            }
            "recovery" => {
                user.recovery_token = None;
                user.recovery_sent_at = None;
            }
            "email_change" => {
                user.email = user.email_change.take();
                user.email_confirmed_at = Some(now);
                user.email_change_token = None;
            }
            "phone_change" => {
                user.phone = user.phone_change.take();
                user.phone_confirmed_at = Some(now);
                user.phone_change_token = None;
            }
            _ => {}
        }

        user.last_sign_in_at = Some(now);
        user.updated_at = now;
        self.store.update_user(&user).await?;
        self.audit("user_verified", Some(user.id)).await;
        self.issue_session(&user).await
    }

    // -----------------------------------------------------------------
    // MFA
    // -----------------------------------------------------------------

    pub async fn enroll_factor(
        &self,
        user_id: Uuid,
        factor_type: FactorType,
        friendly_name: Option<String>,
        phone: Option<String>,
    ) -> Result<EnrollOutcome, AuthError> {
        let user = self.get_user(user_id).await?;
        let now = Utc::now();
        let mut factor = MfaFactor {
            id: Uuid::new_v4(),
            user_id,
            factor_type,
            friendly_name,
            secret: None,
            phone: None,
            status: FactorStatus::Unverified,
            created_at: now,
            updated_at: now,
        };

        let (totp_secret, totp_uri) = match factor_type {
            FactorType::Totp => {
                let secret = totp::generate_secret();
                let account = user.email.clone().unwrap_or_else(|| user.id.to_string());
                let uri = totp::provisioning_uri(&secret, &account, "localbase");
                factor.secret = Some(secret.clone());
                (Some(secret), Some(uri))
            }
            FactorType::Phone => {
                let phone = phone
                    .ok_or_else(|| AuthError::MissingField("phone is required".into()))?;
                factor.phone = Some(normalize_phone(&phone)?);
                (None, None)
            }
        };

        self.store.create_factor(&factor).await?;
        self.audit("mfa_factor_enrolled", Some(user_id)).await;
        Ok(EnrollOutcome {
            factor,
            totp_secret,
            totp_uri,
        })
    }

    pub async fn list_factors(&self, user_id: Uuid) -> Result<Vec<MfaFactor>, AuthError> {
        self.store.factors_for_user(user_id).await
    }

    pub async fn delete_factor(&self, user_id: Uuid, factor_id: Uuid) -> Result<(), AuthError> {
        let factor = self.owned_factor(user_id, factor_id).await?;
        self.store.delete_factor(factor.id).await?;
        self.audit("mfa_factor_unenrolled", Some(user_id)).await;
        Ok(())
    }

    pub async fn challenge_factor(
        &self,
        user_id: Uuid,
        factor_id: Uuid,
    ) -> Result<ChallengeOutcome, AuthError> {
        let factor = self.owned_factor(user_id, factor_id).await?;
        let now = Utc::now();
        let sms_code = match factor.factor_type {
            FactorType::Phone => Some(new_sms_code()),
            FactorType::Totp => None,
        };
        let challenge = MfaChallenge {
            id: Uuid::new_v4(),
            factor_id: factor.id,
            otp_code: sms_code.clone(),
            verified_at: None,
            created_at: now,
        };
        self.store.create_challenge(&challenge).await?;
        Ok(ChallengeOutcome {
            expires_at: now + ChronoDuration::seconds(CHALLENGE_TTL_SECS),
            challenge,
            sms_code,
        })
    }

    pub async fn verify_factor(
        &self,
        user_id: Uuid,
        factor_id: Uuid,
        challenge_id: Option<Uuid>,
        code: &str,
    ) -> Result<MfaFactor, AuthError> {
        let mut factor = self.owned_factor(user_id, factor_id).await?;
        let now = Utc::now();

        match factor.factor_type {
            FactorType::Totp => {
                let secret = factor
                    .secret
                    .as_deref()
                    .ok_or(AuthError::MfaVerificationFailed)?;
                if !totp::verify(secret, code, now.timestamp() as u64) {
                    self.audit("mfa_verification_failed", Some(user_id)).await;
                    return Err(AuthError::MfaVerificationFailed);
                }
            }
            FactorType::Phone => {
                let challenge_id = challenge_id.ok_or(AuthError::ChallengeExpired)?;
                let challenge = self
                    .store
                    .challenge_by_id(challenge_id)
                    .await?
                    .filter(|c| c.factor_id == factor.id && c.verified_at.is_none())
                    .ok_or(AuthError::ChallengeExpired)?;
                if now - challenge.created_at > ChronoDuration::seconds(CHALLENGE_TTL_SECS) {
                    return Err(AuthError::ChallengeExpired);
                }
                let expected = challenge
                    .otp_code
                    .as_deref()
                    .ok_or(AuthError::MfaVerificationFailed)?;
                let matches: bool = expected.as_bytes().ct_eq(code.as_bytes()).into();
                if !matches {
                    self.audit("mfa_verification_failed", Some(user_id)).await;
                    return Err(AuthError::MfaVerificationFailed);
                }
            }
        }

        if let Some(challenge_id) = challenge_id {
            self.store.complete_challenge(challenge_id, now).await?;
        }
        self.store
            .set_factor_status(factor.id, FactorStatus::Verified)
            .await?;
        factor.status = FactorStatus::Verified;
        factor.updated_at = now;
        self.audit("mfa_factor_verified", Some(user_id)).await;
        Ok(factor)
    }

    async fn owned_factor(&self, user_id: Uuid, factor_id: Uuid) -> Result<MfaFactor, AuthError> {
        self.store
            .factor_by_id(factor_id)
            .await?
            .filter(|f| f.user_id == user_id)
            .ok_or(AuthError::FactorNotFound)
    }

    // -----------------------------------------------------------------
    // Admin surface
    // -----------------------------------------------------------------

    pub async fn admin_list_users(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<User>, u64), AuthError> {
        let per_page = per_page.clamp(1, 1000);
        let offset = page.saturating_sub(1) * per_page;
        let users = self.store.list_users(per_page, offset).await?;
        let total = self.store.count_users().await?;
        Ok((users, total))
    }

    pub async fn admin_create_user(&self, req: AdminUserRequest) -> Result<User, AuthError> {
        let confirm = req.email_confirm.unwrap_or(true) || self.settings.auto_confirm;
        let outcome = self
            .sign_up(SignUpRequest {
                email: req.email,
                phone: req.phone,
                password: req.password,
                data: req.user_metadata,
            })
            .await?;
        let mut user = outcome.user;
        if confirm && !user.is_confirmed() {
            user.email_confirmed_at = Some(Utc::now());
            user.confirmation_token = None;
            self.store.update_user(&user).await?;
        }
        if let Some(app_metadata) = req.app_metadata {
            user.app_metadata = app_metadata;
            self.store.update_user(&user).await?;
        }
        Ok(user)
    }

    pub async fn admin_update_user(
        &self,
        id: Uuid,
        req: AdminUserRequest,
    ) -> Result<User, AuthError> {
        let mut user = self
            .update_user(
                id,
                UpdateUserRequest {
                    email: req.email,
                    phone: req.phone,
                    password: req.password,
                    data: req.user_metadata,
                },
            )
            .await?;
        if req.email_confirm == Some(true) && user.email_confirmed_at.is_none() {
            user.email_confirmed_at = Some(Utc::now());
            self.store.update_user(&user).await?;
        }
        if let Some(app_metadata) = req.app_metadata {
            user.app_metadata = app_metadata;
            self.store.update_user(&user).await?;
        }
        Ok(user)
    }

    pub async fn admin_delete_user(&self, id: Uuid) -> Result<(), AuthError> {
        if !self.store.delete_user(id).await? {
            return Err(AuthError::UserNotFound);
        }
        self.audit("user_deleted", Some(id)).await;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    async fn issue_session(&self, user: &User) -> Result<TokenResponse, AuthError> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: user.id,
            created_at: now,
            updated_at: now,
            not_after: None,
            user_agent: None,
            ip: None,
        };
        self.store.create_session(&session).await?;
        let refresh = self
            .store
            .create_refresh_token(&new_opaque_token(), user.id, session.id)
            .await?;
        let (access_token, claims) = self.jwt.sign_user(user, session.id)?;
        Ok(TokenResponse {
            access_token,
            token_type: "bearer",
            expires_in: self.jwt.expiry_secs(),
            expires_at: claims.exp,
            refresh_token: refresh.token,
            user: user.clone(),
        })
    }

    async fn audit(&self, action: &str, actor: Option<Uuid>) {
        let entry = AuditEntry::new(action, actor);
        if let Err(e) = self.store.insert_audit(&entry).await {
            tracing::warn!(action, error = %e, "failed to write audit entry");
        }
    }
}

fn provider_name(req: &SignUpRequest) -> &'static str {
    if req.email.is_none() && req.phone.is_none() {
        "anonymous"
    } else if req.phone.is_some() && req.email.is_none() {
        "phone"
    } else {
        "email"
    }
}

fn expire_check(
    sent_at: Option<DateTime<Utc>>,
    ttl: ChronoDuration,
    now: DateTime<Utc>,
) -> Result<(), AuthError> {
    match sent_at {
        Some(sent) if now - sent <= ttl => Ok(()),
        Some(_) => Err(AuthError::TokenExpired),
        None => Ok(()),
    }
}

fn normalize_email(raw: &str) -> Result<String, AuthError> {
    let email = raw.trim().to_ascii_lowercase();
    let Some((local, domain)) = email.split_once('@') else {
        return Err(AuthError::InvalidEmail(raw.to_string()));
    };
    if local.is_empty() || domain.is_empty() || email.contains(char::is_whitespace) {
        return Err(AuthError::InvalidEmail(raw.to_string()));
    }
    Ok(email)
}

fn normalize_phone(raw: &str) -> Result<String, AuthError> {
    let phone: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();
    let digits = phone.strip_prefix('+').unwrap_or(&phone);
    if digits.len() < 7 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(AuthError::InvalidPhone(raw.to_string()));
    }
    Ok(phone)
}

/// Opaque random token for refresh tokens and one-time links.
fn new_opaque_token() -> String {
    use base64::Engine;
    let mut bytes = [0u8; 24];
    rand::rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn new_sms_code() -> String {
    let mut bytes = [0u8; 4];
    rand::rng().fill_bytes(&mut bytes);
    format!("{:06}", u32::from_be_bytes(bytes) % 1_000_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_normalisation() {
        assert_eq!(normalize_email(" A@B ").unwrap(), "a@b");
        assert!(normalize_email("nodomain@").is_err());
        assert!(normalize_email("@nolocal").is_err());
        assert!(normalize_email("not-an-email").is_err());
    }

    #[test]
    fn phone_normalisation() {
        assert_eq!(normalize_phone("+1 (555) 123-4567").unwrap(), "+15551234567");
        assert!(normalize_phone("12ab34").is_err());
        assert!(normalize_phone("123").is_err());
    }

    #[test]
    fn opaque_tokens_are_unique_and_urlsafe() {
        let a = new_opaque_token();
        let b = new_opaque_token();
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn sms_codes_are_six_digits() {
        for _ in 0..32 {
            let code = new_sms_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn signout_scope_parsing_defaults_to_local() {
        assert_eq!(SignOutScope::parse(Some("global")), SignOutScope::Global);
        assert_eq!(SignOutScope::parse(Some("others")), SignOutScope::Others);
        assert_eq!(SignOutScope::parse(Some("bogus")), SignOutScope::Local);
        assert_eq!(SignOutScope::parse(None), SignOutScope::Local);
    }

    #[test]
    fn expiry_window() {
        let now = Utc::now();
        let ttl = ChronoDuration::seconds(3600);
        assert!(expire_check(Some(now - ChronoDuration::seconds(10)), ttl, now).is_ok());
        assert!(matches!(
            expire_check(Some(now - ChronoDuration::seconds(7200)), ttl, now),
            Err(AuthError::TokenExpired)
        ));
        assert!(expire_check(None, ttl, now).is_ok());
    }
}
