//! The auth store: typed data-access helpers over the engine for the
//! `auth` schema.
//!
//! The state machine in [`crate::core`] depends on the [`AuthStore`]
//! trait only; the Postgres-backed implementation is constructed once a
//! project's engine is ready. Store operations run under the service
//! role, outside row-level security.

use crate::error::AuthError;
use crate::models::{
    AuditEntry, FactorStatus, MfaChallenge, MfaFactor, RefreshToken, Session, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use localbase_core::SessionContext;
use localbase_engine::{Engine, QueryOutput};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use uuid::Uuid;

/// DDL for the `auth` schema, applied per project at engine start.
pub const SCHEMA_SQL: &str = r#"
CREATE SCHEMA IF NOT EXISTS auth;

CREATE TABLE IF NOT EXISTS auth.users (
  id uuid PRIMARY KEY,
  aud text NOT NULL DEFAULT 'authenticated',
  role text NOT NULL DEFAULT 'authenticated',
  email text UNIQUE,
  phone text UNIQUE,
  encrypted_password text,
  email_confirmed_at timestamptz,
  phone_confirmed_at timestamptz,
  last_sign_in_at timestamptz,
  confirmation_token text,
  confirmation_sent_at timestamptz,
  recovery_token text,
  recovery_sent_at timestamptz,
  email_change text,
  email_change_token text,
  phone_change text,
  phone_change_token text,
  raw_app_meta_data jsonb NOT NULL DEFAULT '{}'::jsonb,
  raw_user_meta_data jsonb NOT NULL DEFAULT '{}'::jsonb,
  is_anonymous boolean NOT NULL DEFAULT false,
  created_at timestamptz NOT NULL DEFAULT now(),
  updated_at timestamptz NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS auth.sessions (
  id uuid PRIMARY KEY,
  user_id uuid NOT NULL REFERENCES auth.users(id) ON DELETE CASCADE,
  created_at timestamptz NOT NULL DEFAULT now(),
  updated_at timestamptz NOT NULL DEFAULT now(),
  not_after timestamptz,
  user_agent text,
  ip text
);

CREATE TABLE IF NOT EXISTS auth.refresh_tokens (
  id bigserial PRIMARY KEY,
  token text UNIQUE NOT NULL,
  user_id uuid NOT NULL,
  session_id uuid NOT NULL REFERENCES auth.sessions(id) ON DELETE CASCADE,
  revoked boolean NOT NULL DEFAULT false,
  created_at timestamptz NOT NULL DEFAULT now(),
  updated_at timestamptz NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS refresh_tokens_session_idx
  ON auth.refresh_tokens (session_id);

CREATE TABLE IF NOT EXISTS auth.mfa_factors (
  id uuid PRIMARY KEY,
  user_id uuid NOT NULL REFERENCES auth.users(id) ON DELETE CASCADE,
  factor_type text NOT NULL CHECK (factor_type IN ('totp', 'phone')),
  friendly_name text,
  secret text,
  phone text,
  status text NOT NULL DEFAULT 'unverified' CHECK (status IN ('unverified', 'verified')),
  created_at timestamptz NOT NULL DEFAULT now(),
  updated_at timestamptz NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS auth.mfa_challenges (
  id uuid PRIMARY KEY,
  factor_id uuid NOT NULL REFERENCES auth.mfa_factors(id) ON DELETE CASCADE,
  otp_code text,
  verified_at timestamptz,
  created_at timestamptz NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS auth.audit_log_entries (
  id uuid PRIMARY KEY,
  payload jsonb NOT NULL DEFAULT '{}'::jsonb,
  ip_address text,
  created_at timestamptz NOT NULL DEFAULT now()
);
"#;

const USER_COLUMNS: &str = "id, aud, role, email, phone, encrypted_password, \
    email_confirmed_at, phone_confirmed_at, last_sign_in_at, \
    confirmation_token, confirmation_sent_at, recovery_token, recovery_sent_at, \
    email_change, email_change_token, phone_change, phone_change_token, \
    raw_app_meta_data AS app_metadata, raw_user_meta_data AS user_metadata, \
    is_anonymous, created_at, updated_at";

/// Outcome of an atomic refresh-token rotation.
#[derive(Debug)]
pub enum RefreshRotation {
    Rotated {
        old: RefreshToken,
        new: RefreshToken,
    },
    /// No token with that value exists.
    NotFound,
    /// The token exists but was already consumed.
    Reused { session_id: Uuid },
}

#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<(), AuthError>;
    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AuthError>;
    async fn user_by_phone(&self, phone: &str) -> Result<Option<User>, AuthError>;
    async fn user_by_confirmation_token(&self, token: &str) -> Result<Option<User>, AuthError>;
    async fn user_by_recovery_token(&self, token: &str) -> Result<Option<User>, AuthError>;
    async fn user_by_email_change_token(&self, token: &str) -> Result<Option<User>, AuthError>;
    async fn user_by_phone_change_token(&self, token: &str) -> Result<Option<User>, AuthError>;
    async fn update_user(&self, user: &User) -> Result<(), AuthError>;
    async fn delete_user(&self, id: Uuid) -> Result<bool, AuthError>;
    async fn list_users(&self, limit: u64, offset: u64) -> Result<Vec<User>, AuthError>;
    async fn count_users(&self) -> Result<u64, AuthError>;

    async fn create_session(&self, session: &Session) -> Result<(), AuthError>;
    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, AuthError>;
    async fn delete_session(&self, id: Uuid) -> Result<bool, AuthError>;
    /// Delete every session of `user_id`, optionally sparing one.
    async fn delete_sessions_for_user(
        &self,
        user_id: Uuid,
        except: Option<Uuid>,
    ) -> Result<u64, AuthError>;

    async fn create_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<RefreshToken, AuthError>;
    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, AuthError>;
    /// Consume `presented` and issue `replacement` in one transaction.
    async fn rotate_refresh_token(
        &self,
        presented: &str,
        replacement: &str,
    ) -> Result<RefreshRotation, AuthError>;

    async fn create_factor(&self, factor: &MfaFactor) -> Result<(), AuthError>;
    async fn factor_by_id(&self, id: Uuid) -> Result<Option<MfaFactor>, AuthError>;
    async fn factors_for_user(&self, user_id: Uuid) -> Result<Vec<MfaFactor>, AuthError>;
    async fn set_factor_status(&self, id: Uuid, status: FactorStatus) -> Result<(), AuthError>;
    async fn delete_factor(&self, id: Uuid) -> Result<bool, AuthError>;
    async fn create_challenge(&self, challenge: &MfaChallenge) -> Result<(), AuthError>;
    async fn challenge_by_id(&self, id: Uuid) -> Result<Option<MfaChallenge>, AuthError>;
    async fn complete_challenge(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError>;

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<(), AuthError>;
}

/// Postgres-backed store over a project engine.
pub struct PgAuthStore {
    engine: Arc<Engine>,
}

impl PgAuthStore {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    fn query<'a>(
        &'a self,
        sql: &'a str,
        params: Vec<Option<String>>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<QueryOutput, AuthError>> + Send + 'a>> {
        Box::pin(async move {
            let ctx = SessionContext::service_role();
            let mut session = self.engine.session(&ctx).await?;
            let result = session.query(sql, &params).await;
            session.close().await;
            Ok(result?)
        })
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: Vec<Option<String>>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<u64, AuthError>> + Send + 'a>> {
        Box::pin(async move {
            let ctx = SessionContext::service_role();
            let mut session = self.engine.session(&ctx).await?;
            let result = session.execute(sql, &params).await;
            session.close().await;
            Ok(result?)
        })
    }

    fn user_params(user: &User) -> Vec<Option<String>> {
        vec![
            Some(user.id.to_string()),
            Some(user.aud.clone()),
            Some(user.role.clone()),
            user.email.clone(),
            user.phone.clone(),
            user.encrypted_password.clone(),
            user.email_confirmed_at.map(|t| t.to_rfc3339()),
            user.phone_confirmed_at.map(|t| t.to_rfc3339()),
            user.last_sign_in_at.map(|t| t.to_rfc3339()),
            user.confirmation_token.clone(),
            user.confirmation_sent_at.map(|t| t.to_rfc3339()),
            user.recovery_token.clone(),
            user.recovery_sent_at.map(|t| t.to_rfc3339()),
            user.email_change.clone(),
            user.email_change_token.clone(),
            user.phone_change.clone(),
            user.phone_change_token.clone(),
            Some(user.app_metadata.to_string()),
            Some(user.user_metadata.to_string()),
            Some(user.is_anonymous.to_string()),
            Some(user.created_at.to_rfc3339()),
            Some(user.updated_at.to_rfc3339()),
        ]
    }
}

fn decode_one<T: DeserializeOwned>(output: QueryOutput) -> Result<Option<T>, AuthError> {
    match output.rows.into_iter().next() {
        Some(row) => serde_json::from_value(row)
            .map(Some)
            .map_err(|e| AuthError::Store(format!("row decode failed: {e}"))),
        None => Ok(None),
    }
}

fn decode_all<T: DeserializeOwned>(output: QueryOutput) -> Result<Vec<T>, AuthError> {
    output
        .rows
        .into_iter()
        .map(|row| {
            serde_json::from_value(row)
                .map_err(|e| AuthError::Store(format!("row decode failed: {e}")))
        })
        .collect()
}

#[async_trait]
impl AuthStore for PgAuthStore {
    async fn create_user(&self, user: &User) -> Result<(), AuthError> {
        let sql = "INSERT INTO auth.users (\
            id, aud, role, email, phone, encrypted_password, \
            email_confirmed_at, phone_confirmed_at, last_sign_in_at, \
            confirmation_token, confirmation_sent_at, recovery_token, recovery_sent_at, \
            email_change, email_change_token, phone_change, phone_change_token, \
            raw_app_meta_data, raw_user_meta_data, is_anonymous, created_at, updated_at) \
            VALUES ($1::uuid, $2, $3, $4, $5, $6, \
            $7::timestamptz, $8::timestamptz, $9::timestamptz, \
            $10, $11::timestamptz, $12, $13::timestamptz, \
            $14, $15, $16, $17, \
            $18::jsonb, $19::jsonb, $20::boolean, $21::timestamptz, $22::timestamptz)";
        self.execute(sql, Self::user_params(user)).await?;
        Ok(())
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM auth.users WHERE id = $1::uuid");
        decode_one(self.query(&sql, vec![Some(id.to_string())]).await?)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM auth.users WHERE lower(email) = lower($1)");
        decode_one(self.query(&sql, vec![Some(email.to_string())]).await?)
    }

    async fn user_by_phone(&self, phone: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM auth.users WHERE phone = $1");
        decode_one(self.query(&sql, vec![Some(phone.to_string())]).await?)
    }

    async fn user_by_confirmation_token(&self, token: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM auth.users WHERE confirmation_token = $1");
        decode_one(self.query(&sql, vec![Some(token.to_string())]).await?)
    }

    async fn user_by_recovery_token(&self, token: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM auth.users WHERE recovery_token = $1");
        decode_one(self.query(&sql, vec![Some(token.to_string())]).await?)
    }

    async fn user_by_email_change_token(&self, token: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM auth.users WHERE email_change_token = $1");
        decode_one(self.query(&sql, vec![Some(token.to_string())]).await?)
    }

    async fn user_by_phone_change_token(&self, token: &str) -> Result<Option<User>, AuthError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM auth.users WHERE phone_change_token = $1");
        decode_one(self.query(&sql, vec![Some(token.to_string())]).await?)
    }

    async fn update_user(&self, user: &User) -> Result<(), AuthError> {
        let sql = "UPDATE auth.users SET \
            aud = $2, role = $3, email = $4, phone = $5, encrypted_password = $6, \
            email_confirmed_at = $7::timestamptz, phone_confirmed_at = $8::timestamptz, \
            last_sign_in_at = $9::timestamptz, \
            confirmation_token = $10, confirmation_sent_at = $11::timestamptz, \
            recovery_token = $12, recovery_sent_at = $13::timestamptz, \
            email_change = $14, email_change_token = $15, \
            phone_change = $16, phone_change_token = $17, \
            raw_app_meta_data = $18::jsonb, raw_user_meta_data = $19::jsonb, \
            is_anonymous = $20::boolean, created_at = $21::timestamptz, \
            updated_at = $22::timestamptz \
            WHERE id = $1::uuid";
        let affected = self.execute(sql, Self::user_params(user)).await?;
        if affected == 0 {
            return Err(AuthError::UserNotFound);
        }
        Ok(())
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, AuthError> {
        let affected = self
            .execute(
                "DELETE FROM auth.users WHERE id = $1::uuid",
                vec![Some(id.to_string())],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn list_users(&self, limit: u64, offset: u64) -> Result<Vec<User>, AuthError> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM auth.users ORDER BY created_at \
             LIMIT $1::int8 OFFSET $2::int8"
        );
        decode_all(
            self.query(&sql, vec![Some(limit.to_string()), Some(offset.to_string())])
                .await?,
        )
    }

    async fn count_users(&self) -> Result<u64, AuthError> {
        let output = self
            .query("SELECT count(*) AS count FROM auth.users", vec![])
            .await?;
        let count = output
            .rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        Ok(count)
    }

    async fn create_session(&self, session: &Session) -> Result<(), AuthError> {
        let sql = "INSERT INTO auth.sessions \
            (id, user_id, created_at, updated_at, not_after, user_agent, ip) \
            VALUES ($1::uuid, $2::uuid, $3::timestamptz, $4::timestamptz, \
            $5::timestamptz, $6, $7)";
        self.execute(
            sql,
            vec![
                Some(session.id.to_string()),
                Some(session.user_id.to_string()),
                Some(session.created_at.to_rfc3339()),
                Some(session.updated_at.to_rfc3339()),
                session.not_after.map(|t| t.to_rfc3339()),
                session.user_agent.clone(),
                session.ip.clone(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn session_by_id(&self, id: Uuid) -> Result<Option<Session>, AuthError> {
        decode_one(
            self.query(
                "SELECT id, user_id, created_at, updated_at, not_after, user_agent, ip \
                 FROM auth.sessions WHERE id = $1::uuid",
                vec![Some(id.to_string())],
            )
            .await?,
        )
    }

    async fn delete_session(&self, id: Uuid) -> Result<bool, AuthError> {
        let affected = self
            .execute(
                "DELETE FROM auth.sessions WHERE id = $1::uuid",
                vec![Some(id.to_string())],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn delete_sessions_for_user(
        &self,
        user_id: Uuid,
        except: Option<Uuid>,
    ) -> Result<u64, AuthError> {
        match except {
            Some(keep) => {
                self.execute(
                    "DELETE FROM auth.sessions WHERE user_id = $1::uuid AND id <> $2::uuid",
                    vec![Some(user_id.to_string()), Some(keep.to_string())],
                )
                .await
            }
            None => {
                self.execute(
                    "DELETE FROM auth.sessions WHERE user_id = $1::uuid",
                    vec![Some(user_id.to_string())],
                )
                .await
            }
        }
    }

    async fn create_refresh_token(
        &self,
        token: &str,
        user_id: Uuid,
        session_id: Uuid,
    ) -> Result<RefreshToken, AuthError> {
        self.execute(
            "INSERT INTO auth.refresh_tokens (token, user_id, session_id) \
             VALUES ($1, $2::uuid, $3::uuid)",
            vec![
                Some(token.to_string()),
                Some(user_id.to_string()),
                Some(session_id.to_string()),
            ],
        )
        .await?;
        self.find_refresh_token(token)
            .await?
            .ok_or_else(|| AuthError::Store("refresh token insert did not persist".into()))
    }

    async fn find_refresh_token(&self, token: &str) -> Result<Option<RefreshToken>, AuthError> {
        decode_one(
            self.query(
                "SELECT id, token, user_id, session_id, revoked, created_at, updated_at \
                 FROM auth.refresh_tokens WHERE token = $1",
                vec![Some(token.to_string())],
            )
            .await?,
        )
    }

    async fn rotate_refresh_token(
        &self,
        presented: &str,
        replacement: &str,
    ) -> Result<RefreshRotation, AuthError> {
        let ctx = SessionContext::service_role();
        let mut session = self.engine.session(&ctx).await?;

        let result: Result<RefreshRotation, localbase_engine::EngineError> = async {
            session.execute("BEGIN", &[]).await?;
            let found = session
                .query(
                    "SELECT id, token, user_id, session_id, revoked, created_at, updated_at \
                     FROM auth.refresh_tokens WHERE token = $1 FOR UPDATE",
                    &[Some(presented.to_string())],
                )
                .await?;
            let old: Option<RefreshToken> = decode_one(found).map_err(engine_wrap)?;

            let Some(old) = old else {
                session.execute("ROLLBACK", &[]).await?;
                return Ok(RefreshRotation::NotFound);
            };
            if old.revoked {
                session.execute("ROLLBACK", &[]).await?;
                return Ok(RefreshRotation::Reused {
                    session_id: old.session_id,
                });
            }

            session
                .execute(
                    "UPDATE auth.refresh_tokens SET revoked = true, updated_at = now() \
                     WHERE id = $1::int8",
                    &[Some(old.id.to_string())],
                )
                .await?;
            session
                .execute(
                    "INSERT INTO auth.refresh_tokens (token, user_id, session_id) \
                     VALUES ($1, $2::uuid, $3::uuid)",
                    &[
                        Some(replacement.to_string()),
                        Some(old.user_id.to_string()),
                        Some(old.session_id.to_string()),
                    ],
                )
                .await?;
            let inserted = session
                .query(
                    "SELECT id, token, user_id, session_id, revoked, created_at, updated_at \
                     FROM auth.refresh_tokens WHERE token = $1",
                    &[Some(replacement.to_string())],
                )
                .await?;
            let new: RefreshToken = decode_one(inserted)
                .map_err(engine_wrap)?
                .ok_or_else(|| engine_wrap(AuthError::Store("rotation insert did not persist".into())))?;
            session.execute("COMMIT", &[]).await?;
            Ok(RefreshRotation::Rotated { old, new })
        }
        .await;

        if result.is_err() {
            let _ = session.execute("ROLLBACK", &[]).await;
        }
        session.close().await;
        result.map_err(AuthError::from)
    }

    async fn create_factor(&self, factor: &MfaFactor) -> Result<(), AuthError> {
        let factor_type = serde_json::to_value(factor.factor_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "totp".to_string());
        let status = serde_json::to_value(factor.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unverified".to_string());
        self.execute(
            "INSERT INTO auth.mfa_factors \
             (id, user_id, factor_type, friendly_name, secret, phone, status, created_at, updated_at) \
             VALUES ($1::uuid, $2::uuid, $3, $4, $5, $6, $7, $8::timestamptz, $9::timestamptz)",
            vec![
                Some(factor.id.to_string()),
                Some(factor.user_id.to_string()),
                Some(factor_type),
                factor.friendly_name.clone(),
                factor.secret.clone(),
                factor.phone.clone(),
                Some(status),
                Some(factor.created_at.to_rfc3339()),
                Some(factor.updated_at.to_rfc3339()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn factor_by_id(&self, id: Uuid) -> Result<Option<MfaFactor>, AuthError> {
        decode_one(
            self.query(
                "SELECT id, user_id, factor_type, friendly_name, secret, phone, status, \
                 created_at, updated_at FROM auth.mfa_factors WHERE id = $1::uuid",
                vec![Some(id.to_string())],
            )
            .await?,
        )
    }

    async fn factors_for_user(&self, user_id: Uuid) -> Result<Vec<MfaFactor>, AuthError> {
        decode_all(
            self.query(
                "SELECT id, user_id, factor_type, friendly_name, secret, phone, status, \
                 created_at, updated_at FROM auth.mfa_factors \
                 WHERE user_id = $1::uuid ORDER BY created_at",
                vec![Some(user_id.to_string())],
            )
            .await?,
        )
    }

    async fn set_factor_status(&self, id: Uuid, status: FactorStatus) -> Result<(), AuthError> {
        let status = match status {
            FactorStatus::Unverified => "unverified",
            FactorStatus::Verified => "verified",
        };
        self.execute(
            "UPDATE auth.mfa_factors SET status = $2, updated_at = now() WHERE id = $1::uuid",
            vec![Some(id.to_string()), Some(status.to_string())],
        )
        .await?;
        Ok(())
    }

    async fn delete_factor(&self, id: Uuid) -> Result<bool, AuthError> {
        let affected = self
            .execute(
                "DELETE FROM auth.mfa_factors WHERE id = $1::uuid",
                vec![Some(id.to_string())],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn create_challenge(&self, challenge: &MfaChallenge) -> Result<(), AuthError> {
        self.execute(
            "INSERT INTO auth.mfa_challenges (id, factor_id, otp_code, verified_at, created_at) \
             VALUES ($1::uuid, $2::uuid, $3, $4::timestamptz, $5::timestamptz)",
            vec![
                Some(challenge.id.to_string()),
                Some(challenge.factor_id.to_string()),
                challenge.otp_code.clone(),
                challenge.verified_at.map(|t| t.to_rfc3339()),
                Some(challenge.created_at.to_rfc3339()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn challenge_by_id(&self, id: Uuid) -> Result<Option<MfaChallenge>, AuthError> {
        decode_one(
            self.query(
                "SELECT id, factor_id, otp_code, verified_at, created_at \
                 FROM auth.mfa_challenges WHERE id = $1::uuid",
                vec![Some(id.to_string())],
            )
            .await?,
        )
    }

    async fn complete_challenge(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AuthError> {
        self.execute(
            "UPDATE auth.mfa_challenges SET verified_at = $2::timestamptz WHERE id = $1::uuid",
            vec![Some(id.to_string()), Some(at.to_rfc3339())],
        )
        .await?;
        Ok(())
    }

    async fn insert_audit(&self, entry: &AuditEntry) -> Result<(), AuthError> {
        let payload = serde_json::json!({
            "action": entry.action,
            "actor_id": entry.actor_id.map(|id| id.to_string()),
            "traits": entry.payload,
        });
        self.execute(
            "INSERT INTO auth.audit_log_entries (id, payload, ip_address) \
             VALUES ($1::uuid, $2::jsonb, $3)",
            vec![
                Some(Uuid::new_v4().to_string()),
                Some(payload.to_string()),
                entry.ip_address.clone(),
            ],
        )
        .await?;
        Ok(())
    }
}

/// Keep error types uniform inside the rotation transaction block, which
/// speaks `EngineError` at the session level.
fn engine_wrap(e: AuthError) -> localbase_engine::EngineError {
    localbase_engine::EngineError::Internal(anyhow::anyhow!(e.to_string()))
}
