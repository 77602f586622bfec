//! The symmetric JWT codec and credential classification.
//!
//! Access tokens are HS256 with the claim set the client SDKs expect.
//! Role keys (`anon`, `service_role`) are the same format without a
//! subject. Classification never rejects a request: a bad or expired
//! token demotes the request to `anon` and row-level security decides
//! what it may see.

use crate::error::AuthError;
use crate::models::User;
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use localbase_core::{JwtConfig, Role, SessionContext};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    pub role: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub aud: String,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_anonymous: Option<bool>,
}

pub struct JwtCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    expiry_secs: u64,
    kid: String,
}

impl JwtCodec {
    pub fn new(config: &JwtConfig) -> Self {
        // A stable, non-reversible key id derived from the secret.
        let digest = Sha1::digest(config.secret.as_bytes());
        let kid = digest[..8].iter().map(|b| format!("{b:02x}")).collect();
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            issuer: config.issuer.clone(),
            expiry_secs: config.expiry_secs,
            kid,
        }
    }

    pub fn expiry_secs(&self) -> u64 {
        self.expiry_secs
    }

    /// Sign an access token for a signed-in user.
    pub fn sign_user(&self, user: &User, session_id: Uuid) -> Result<(String, Claims), AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Some(user.id.to_string()),
            role: Role::Authenticated.as_str().to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + self.expiry_secs as i64,
            aud: "authenticated".to_string(),
            jti: Uuid::new_v4().to_string(),
            session_id: Some(session_id.to_string()),
            email: user.email.clone(),
            phone: user.phone.clone(),
            app_metadata: Some(user.app_metadata.clone()),
            user_metadata: Some(user.user_metadata.clone()),
            is_anonymous: Some(user.is_anonymous),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Jwt(e.to_string()))?;
        Ok((token, claims))
    }

    /// Sign a subject-less role key (`anon` or `service_role`).
    pub fn sign_role(&self, role: Role) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        // Role keys are long-lived, like the keys the platform hands out
        // at project creation.
        let claims = Claims {
            sub: None,
            role: role.as_str().to_string(),
            iss: self.issuer.clone(),
            iat: now,
            exp: now + 10 * 365 * 24 * 3600,
            aud: "authenticated".to_string(),
            jti: Uuid::new_v4().to_string(),
            session_id: None,
            email: None,
            phone: None,
            app_metadata: None,
            user_metadata: None,
            is_anonymous: None,
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| AuthError::Jwt(e.to_string()))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::Jwt(e.to_string()))
    }

    /// Derive the request's session context from its credentials.
    ///
    /// Order: a bearer role key wins, then a bearer user token, then a
    /// role-bearing `apikey` header. Anything that fails verification
    /// leaves the request as `anon` rather than failing it.
    pub fn classify(&self, bearer: Option<&str>, apikey: Option<&str>) -> SessionContext {
        if let Some(token) = bearer {
            if let Ok(claims) = self.verify(token) {
                if let Some(ctx) = self.context_from_claims(&claims, true) {
                    return ctx;
                }
            } else {
                tracing::debug!("bearer token failed verification, continuing as anon");
            }
        }
        if let Some(token) = apikey {
            if let Ok(claims) = self.verify(token) {
                if let Some(ctx) = self.context_from_claims(&claims, false) {
                    return ctx;
                }
            }
        }
        SessionContext::anon()
    }

    fn context_from_claims(&self, claims: &Claims, allow_user: bool) -> Option<SessionContext> {
        let claims_json = serde_json::to_value(claims).ok()?;
        match (claims.sub.as_deref(), Role::parse(&claims.role)) {
            // Subject-less key with a reserved role, minted by us.
            (None, Some(role @ (Role::Anon | Role::ServiceRole))) if claims.iss == self.issuer => {
                Some(SessionContext {
                    role,
                    user_id: None,
                    claims: claims_json,
                })
            }
            (Some(sub), Some(Role::Authenticated)) if allow_user => {
                let user_id = Uuid::parse_str(sub).ok()?;
                Some(SessionContext::user(user_id, claims_json))
            }
            _ => None,
        }
    }

    /// The JWKS document advertising the symmetric key descriptor. Key
    /// material itself is never exposed.
    pub fn jwks(&self) -> serde_json::Value {
        serde_json::json!({
            "keys": [{
                "kty": "oct",
                "alg": "HS256",
                "use": "sig",
                "kid": self.kid,
            }]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use localbase_core::Role;

    fn codec() -> JwtCodec {
        JwtCodec::new(&JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hs256".into(),
            issuer: "localbase".into(),
            expiry_secs: 3600,
        })
    }

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            aud: "authenticated".into(),
            role: "authenticated".into(),
            email: Some("a@b".into()),
            phone: None,
            encrypted_password: None,
            email_confirmed_at: Some(now),
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
            app_metadata: serde_json::json!({"provider": "email"}),
            user_metadata: serde_json::json!({}),
            is_anonymous: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn verify_of_signed_token_returns_claims() {
        let codec = codec();
        let user = sample_user();
        let session_id = Uuid::new_v4();
        let (token, signed) = codec.sign_user(&user, session_id).unwrap();
        let claims = codec.verify(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some(user.id.to_string().as_str()));
        assert_eq!(claims.role, "authenticated");
        assert_eq!(claims.aud, "authenticated");
        assert_eq!(claims.session_id, signed.session_id);
        assert_eq!(claims.email.as_deref(), Some("a@b"));
    }

    #[test]
    fn user_token_classifies_as_authenticated() {
        let codec = codec();
        let user = sample_user();
        let (token, _) = codec.sign_user(&user, Uuid::new_v4()).unwrap();
        let ctx = codec.classify(Some(&token), None);
        assert_eq!(ctx.role, Role::Authenticated);
        assert_eq!(ctx.user_id, Some(user.id));
    }

    #[test]
    fn service_key_classifies_as_service_role() {
        let codec = codec();
        let key = codec.sign_role(Role::ServiceRole).unwrap();
        let ctx = codec.classify(None, Some(&key));
        assert_eq!(ctx.role, Role::ServiceRole);
        assert!(ctx.user_id.is_none());
    }

    #[test]
    fn garbage_bearer_falls_back_to_anon() {
        let codec = codec();
        let ctx = codec.classify(Some("invalid.token"), None);
        assert_eq!(ctx.role, Role::Anon);

        // A token signed with another secret also demotes to anon.
        let other = JwtCodec::new(&JwtConfig {
            secret: "another-secret-entirely-for-this-test!!".into(),
            issuer: "localbase".into(),
            expiry_secs: 3600,
        });
        let foreign = other.sign_role(Role::ServiceRole).unwrap();
        assert_eq!(codec.classify(Some(&foreign), None).role, Role::Anon);
    }

    #[test]
    fn foreign_issuer_role_key_is_not_trusted() {
        let codec = codec();
        let other = JwtCodec::new(&JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hs256".into(),
            issuer: "someone-else".into(),
            expiry_secs: 3600,
        });
        let key = other.sign_role(Role::ServiceRole).unwrap();
        assert_eq!(codec.classify(Some(&key), None).role, Role::Anon);
    }

    #[test]
    fn jwks_has_key_shape_without_material() {
        let jwks = codec().jwks();
        let key = &jwks["keys"][0];
        assert_eq!(key["kty"], "oct");
        assert_eq!(key["alg"], "HS256");
        assert!(key.get("k").is_none());
    }
}
