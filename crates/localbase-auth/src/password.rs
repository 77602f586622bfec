//! Password hashing and strength rules.
//!
//! Argon2id with a fresh random salt per hash. Raw passwords never leave
//! this module: callers hand them in, hashes come out.

use crate::error::AuthError;
use argon2::Argon2;
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};

/// Values rejected outright regardless of length configuration.
const TRIVIAL_PASSWORDS: &[&str] = &[
    "123", "1234", "12345", "123456", "password", "qwerty", "abc123", "letmein", "111111",
];

pub fn validate_strength(password: &str, min_length: usize) -> Result<(), AuthError> {
    if password.is_empty() {
        return Err(AuthError::WeakPassword("password must not be empty".into()));
    }
    if TRIVIAL_PASSWORDS.contains(&password.to_ascii_lowercase().as_str()) {
        return Err(AuthError::WeakPassword(
            "password is on the list of known trivial passwords".into(),
        ));
    }
    if password.chars().count() < min_length {
        return Err(AuthError::WeakPassword(format!(
            "password must be at least {min_length} characters"
        )));
    }
    Ok(())
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Store(format!("password hashing failed: {e}")))
}

/// Constant-time verification; a malformed stored hash verifies as
/// false rather than erroring.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("Password123$").unwrap();
        assert!(verify_password("Password123$", &hash));
        assert!(!verify_password("Password123!", &hash));
    }

    #[test]
    fn salts_are_unique_per_hash() {
        let a = hash_password("Password123$").unwrap();
        let b = hash_password("Password123$").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn trivial_passwords_rejected() {
        assert!(matches!(
            validate_strength("123", 6),
            Err(AuthError::WeakPassword(_))
        ));
        assert!(matches!(
            validate_strength("password", 6),
            Err(AuthError::WeakPassword(_))
        ));
        assert!(matches!(
            validate_strength("", 6),
            Err(AuthError::WeakPassword(_))
        ));
    }

    #[test]
    fn length_rule_follows_configuration() {
        assert!(validate_strength("abcde", 6).is_err());
        assert!(validate_strength("abcdef", 6).is_ok());
    }

    #[test]
    fn garbage_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-phc-string"));
    }
}
