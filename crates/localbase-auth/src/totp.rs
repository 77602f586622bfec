//! Time-based one-time passwords (RFC 6238) over HMAC-SHA1, with the
//! base32 secret encoding authenticator apps expect.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use subtle::ConstantTimeEq;

const STEP_SECONDS: u64 = 30;
const DIGITS: u32 = 6;
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

/// Generate a new 160-bit secret, base32-encoded.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    rand::rng().fill_bytes(&mut bytes);
    base32_encode(&bytes)
}

/// The otpauth URI a client enrols into an authenticator app.
pub fn provisioning_uri(secret: &str, account: &str, issuer: &str) -> String {
    format!("otpauth://totp/{issuer}:{account}?secret={secret}&issuer={issuer}&algorithm=SHA1&digits={DIGITS}&period={STEP_SECONDS}")
}

/// Compute the code for a given Unix time.
pub fn code_at(secret: &str, unix_time: u64) -> Option<String> {
    let key = base32_decode(secret)?;
    let counter = unix_time / STEP_SECONDS;
    Some(hotp(&key, counter))
}

/// Check a presented code against the current step and its immediate
/// neighbours (clock skew of one step either way).
pub fn verify(secret: &str, code: &str, unix_time: u64) -> bool {
    let Some(key) = base32_decode(secret) else {
        return false;
    };
    let current = unix_time / STEP_SECONDS;
    for counter in current.saturating_sub(1)..=current + 1 {
        let expected = hotp(&key, counter);
        if expected.as_bytes().ct_eq(code.as_bytes()).into() {
            return true;
        }
    }
    false
}

fn hotp(key: &[u8], counter: u64) -> String {
    type HmacSha1 = Hmac<Sha1>;
    // A 20-byte key always fits; new_from_slice cannot fail for HMAC.
    let mut mac = match HmacSha1::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((u32::from(digest[offset]) & 0x7f) << 24)
        | (u32::from(digest[offset + 1]) << 16)
        | (u32::from(digest[offset + 2]) << 8)
        | u32::from(digest[offset + 3]);
    format!("{:0width$}", binary % 10u32.pow(DIGITS), width = DIGITS as usize)
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u64::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            let index = ((buffer >> bits) & 0x1f) as usize;
            out.push(BASE32_ALPHABET[index] as char);
        }
    }
    if bits > 0 {
        let index = ((buffer << (5 - bits)) & 0x1f) as usize;
        out.push(BASE32_ALPHABET[index] as char);
    }
    out
}

fn base32_decode(encoded: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(encoded.len() * 5 / 8);
    let mut buffer: u64 = 0;
    let mut bits = 0u32;
    for c in encoded.trim_end_matches('=').bytes() {
        let value = match c {
            b'A'..=b'Z' => c - b'A',
            b'a'..=b'z' => c - b'a',
            b'2'..=b'7' => c - b'2' + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | u64::from(value);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B vectors use the ASCII key "12345678901234567890".
    const RFC_SECRET_B32: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn rfc6238_vectors() {
        assert_eq!(code_at(RFC_SECRET_B32, 59).as_deref(), Some("287082"));
        assert_eq!(code_at(RFC_SECRET_B32, 1111111109).as_deref(), Some("081804"));
        assert_eq!(code_at(RFC_SECRET_B32, 1234567890).as_deref(), Some("005924"));
    }

    #[test]
    fn verify_accepts_adjacent_steps() {
        let now = 1111111109u64;
        let previous_step = code_at(RFC_SECRET_B32, now - 30).unwrap();
        let next_step = code_at(RFC_SECRET_B32, now + 30).unwrap();
        assert!(verify(RFC_SECRET_B32, &previous_step, now));
        assert!(verify(RFC_SECRET_B32, &next_step, now));
    }

    #[test]
    fn verify_rejects_distant_steps() {
        let now = 1111111109u64;
        let stale = code_at(RFC_SECRET_B32, now - 120).unwrap();
        assert!(!verify(RFC_SECRET_B32, &stale, now));
        assert!(!verify(RFC_SECRET_B32, "000000", now));
    }

    #[test]
    fn base32_round_trip() {
        let data = b"12345678901234567890";
        let encoded = base32_encode(data);
        assert_eq!(encoded, RFC_SECRET_B32);
        assert_eq!(base32_decode(&encoded).unwrap(), data.to_vec());
    }

    #[test]
    fn generated_secrets_decode_and_differ() {
        let a = generate_secret();
        let b = generate_secret();
        assert_ne!(a, b);
        assert_eq!(base32_decode(&a).unwrap().len(), 20);
    }
}
