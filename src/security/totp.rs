//! RFC 6238 time-based one-time passwords.
//!
//! Secrets are 20 random bytes, exchanged as unpadded RFC 4648 base32.
//! Codes are 6 digits over a 30 second step, HMAC-SHA1, and validation
//! tolerates one step of clock skew in either direction.

use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

pub const ISSUER: &str = "JATS Task Management";

const SECRET_LEN: usize = 20;
const STEP_SECS: i64 = 30;
const DIGITS: u32 = 6;
const SKEW_STEPS: i64 = 1;
const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

type HmacSha1 = Hmac<Sha1>;

/// Generate a fresh base32 secret.
pub fn generate_secret() -> anyhow::Result<String> {
    let bytes = super::token::random_bytes(SECRET_LEN)?;
    Ok(base32_encode(&bytes))
}

/// `otpauth://totp/<issuer>:<account>?secret=..&issuer=..&algorithm=SHA1&digits=6&period=30`
#[must_use]
pub fn provisioning_uri(secret: &str, account: &str) -> String {
    let label = format!("{ISSUER}:{account}");
    format!(
        "otpauth://totp/{}?secret={secret}&issuer={}&algorithm=SHA1&digits={DIGITS}&period={STEP_SECS}",
        urlencoding::encode(&label),
        urlencoding::encode(ISSUER),
    )
}

/// Compute the code for the step containing `unix_secs`.
pub fn generate_code(secret: &str, unix_secs: i64) -> anyhow::Result<String> {
    let key = base32_decode(secret)
        .ok_or_else(|| anyhow::anyhow!("TOTP secret is not valid base32"))?;
    code_for_counter(&key, unix_secs.div_euclid(STEP_SECS))
        .map_err(|e| anyhow::anyhow!("Invalid TOTP key: {e}"))
}

/// Validate `code` against the current time.
#[must_use]
pub fn validate(secret: &str, code: &str) -> bool {
    validate_at(secret, code, chrono::Utc::now().timestamp())
}

/// Validate `code` for the step at `unix_secs` and its direct neighbours.
#[must_use]
pub fn validate_at(secret: &str, code: &str, unix_secs: i64) -> bool {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let Some(key) = base32_decode(secret) else {
        return false;
    };

    let counter = unix_secs.div_euclid(STEP_SECS);
    let mut matched = false;
    for offset in -SKEW_STEPS..=SKEW_STEPS {
        if let Ok(expected) = code_for_counter(&key, counter + offset) {
            matched |= bool::from(expected.as_bytes().ct_eq(code.as_bytes()));
        }
    }
    matched
}

fn code_for_counter(key: &[u8], counter: i64) -> Result<String, hmac::digest::InvalidLength> {
    let mut mac = HmacSha1::new_from_slice(key)?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = (u32::from(digest[offset]) & 0x7f) << 24
        | u32::from(digest[offset + 1]) << 16
        | u32::from(digest[offset + 2]) << 8
        | u32::from(digest[offset + 3]);

    let code = binary % 10u32.pow(DIGITS);
    Ok(format!("{code:0width$}", width = DIGITS as usize))
}

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for &byte in data {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(BASE32_ALPHABET[((buffer >> bits) & 0x1f) as usize] as char);
        }
    }
    if bits > 0 {
        out.push(BASE32_ALPHABET[((buffer << (5 - bits)) & 0x1f) as usize] as char);
    }
    out
}

fn base32_decode(input: &str) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 5 / 8);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;
    for c in input.trim_end_matches('=').chars() {
        if c.is_whitespace() {
            continue;
        }
        let upper = c.to_ascii_uppercase() as u8;
        let value = BASE32_ALPHABET.iter().position(|&a| a == upper)?;
        buffer = (buffer << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            out.push(((buffer >> bits) & 0xff) as u8);
        }
    }
    if out.is_empty() { None } else { Some(out) }
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B, SHA1 seed "12345678901234567890".
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn matches_rfc_6238_vectors() {
        assert_eq!(generate_code(RFC_SECRET, 59).unwrap(), "287082");
        assert_eq!(generate_code(RFC_SECRET, 1_111_111_109).unwrap(), "081804");
        assert_eq!(generate_code(RFC_SECRET, 1_234_567_890).unwrap(), "005924");
        assert_eq!(generate_code(RFC_SECRET, 2_000_000_000).unwrap(), "279037");
    }

    #[test]
    fn accepts_one_step_of_skew() {
        let now = 1_700_000_000;
        let previous = generate_code(RFC_SECRET, now - 30).unwrap();
        let next = generate_code(RFC_SECRET, now + 30).unwrap();
        let far = generate_code(RFC_SECRET, now + 90).unwrap();
        assert!(validate_at(RFC_SECRET, &previous, now));
        assert!(validate_at(RFC_SECRET, &next, now));
        assert!(!validate_at(RFC_SECRET, &far, now));
    }

    #[test]
    fn rejects_malformed_codes() {
        assert!(!validate_at(RFC_SECRET, "12345", 59));
        assert!(!validate_at(RFC_SECRET, "28708a", 59));
        assert!(!validate_at("not base32!", "287082", 59));
    }

    #[test]
    fn generated_secret_is_32_base32_chars() {
        let secret = generate_secret().unwrap();
        assert_eq!(secret.len(), 32);
        assert_eq!(base32_decode(&secret).unwrap().len(), SECRET_LEN);
    }

    #[test]
    fn provisioning_uri_is_escaped() {
        let uri = provisioning_uri("ABC", "alice@example.com");
        assert!(uri.starts_with("otpauth://totp/JATS%20Task%20Management%3Aalice%40example.com?"));
        assert!(uri.contains("secret=ABC"));
        assert!(uri.contains("issuer=JATS%20Task%20Management"));
    }
}
