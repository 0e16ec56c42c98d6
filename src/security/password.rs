use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{
        PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
        rand_core::{OsRng, RngCore},
    },
};
use thiserror::Error;

use crate::config::SecurityConfig;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("Invalid hash format: {0}")]
    Parse(String),

    #[error("Incompatible hash version: {0}")]
    Version(String),

    #[error("Hashing failed: {0}")]
    Hash(String),
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub salt_len: usize,
    pub key_len: usize,
}

impl HashParams {
    /// 64 MiB, 3 iterations, 2 lanes, 16-byte salt, 32-byte key.
    pub const PASSWORD: Self = Self {
        memory_kib: 64 * 1024,
        iterations: 3,
        parallelism: 2,
        salt_len: 16,
        key_len: 32,
    };

    /// API keys carry 256 bits of entropy, so a lighter cost is enough.
    pub const API_KEY: Self = Self {
        memory_kib: 19 * 1024,
        iterations: 2,
        parallelism: 1,
        salt_len: 16,
        key_len: 32,
    };

    #[must_use]
    pub const fn for_passwords(config: &SecurityConfig) -> Self {
        Self {
            memory_kib: config.argon2_memory_cost_kib,
            iterations: config.argon2_time_cost,
            parallelism: config.argon2_parallelism,
            salt_len: Self::PASSWORD.salt_len,
            key_len: Self::PASSWORD.key_len,
        }
    }

    #[must_use]
    pub const fn for_api_keys(config: &SecurityConfig) -> Self {
        Self {
            memory_kib: config.api_key_memory_cost_kib,
            iterations: config.api_key_time_cost,
            parallelism: config.api_key_parallelism,
            salt_len: Self::API_KEY.salt_len,
            key_len: Self::API_KEY.key_len,
        }
    }
}

impl Default for HashParams {
    fn default() -> Self {
        Self::PASSWORD
    }
}

/// Hash a secret with Argon2id and a fresh random salt.
///
/// The result is the PHC string `$argon2id$v=19$m=..,t=..,p=..$<salt>$<key>`.
/// This is CPU and memory heavy; call it from `spawn_blocking`.
pub fn hash_secret(secret: &str, params: &HashParams) -> Result<String, HashError> {
    let mut salt_bytes = vec![0u8; params.salt_len];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| HashError::Hash(e.to_string()))?;

    let argon2_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(params.key_len),
    )
    .map_err(|e| HashError::Hash(format!("Invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let hash = argon2
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| HashError::Hash(e.to_string()))?;

    Ok(hash.to_string())
}

/// Verify a secret against an encoded hash using the parameters stored in it.
///
/// Returns `Ok(false)` on mismatch. The key comparison is constant time.
pub fn verify_secret(secret: &str, encoded: &str) -> Result<bool, HashError> {
    let fields: Vec<&str> = encoded.split('$').collect();
    if fields.len() != 6 {
        return Err(HashError::Parse(format!(
            "expected 6 '$'-separated fields, found {}",
            fields.len()
        )));
    }

    let expected_version = format!("v={}", u32::from(Version::V0x13));
    if fields[2] != expected_version {
        return Err(HashError::Version(fields[2].to_string()));
    }

    let parsed = PasswordHash::new(encoded).map_err(|e| HashError::Parse(e.to_string()))?;

    match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(HashError::Hash(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: HashParams = HashParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
        salt_len: 16,
        key_len: 32,
    };

    #[test]
    fn hash_then_verify() {
        let hash = hash_secret("correct horse", &FAST).unwrap();
        assert!(verify_secret("correct horse", &hash).unwrap());
        assert!(!verify_secret("correct horsf", &hash).unwrap());
    }

    #[test]
    fn encoded_hash_carries_parameters() {
        let hash = hash_secret("pw", &FAST).unwrap();
        assert!(hash.starts_with("$argon2id$v=19$m=1024,t=1,p=1$"));
        assert_eq!(hash.split('$').count(), 6);
    }

    #[test]
    fn salts_differ_between_hashes() {
        let a = hash_secret("same", &FAST).unwrap();
        let b = hash_secret("same", &FAST).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn malformed_hash_is_a_parse_error() {
        assert!(matches!(
            verify_secret("pw", "$argon2id$v=19$m=1024"),
            Err(HashError::Parse(_))
        ));
    }

    #[test]
    fn foreign_version_is_rejected() {
        let hash = hash_secret("pw", &FAST).unwrap().replace("v=19", "v=16");
        assert!(matches!(verify_secret("pw", &hash), Err(HashError::Version(_))));
    }
}
