//! Credential primitives: password hashing, TOTP and random tokens.

pub mod password;
pub mod token;
pub mod totp;

pub use password::{HashError, HashParams, hash_secret, verify_secret};
pub use token::{generate_api_key, generate_token};
