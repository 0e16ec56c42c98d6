use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::TryRngCore;
use rand::rngs::OsRng;

/// Draw `len` bytes from the operating system CSPRNG and base64url-encode them.
pub fn generate_token(len: usize) -> anyhow::Result<String> {
    let bytes = random_bytes(len)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

/// Generate a random API key (64 character hex string).
pub fn generate_api_key() -> anyhow::Result<String> {
    Ok(hex::encode(random_bytes(32)?))
}

pub(crate) fn random_bytes(len: usize) -> anyhow::Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| anyhow::anyhow!("OS random source failed: {e}"))?;
    Ok(bytes)
}
