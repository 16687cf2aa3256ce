use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::error::CryptoError;

/// Generate random 256-bit key material for AES-256-GCM.
pub fn generate_key_material() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Mint a key id: creation time plus a random suffix, so two keys minted
/// in the same second stay distinct.
pub fn mint_key_id() -> String {
    format!(
        "key_{}_{:08x}",
        chrono::Utc::now().timestamp(),
        rand::random::<u32>()
    )
}

/// Encode key material to base64 for the welcome/rotation frames.
pub fn key_to_base64(key: &[u8; 32]) -> String {
    BASE64.encode(key)
}

/// Decode base64 key material, as a client would on receiving a welcome.
pub fn key_from_base64(encoded: &str) -> Result<[u8; 32], CryptoError> {
    let bytes = BASE64.decode(encoded)?;
    let len = bytes.len();
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength { len })?;
    Ok(key)
}
