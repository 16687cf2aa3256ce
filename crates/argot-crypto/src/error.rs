use thiserror::Error;

/// Failures from the key manager's seal/open surface.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The named key generation is not, or is no longer, in the table.
    /// Carries the ids that are, so the far end can tell a stale key from
    /// garbage.
    #[error("key {key_id} not available")]
    KeyNotFound {
        key_id: String,
        available: Vec<String>,
    },

    /// GCM tag verification failed: wrong key, altered ciphertext, or a
    /// mismatched nonce. Deliberately not distinguished further.
    #[error("message authentication failed")]
    AuthenticationFailed,

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("invalid base64: {0}")]
    InvalidEncoding(#[from] base64::DecodeError),

    #[error("invalid nonce length: expected 12 bytes, got {len}")]
    InvalidNonceLength { len: usize },

    #[error("invalid key length: expected 32 bytes, got {len}")]
    InvalidKeyLength { len: usize },

    #[error("decrypted payload is not valid UTF-8")]
    InvalidPlaintext(#[from] std::string::FromUtf8Error),
}
