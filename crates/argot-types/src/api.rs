use serde::{Deserialize, Serialize};

use crate::events::EncryptedEnvelope;
use crate::models::{HistoryEntry, KeyInfo};

// -- History --

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryEntry>,
    /// Total recorded, not just the returned suffix.
    pub total: usize,
}

// -- Broadcast --

/// Lenient on purpose: operators post these by hand, so extra fields pass
/// and a missing message becomes empty (rejected by the handler).
#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub message: String,
    /// Participants the broadcast actually reached.
    pub recipients: usize,
}

// -- Key administration --

#[derive(Debug, Serialize)]
pub struct RotateResponse {
    pub message: String,
    pub new_key_id: String,
}

#[derive(Debug, Serialize)]
pub struct SelfTestResponse {
    pub status: String,
    pub test_message: String,
    pub encrypted_data: Option<EncryptedEnvelope>,
    pub decrypted_message: Option<String>,
    pub key_info: KeyInfo,
}
