use serde::{Deserialize, Serialize};

use crate::models::KeyInfo;

/// An AES-256-GCM sealed payload as it travels on the wire.
///
/// All binary fields are base64. The key id names the exact key generation
/// the payload was sealed under; receivers must not try other generations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedEnvelope {
    /// Ciphertext including the GCM authentication tag.
    pub encrypted: String,
    /// The 12-byte nonce minted for this payload. Never reused.
    pub nonce: String,
    /// Id of the key generation the payload was sealed under.
    pub key_id: String,
    /// Unix epoch milliseconds at seal time.
    pub timestamp: i64,
}

/// A participant's inbound frame, parsed leniently: the timestamp is
/// optional and unknown fields are ignored. Anything that fails this parse
/// is treated as plaintext input, not an error.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    pub encrypted: String,
    pub nonce: String,
    pub key_id: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Key-distribution frames the relay pushes to participants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// First frame on every participant connection. Carries the current
    /// key so the client can seal and open traffic; by necessity it is the
    /// one frame that travels unencrypted.
    Welcome {
        message: String,
        key_id: String,
        key_base64: String,
    },

    /// The table rotated; subsequent replies are sealed under this key.
    KeyRotation {
        key_id: String,
        key_base64: String,
        message: String,
    },
}

/// Reported to a participant whose frame could not be opened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    pub details: String,
    /// Present only when the failure was an unknown key id, so the client
    /// can tell a stale key from a corrupt payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_keys: Option<Vec<String>>,
}

/// Everything the relay can push down a participant socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParticipantFrame {
    /// Tagged control frames (`welcome`, `key_rotation`).
    Control(ControlFrame),
    /// A sealed payload: an ack or an administrative broadcast.
    Message(EncryptedEnvelope),
    /// A decryption failure report.
    Error(ErrorFrame),
}

/// Events pushed to observer sockets. Observers see relayed traffic in the
/// clear and never receive key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverEvent {
    /// A participant registered under `username`.
    UserConnected {
        username: String,
        active_count: usize,
    },

    /// A participant's connection went away.
    UserDisconnected {
        username: String,
        active_count: usize,
    },

    /// A relayed message, already opened by the relay.
    Message {
        username: String,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
        is_encrypted: bool,
    },

    /// Participant headcount, sent when an observer first attaches.
    StatusUpdate { active_count: usize },

    /// Snapshot of the key table (ids and ages only, no material).
    KeyInfo { key_info: KeyInfo },
}
