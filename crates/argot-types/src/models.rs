use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A relayed message after the relay opened it.
/// History holds plaintext; the encryption boundary is the socket, not
/// the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub username: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub is_encrypted: bool,
}

/// Diagnostic view of the key table. Ids and ages only; material never
/// leaves the manager through this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub total_keys: usize,
    pub current_key_id: Option<String>,
    /// Age in whole seconds, keyed by key id.
    pub key_ages: HashMap<String, u64>,
}
