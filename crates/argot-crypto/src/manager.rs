use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tokio::sync::RwLock;
use tracing::info;

use argot_types::events::EncryptedEnvelope;
use argot_types::models::KeyInfo;

use crate::error::CryptoError;
use crate::keys;

/// One key generation. Immutable once minted.
struct KeyEntry {
    material: [u8; 32],
    created_at: Instant,
}

#[derive(Default)]
struct KeyTable {
    keys: HashMap<String, KeyEntry>,
    /// Id of the generation new payloads are sealed under. `None` only
    /// before the first key is minted.
    current: Option<String>,
}

impl KeyTable {
    fn current_entry(&self) -> Option<(&str, &KeyEntry)> {
        let id = self.current.as_deref()?;
        let entry = self.keys.get(id)?;
        Some((id, entry))
    }

    /// Sorted for stable output; ids start with the creation timestamp,
    /// so this is oldest-first.
    fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Rotating AES-256-GCM key table.
///
/// Several generations can be live at once: new payloads are always sealed
/// under the current key, but superseded keys stay in the table for a
/// grace window so in-flight messages sealed under them still open.
/// Opening never falls back to another generation than the one named.
///
/// Cheap to clone; clones share the table.
#[derive(Clone)]
pub struct KeyManager {
    inner: Arc<KeyManagerInner>,
}

struct KeyManagerInner {
    table: RwLock<KeyTable>,
}

impl KeyManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(KeyManagerInner {
                table: RwLock::new(KeyTable::default()),
            }),
        }
    }

    /// Mint a new generation and mark it current. Caller holds the write
    /// lock, which is what makes insert-and-mark atomic.
    fn install_new_key(table: &mut KeyTable) -> (String, [u8; 32]) {
        let key_id = keys::mint_key_id();
        let material = keys::generate_key_material();
        table.keys.insert(
            key_id.clone(),
            KeyEntry {
                material,
                created_at: Instant::now(),
            },
        );
        table.current = Some(key_id.clone());
        info!("Generated new encryption key: {}", key_id);
        (key_id, material)
    }

    /// Current key id and material, minting the first generation if the
    /// table is still empty.
    async fn current_material(&self) -> (String, [u8; 32]) {
        {
            let table = self.inner.table.read().await;
            if let Some((id, entry)) = table.current_entry() {
                return (id.to_owned(), entry.material);
            }
        }

        // No key yet. Re-check under the write lock: another task may have
        // minted one while we waited.
        let mut table = self.inner.table.write().await;
        if let Some((id, entry)) = table.current_entry() {
            return (id.to_owned(), entry.material);
        }
        Self::install_new_key(&mut table)
    }

    /// Current key id and base64 material, for welcome frames.
    pub async fn current_key(&self) -> (String, String) {
        let (key_id, material) = self.current_material().await;
        (key_id, keys::key_to_base64(&material))
    }

    /// Seal `plaintext` under `key_id`, or under the current key when
    /// `None`. Every call mints a fresh random 12-byte nonce.
    pub async fn encrypt(
        &self,
        plaintext: &str,
        key_id: Option<&str>,
    ) -> Result<EncryptedEnvelope, CryptoError> {
        let (key_id, material) = match key_id {
            Some(id) => {
                let table = self.inner.table.read().await;
                match table.keys.get(id) {
                    Some(entry) => (id.to_owned(), entry.material),
                    None => {
                        return Err(CryptoError::KeyNotFound {
                            key_id: id.to_owned(),
                            available: table.key_ids(),
                        });
                    }
                }
            }
            None => self.current_material().await,
        };

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&material));

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptionFailed)?;

        Ok(EncryptedEnvelope {
            encrypted: BASE64.encode(&ciphertext),
            nonce: BASE64.encode(nonce_bytes),
            key_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Open a sealed payload. `key_id` must name the exact generation it
    /// was sealed under; there is no trial against other keys.
    pub async fn decrypt(
        &self,
        encrypted_b64: &str,
        nonce_b64: &str,
        key_id: &str,
    ) -> Result<String, CryptoError> {
        let material = {
            let table = self.inner.table.read().await;
            match table.keys.get(key_id) {
                Some(entry) => entry.material,
                None => {
                    return Err(CryptoError::KeyNotFound {
                        key_id: key_id.to_owned(),
                        available: table.key_ids(),
                    });
                }
            }
        };

        let ciphertext = BASE64.decode(encrypted_b64)?;
        let nonce_bytes = BASE64.decode(nonce_b64)?;
        if nonce_bytes.len() != 12 {
            return Err(CryptoError::InvalidNonceLength {
                len: nonce_bytes.len(),
            });
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&material));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|_| CryptoError::AuthenticationFailed)?;

        Ok(String::from_utf8(plaintext)?)
    }

    /// Rotate if the current key has lived out `lifetime`. Returns whether
    /// a rotation happened. The superseded key stays in the table, so
    /// senders mid-flight with its id keep working.
    pub async fn rotate_if_expired(&self, lifetime: Duration) -> bool {
        let mut table = self.inner.table.write().await;
        let Some((_, entry)) = table.current_entry() else {
            return false;
        };
        if entry.created_at.elapsed() < lifetime {
            return false;
        }
        Self::install_new_key(&mut table);
        true
    }

    /// Rotate unconditionally. Returns the new key id and base64 material
    /// for the rotation notice.
    pub async fn force_rotate(&self) -> (String, String) {
        let mut table = self.inner.table.write().await;
        let (key_id, material) = Self::install_new_key(&mut table);
        (key_id, keys::key_to_base64(&material))
    }

    /// Drop superseded generations older than twice `lifetime`. The
    /// current key is never dropped, whatever its age. Returns the ids
    /// that were removed.
    pub async fn prune_expired(&self, lifetime: Duration) -> Vec<String> {
        let grace = lifetime * 2;
        let mut table = self.inner.table.write().await;
        let current = table.current.clone();
        let stale: Vec<String> = table
            .keys
            .iter()
            .filter(|(id, entry)| {
                Some(id.as_str()) != current.as_deref() && entry.created_at.elapsed() > grace
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            table.keys.remove(id);
            info!("Retired expired key: {}", id);
        }
        stale
    }

    /// Snapshot of the table for diagnostics. Ids and ages only.
    pub async fn key_info(&self) -> KeyInfo {
        let table = self.inner.table.read().await;
        KeyInfo {
            total_keys: table.keys.len(),
            current_key_id: table.current.clone(),
            key_ages: table
                .keys
                .iter()
                .map(|(id, entry)| (id.clone(), entry.created_at.elapsed().as_secs()))
                .collect(),
        }
    }
}
