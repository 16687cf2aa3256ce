use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use argot_types::events::{ObserverEvent, ParticipantFrame};

/// The connection currently holding a username, with its outbound queue.
struct ParticipantHandle {
    conn_id: Uuid,
    tx: mpsc::UnboundedSender<ParticipantFrame>,
}

/// Tracks every live connection's outbound channel.
///
/// Participants are keyed by username: a reconnect under the same name
/// replaces the entry. Observers are anonymous and keyed by connection id.
///
/// Cheap to clone; clones share the maps.
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// username -> current connection for that name
    participants: RwLock<HashMap<String, ParticipantHandle>>,

    /// conn_id -> observer outbound queue
    observers: RwLock<HashMap<Uuid, mpsc::UnboundedSender<ObserverEvent>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                participants: RwLock::new(HashMap::new()),
                observers: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Register a participant's outbound channel. Returns the conn_id that
    /// marks this connection as the owner of the username.
    ///
    /// Replacing an existing entry does not close the replaced connection;
    /// that connection keeps its own sender and simply stops receiving
    /// relay fan-outs.
    pub async fn register_participant(
        &self,
        username: &str,
        tx: mpsc::UnboundedSender<ParticipantFrame>,
    ) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner
            .participants
            .write()
            .await
            .insert(username.to_owned(), ParticipantHandle { conn_id, tx });
        conn_id
    }

    /// Remove a participant entry, but only if conn_id still owns it.
    /// Returns whether an entry was actually removed; a connection that was
    /// replaced by a newer one gets `false` and must not touch anything.
    pub async fn unregister_participant(&self, username: &str, conn_id: Uuid) -> bool {
        let mut participants = self.inner.participants.write().await;
        if let Some(handle) = participants.get(username) {
            if handle.conn_id == conn_id {
                participants.remove(username);
                return true;
            }
        }
        false
    }

    pub async fn contains_participant(&self, username: &str) -> bool {
        self.inner.participants.read().await.contains_key(username)
    }

    pub async fn participant_count(&self) -> usize {
        self.inner.participants.read().await.len()
    }

    /// Point-in-time copy of the participant map, safe to iterate while
    /// connections come and go.
    pub async fn snapshot_participants(
        &self,
    ) -> Vec<(String, Uuid, mpsc::UnboundedSender<ParticipantFrame>)> {
        self.inner
            .participants
            .read()
            .await
            .iter()
            .map(|(name, handle)| (name.clone(), handle.conn_id, handle.tx.clone()))
            .collect()
    }

    /// Register an observer's outbound channel.
    pub async fn register_observer(&self, tx: mpsc::UnboundedSender<ObserverEvent>) -> Uuid {
        let conn_id = Uuid::new_v4();
        self.inner.observers.write().await.insert(conn_id, tx);
        conn_id
    }

    /// Remove an observer. A no-op if it is already gone.
    pub async fn unregister_observer(&self, conn_id: Uuid) {
        self.inner.observers.write().await.remove(&conn_id);
    }

    pub async fn observer_count(&self) -> usize {
        self.inner.observers.read().await.len()
    }

    pub async fn snapshot_observers(&self) -> Vec<(Uuid, mpsc::UnboundedSender<ObserverEvent>)> {
        self.inner
            .observers
            .read()
            .await
            .iter()
            .map(|(conn_id, tx)| (*conn_id, tx.clone()))
            .collect()
    }
}
