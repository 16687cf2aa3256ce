use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use argot_crypto::{CryptoError, KeyManager};
use argot_types::events::{
    ControlFrame, ErrorFrame, InboundEnvelope, ObserverEvent, ParticipantFrame,
};
use argot_types::models::HistoryEntry;

use crate::registry::ConnectionRegistry;

/// Routes traffic between participants and observers.
///
/// Participants speak sealed envelopes; the relay opens each one, records
/// it, shows it to observers in the clear, and acks the sender under the
/// current key. Observers are read-only and never receive key material.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Relay {
    inner: Arc<RelayInner>,
}

struct RelayInner {
    keys: KeyManager,
    registry: ConnectionRegistry,

    /// Every message relayed since startup, oldest first. Unbounded; the
    /// history endpoint only ever serves a bounded suffix of it.
    history: RwLock<Vec<HistoryEntry>>,
}

impl Relay {
    pub fn new(keys: KeyManager, registry: ConnectionRegistry) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                keys,
                registry,
                history: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Register a participant and hand it the current key.
    ///
    /// The welcome frame is the one frame that travels unencrypted: the
    /// client has no material until it arrives.
    pub async fn on_participant_connect(
        &self,
        username: &str,
        tx: mpsc::UnboundedSender<ParticipantFrame>,
    ) -> Uuid {
        let conn_id = self.inner.registry.register_participant(username, tx.clone()).await;
        info!("{} connected to relay", username);

        let active_count = self.inner.registry.participant_count().await;
        self.notify_observers(ObserverEvent::UserConnected {
            username: username.to_owned(),
            active_count,
        })
        .await;

        let (key_id, key_base64) = self.inner.keys.current_key().await;
        let welcome = ParticipantFrame::Control(ControlFrame::Welcome {
            message: "Connection established, channel encrypted".to_owned(),
            key_id,
            key_base64,
        });
        if tx.send(welcome).is_err() {
            // Socket died before the welcome left; the disconnect path
            // cleans the entry up.
            warn!("{} dropped before the welcome frame", username);
        }

        conn_id
    }

    /// Handle one inbound text frame from a participant. `reply` is the
    /// originating connection's queue: acks and error reports go there and
    /// nowhere else, even if the username was re-registered meanwhile.
    pub async fn on_participant_message(
        &self,
        username: &str,
        reply: &mpsc::UnboundedSender<ParticipantFrame>,
        raw: &str,
    ) {
        let envelope = match serde_json::from_str::<InboundEnvelope>(raw) {
            Ok(envelope) => envelope,
            Err(_) => {
                // Not a sealed envelope. Shown to observers as-is, but it
                // never reaches history and earns no ack.
                debug!("{} sent plaintext: {}", username, raw);
                self.notify_observers(ObserverEvent::Message {
                    username: username.to_owned(),
                    message: raw.to_owned(),
                    timestamp: Utc::now(),
                    is_encrypted: false,
                })
                .await;
                return;
            }
        };

        match self
            .inner
            .keys
            .decrypt(&envelope.encrypted, &envelope.nonce, &envelope.key_id)
            .await
        {
            Ok(plaintext) => self.deliver(username, reply, plaintext).await,
            Err(err) => {
                warn!("Failed to decrypt message from {}: {}", username, err);
                let available_keys = match &err {
                    CryptoError::KeyNotFound { available, .. } => Some(available.clone()),
                    _ => None,
                };
                let _ = reply.send(ParticipantFrame::Error(ErrorFrame {
                    error: "Failed to decrypt message".to_owned(),
                    details: err.to_string(),
                    available_keys,
                }));
            }
        }
    }

    /// A successfully opened message: record it, show observers, ack the
    /// sender.
    async fn deliver(
        &self,
        username: &str,
        reply: &mpsc::UnboundedSender<ParticipantFrame>,
        plaintext: String,
    ) {
        info!("{}: {}", username, plaintext);
        let timestamp = Utc::now();

        self.inner.history.write().await.push(HistoryEntry {
            username: username.to_owned(),
            message: plaintext.clone(),
            timestamp,
            is_encrypted: true,
        });

        self.notify_observers(ObserverEvent::Message {
            username: username.to_owned(),
            message: plaintext.clone(),
            timestamp,
            is_encrypted: true,
        })
        .await;

        // The ack is sealed under the current key, which may already be a
        // newer generation than the one the message arrived under.
        match self.inner.keys.encrypt(&format!("✓ {}", plaintext), None).await {
            Ok(ack) => {
                let _ = reply.send(ParticipantFrame::Message(ack));
            }
            Err(err) => warn!("Failed to seal ack for {}: {}", username, err),
        }
    }

    /// Drop the participant's entry if this connection still owns it.
    /// Idempotent: late cleanup after a username was re-registered by a
    /// newer connection changes nothing and notifies nobody.
    pub async fn on_participant_disconnect(&self, username: &str, conn_id: Uuid) {
        if !self.inner.registry.unregister_participant(username, conn_id).await {
            return;
        }
        info!("{} disconnected from relay", username);

        let active_count = self.inner.registry.participant_count().await;
        self.notify_observers(ObserverEvent::UserDisconnected {
            username: username.to_owned(),
            active_count,
        })
        .await;
    }

    /// Register an observer and push it the current relay state: first the
    /// participant headcount, then a key table snapshot.
    pub async fn on_observer_connect(&self, tx: mpsc::UnboundedSender<ObserverEvent>) -> Uuid {
        let conn_id = self.inner.registry.register_observer(tx.clone()).await;
        info!("Observer {} attached", conn_id);

        let active_count = self.inner.registry.participant_count().await;
        let _ = tx.send(ObserverEvent::StatusUpdate { active_count });
        let _ = tx.send(ObserverEvent::KeyInfo {
            key_info: self.inner.keys.key_info().await,
        });

        conn_id
    }

    pub async fn on_observer_disconnect(&self, conn_id: Uuid) {
        self.inner.registry.unregister_observer(conn_id).await;
        info!("Observer {} detached", conn_id);
    }

    /// Push a rotation notice to every participant so they can re-import
    /// before their next send. Connections whose queue is gone are dropped
    /// from the registry; one dead connection never stops the rest.
    pub async fn on_key_rotated(&self, key_id: &str, key_base64: &str) {
        let participants = self.inner.registry.snapshot_participants().await;
        let mut dead = Vec::new();

        for (username, conn_id, tx) in participants {
            let notice = ParticipantFrame::Control(ControlFrame::KeyRotation {
                key_id: key_id.to_owned(),
                key_base64: key_base64.to_owned(),
                message: "New encryption key available".to_owned(),
            });
            if tx.send(notice).is_err() {
                dead.push((username, conn_id));
            }
        }

        for (username, conn_id) in dead {
            warn!("{} unreachable during rotation notice, unregistering", username);
            self.inner.registry.unregister_participant(&username, conn_id).await;
        }
    }

    /// Rotate immediately and notify participants. Returns the new key id.
    pub async fn force_rotation(&self) -> String {
        let (key_id, key_base64) = self.inner.keys.force_rotate().await;
        self.on_key_rotated(&key_id, &key_base64).await;
        key_id
    }

    /// Administrative fan-out: seal `text` separately for every participant
    /// except `sender` (a fresh nonce per recipient) and deliver it.
    /// Returns how many participants the broadcast reached, counted after
    /// dead connections were dropped.
    pub async fn broadcast_from(&self, sender: &str, text: &str) -> usize {
        let participants = self.inner.registry.snapshot_participants().await;
        let payload = format!("{}: {}", sender, text);
        let mut dead = Vec::new();

        for (username, conn_id, tx) in &participants {
            if username == sender {
                continue;
            }
            match self.inner.keys.encrypt(&payload, None).await {
                Ok(envelope) => {
                    if tx.send(ParticipantFrame::Message(envelope)).is_err() {
                        dead.push((username.clone(), *conn_id));
                    }
                }
                Err(err) => warn!("Failed to seal broadcast for {}: {}", username, err),
            }
        }

        for (username, conn_id) in &dead {
            warn!("{} unreachable during broadcast, unregistering", username);
            self.inner.registry.unregister_participant(username, *conn_id).await;
        }

        // Count from a single snapshot; separate count-and-contains reads
        // can race with a concurrent registration of the sender's name.
        self.inner
            .registry
            .snapshot_participants()
            .await
            .iter()
            .filter(|(name, _, _)| name != sender)
            .count()
    }

    /// The last `limit` relayed messages, oldest first, plus the total
    /// recorded count.
    pub async fn history(&self, limit: usize) -> (Vec<HistoryEntry>, usize) {
        let history = self.inner.history.read().await;
        let total = history.len();
        let start = total.saturating_sub(limit);
        (history[start..].to_vec(), total)
    }

    /// Best-effort fan-out to observers. Dead observers are unregistered
    /// after the loop so one never blocks the rest.
    async fn notify_observers(&self, event: ObserverEvent) {
        let observers = self.inner.registry.snapshot_observers().await;
        let mut dead = Vec::new();

        for (conn_id, tx) in observers {
            if tx.send(event.clone()).is_err() {
                dead.push(conn_id);
            }
        }

        for conn_id in dead {
            debug!("Observer {} unreachable, unregistering", conn_id);
            self.inner.registry.unregister_observer(conn_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_relay() -> (Relay, KeyManager, ConnectionRegistry) {
        let keys = KeyManager::new();
        let registry = ConnectionRegistry::new();
        let relay = Relay::new(keys.clone(), registry.clone());
        (relay, keys, registry)
    }

    async fn connect_participant(
        relay: &Relay,
        username: &str,
    ) -> (
        Uuid,
        mpsc::UnboundedSender<ParticipantFrame>,
        UnboundedReceiver<ParticipantFrame>,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = relay.on_participant_connect(username, tx.clone()).await;
        // Swallow the welcome so tests start from a quiet queue.
        match rx.recv().await {
            Some(ParticipantFrame::Control(ControlFrame::Welcome { .. })) => {}
            other => panic!("expected welcome, got {other:?}"),
        }
        (conn_id, tx, rx)
    }

    #[tokio::test]
    async fn welcome_carries_the_current_key() {
        let (relay, keys, _) = test_relay();
        let (expected_id, expected_b64) = keys.current_key().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        relay.on_participant_connect("alice", tx).await;

        match rx.recv().await {
            Some(ParticipantFrame::Control(ControlFrame::Welcome {
                key_id, key_base64, ..
            })) => {
                assert_eq!(key_id, expected_id);
                assert_eq!(key_base64, expected_b64);
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn observers_see_joins_and_departures() {
        let (relay, _, _) = test_relay();

        let (obs_tx, mut obs_rx) = mpsc::unbounded_channel();
        relay.on_observer_connect(obs_tx).await;
        assert!(matches!(
            obs_rx.recv().await,
            Some(ObserverEvent::StatusUpdate { active_count: 0 })
        ));
        assert!(matches!(obs_rx.recv().await, Some(ObserverEvent::KeyInfo { .. })));

        let (conn_id, _tx, _rx) = connect_participant(&relay, "alice").await;
        match obs_rx.recv().await {
            Some(ObserverEvent::UserConnected {
                username,
                active_count,
            }) => {
                assert_eq!(username, "alice");
                assert_eq!(active_count, 1);
            }
            other => panic!("expected user_connected, got {other:?}"),
        }

        relay.on_participant_disconnect("alice", conn_id).await;
        match obs_rx.recv().await {
            Some(ObserverEvent::UserDisconnected {
                username,
                active_count,
            }) => {
                assert_eq!(username, "alice");
                assert_eq!(active_count, 0);
            }
            other => panic!("expected user_disconnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn sealed_message_is_recorded_shown_and_acked() {
        let (relay, keys, _) = test_relay();

        let (obs_tx, mut obs_rx) = mpsc::unbounded_channel();
        relay.on_observer_connect(obs_tx).await;
        obs_rx.recv().await; // status_update
        obs_rx.recv().await; // key_info

        let (_conn, tx, mut rx) = connect_participant(&relay, "alice").await;
        obs_rx.recv().await; // user_connected

        let envelope = keys.encrypt("hello relay", None).await.unwrap();
        let raw = serde_json::to_string(&envelope).unwrap();
        relay.on_participant_message("alice", &tx, &raw).await;

        // Observers get the plaintext.
        match obs_rx.recv().await {
            Some(ObserverEvent::Message {
                username,
                message,
                is_encrypted,
                ..
            }) => {
                assert_eq!(username, "alice");
                assert_eq!(message, "hello relay");
                assert!(is_encrypted);
            }
            other => panic!("expected message event, got {other:?}"),
        }

        // History has it.
        let (messages, total) = relay.history(10).await;
        assert_eq!(total, 1);
        assert_eq!(messages[0].message, "hello relay");
        assert!(messages[0].is_encrypted);

        // The sender gets a sealed ack that opens to "✓ <plaintext>".
        match rx.recv().await {
            Some(ParticipantFrame::Message(ack)) => {
                let plaintext = keys
                    .decrypt(&ack.encrypted, &ack.nonce, &ack.key_id)
                    .await
                    .unwrap();
                assert_eq!(plaintext, "✓ hello relay");
            }
            other => panic!("expected ack envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ack_rides_the_newest_generation() {
        let (relay, keys, _) = test_relay();
        let (_conn, tx, mut rx) = connect_participant(&relay, "alice").await;

        // Seal under the first generation, then rotate before delivery.
        let envelope = keys.encrypt("old but valid", None).await.unwrap();
        let old_id = envelope.key_id.clone();
        let new_id = relay.force_rotation().await;

        // The rotation notice arrives first.
        match rx.recv().await {
            Some(ParticipantFrame::Control(ControlFrame::KeyRotation { key_id, .. })) => {
                assert_eq!(key_id, new_id);
            }
            other => panic!("expected key_rotation, got {other:?}"),
        }

        let raw = serde_json::to_string(&envelope).unwrap();
        relay.on_participant_message("alice", &tx, &raw).await;

        match rx.recv().await {
            Some(ParticipantFrame::Message(ack)) => {
                assert_eq!(ack.key_id, new_id);
                assert_ne!(ack.key_id, old_id);
                let plaintext = keys
                    .decrypt(&ack.encrypted, &ack.nonce, &ack.key_id)
                    .await
                    .unwrap();
                assert_eq!(plaintext, "✓ old but valid");
            }
            other => panic!("expected ack envelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_key_id_earns_an_error_report() {
        let (relay, keys, _) = test_relay();
        let (current, _) = keys.current_key().await;
        let (_conn, tx, mut rx) = connect_participant(&relay, "alice").await;

        let raw = serde_json::json!({
            "encrypted": "YWJj",
            "nonce": "AAAAAAAAAAAAAAAA",
            "key_id": "key_0_00000000",
        })
        .to_string();
        relay.on_participant_message("alice", &tx, &raw).await;

        match rx.recv().await {
            Some(ParticipantFrame::Error(report)) => {
                assert_eq!(report.error, "Failed to decrypt message");
                assert_eq!(report.available_keys, Some(vec![current]));
            }
            other => panic!("expected error report, got {other:?}"),
        }

        let (_, total) = relay.history(10).await;
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn plaintext_input_is_shown_but_never_recorded() {
        let (relay, _, _) = test_relay();

        let (obs_tx, mut obs_rx) = mpsc::unbounded_channel();
        relay.on_observer_connect(obs_tx).await;
        obs_rx.recv().await;
        obs_rx.recv().await;

        let (_conn, tx, mut rx) = connect_participant(&relay, "alice").await;
        obs_rx.recv().await; // user_connected

        relay.on_participant_message("alice", &tx, "not json at all").await;

        match obs_rx.recv().await {
            Some(ObserverEvent::Message {
                message,
                is_encrypted,
                ..
            }) => {
                assert_eq!(message, "not json at all");
                assert!(!is_encrypted);
            }
            other => panic!("expected message event, got {other:?}"),
        }

        let (_, total) = relay.history(10).await;
        assert_eq!(total, 0);
        // No ack either.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_reaches_everyone_but_the_sender() {
        let (relay, keys, _) = test_relay();
        let (_a, _tx_a, mut rx_a) = connect_participant(&relay, "alice").await;
        let (_b, _tx_b, mut rx_b) = connect_participant(&relay, "bob").await;

        let recipients = relay.broadcast_from("alice", "maintenance at noon").await;
        assert_eq!(recipients, 1);

        match rx_b.recv().await {
            Some(ParticipantFrame::Message(envelope)) => {
                let plaintext = keys
                    .decrypt(&envelope.encrypted, &envelope.nonce, &envelope.key_id)
                    .await
                    .unwrap();
                assert_eq!(plaintext, "alice: maintenance at noon");
            }
            other => panic!("expected broadcast envelope, got {other:?}"),
        }
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_from_outside_counts_all_participants() {
        let (relay, _, _) = test_relay();
        let (_a, _tx_a, mut rx_a) = connect_participant(&relay, "alice").await;
        let (_b, _tx_b, mut rx_b) = connect_participant(&relay, "bob").await;

        // "admin" holds no connection, so nobody is skipped.
        let recipients = relay.broadcast_from("admin", "hello all").await;
        assert_eq!(recipients, 2);
        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn broadcast_count_survives_a_racing_registration() {
        let (relay, _, _) = test_relay();

        // Another task keeps registering and dropping the sender's own
        // username while broadcasts are counted.
        let churn = {
            let relay = relay.clone();
            tokio::spawn(async move {
                for _ in 0..500 {
                    let (tx, _rx) = mpsc::unbounded_channel();
                    let conn_id = relay.on_participant_connect("ghost", tx).await;
                    relay.on_participant_disconnect("ghost", conn_id).await;
                }
            })
        };

        // The sender is the only name ever registered, so every count is
        // zero no matter how the churn interleaves.
        for _ in 0..500 {
            assert_eq!(relay.broadcast_from("ghost", "x").await, 0);
        }

        churn.await.unwrap();
    }

    #[tokio::test]
    async fn dead_connections_are_dropped_during_fanout() {
        let (relay, _, registry) = test_relay();
        let (_a, _tx_a, rx_a) = connect_participant(&relay, "alice").await;
        let (_b, _tx_b, mut rx_b) = connect_participant(&relay, "bob").await;

        // Alice's receiving side goes away without unregistering.
        drop(rx_a);

        relay.force_rotation().await;

        assert!(matches!(
            rx_b.recv().await,
            Some(ParticipantFrame::Control(ControlFrame::KeyRotation { .. }))
        ));
        assert_eq!(registry.participant_count().await, 1);
        assert!(!registry.contains_participant("alice").await);
    }

    #[tokio::test]
    async fn dead_observer_is_dropped_without_blocking_the_rest() {
        let (relay, _, registry) = test_relay();

        let (obs_dead_tx, obs_dead_rx) = mpsc::unbounded_channel();
        relay.on_observer_connect(obs_dead_tx).await;
        drop(obs_dead_rx);

        let (obs_tx, mut obs_rx) = mpsc::unbounded_channel();
        relay.on_observer_connect(obs_tx).await;
        obs_rx.recv().await;
        obs_rx.recv().await;

        let (_conn, _tx, _rx) = connect_participant(&relay, "alice").await;

        assert!(matches!(
            obs_rx.recv().await,
            Some(ObserverEvent::UserConnected { .. })
        ));
        assert_eq!(registry.observer_count().await, 1);
    }

    #[tokio::test]
    async fn history_serves_a_bounded_suffix() {
        let (relay, keys, _) = test_relay();
        let (_conn, tx, _rx) = connect_participant(&relay, "alice").await;

        for i in 0..5 {
            let envelope = keys.encrypt(&format!("message {i}"), None).await.unwrap();
            let raw = serde_json::to_string(&envelope).unwrap();
            relay.on_participant_message("alice", &tx, &raw).await;
        }

        let (messages, total) = relay.history(2).await;
        assert_eq!(total, 5);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message, "message 3");
        assert_eq!(messages[1].message, "message 4");

        // A limit beyond the total returns everything.
        let (messages, _) = relay.history(100).await;
        assert_eq!(messages.len(), 5);
    }

    #[tokio::test]
    async fn late_disconnect_after_replacement_changes_nothing() {
        let (relay, _, registry) = test_relay();
        let (old_conn, _old_tx, _old_rx) = connect_participant(&relay, "alice").await;
        let (_new_conn, _new_tx, mut new_rx) = connect_participant(&relay, "alice").await;

        relay.on_participant_disconnect("alice", old_conn).await;
        assert!(registry.contains_participant("alice").await);

        // The surviving connection still receives fan-outs.
        relay.force_rotation().await;
        assert!(matches!(
            new_rx.recv().await,
            Some(ParticipantFrame::Control(ControlFrame::KeyRotation { .. }))
        ));
    }
}
