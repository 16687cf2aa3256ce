use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::warn;

use argot_types::events::{ObserverEvent, ParticipantFrame};

use crate::relay::Relay;

/// Drive a participant socket until either side goes away.
///
/// Outbound frames (welcome, acks, rotation notices, broadcasts) flow
/// through an unbounded queue so fan-outs never block on a slow socket.
/// Inbound text goes straight to the relay; the registry entry is released
/// on the way out.
pub async fn handle_participant(socket: WebSocket, username: String, relay: Relay) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ParticipantFrame>();

    let conn_id = relay.on_participant_connect(&username, tx.clone()).await;

    // Forward queued frames to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize outbound frame: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Feed inbound text through the relay
    let relay_recv = relay.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    relay_recv
                        .on_participant_message(&username_recv, &tx, &text)
                        .await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    relay.on_participant_disconnect(&username, conn_id).await;
}

/// Drive an observer socket. Observers only listen; inbound frames are
/// drained solely to notice the close.
pub async fn handle_observer(socket: WebSocket, relay: Relay) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ObserverEvent>();

    let conn_id = relay.on_observer_connect(tx).await;

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize observer event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    relay.on_observer_disconnect(conn_id).await;
}
