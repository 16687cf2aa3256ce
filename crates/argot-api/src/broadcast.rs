use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::info;

use argot_types::api::{BroadcastRequest, BroadcastResponse};

use crate::AppState;

/// POST /broadcast/{sender} — seal a plaintext once per recipient and
/// deliver it to every participant except the named sender. The sender
/// does not have to be connected; an unconnected name simply skips nobody.
pub async fn broadcast_message(
    State(state): State<AppState>,
    Path(sender): Path<String>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, StatusCode> {
    if req.message.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let recipients = state.relay.broadcast_from(&sender, &req.message).await;
    info!("Broadcast from {} reached {} participants", sender, recipients);

    Ok(Json(BroadcastResponse {
        message: format!("Broadcast sent from {}", sender),
        recipients,
    }))
}
