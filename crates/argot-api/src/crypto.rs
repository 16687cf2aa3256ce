use axum::{Json, extract::State};
use tracing::info;

use argot_types::api::{RotateResponse, SelfTestResponse};
use argot_types::models::KeyInfo;

use crate::AppState;

/// GET /crypto/keys — ids and ages only, never material.
pub async fn get_key_info(State(state): State<AppState>) -> Json<KeyInfo> {
    Json(state.keys.key_info().await)
}

/// POST /crypto/rotate — rotate now; connected participants get the
/// notice immediately.
pub async fn rotate_key(State(state): State<AppState>) -> Json<RotateResponse> {
    let new_key_id = state.relay.force_rotation().await;
    info!("Manual rotation produced key {}", new_key_id);
    Json(RotateResponse {
        message: "Encryption key rotated".to_owned(),
        new_key_id,
    })
}

/// GET /crypto/selftest — seal and open a fixed string through the live
/// key table, returning the envelope so an operator can eyeball it.
pub async fn self_test(State(state): State<AppState>) -> Json<SelfTestResponse> {
    let test_message = "The relay can hear itself";

    let envelope = match state.keys.encrypt(test_message, None).await {
        Ok(envelope) => envelope,
        Err(e) => {
            return Json(SelfTestResponse {
                status: format!("failed: {}", e),
                test_message: test_message.to_owned(),
                encrypted_data: None,
                decrypted_message: None,
                key_info: state.keys.key_info().await,
            });
        }
    };

    let (status, decrypted_message) = match state
        .keys
        .decrypt(&envelope.encrypted, &envelope.nonce, &envelope.key_id)
        .await
    {
        Ok(plaintext) => ("ok".to_owned(), Some(plaintext)),
        Err(e) => (format!("failed: {}", e), None),
    };

    Json(SelfTestResponse {
        status,
        test_message: test_message.to_owned(),
        encrypted_data: Some(envelope),
        decrypted_message,
        key_info: state.keys.key_info().await,
    })
}
