use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;

use argot_types::api::HistoryResponse;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// GET /messages/history — the most recent `limit` relayed messages,
/// oldest first, with the total recorded count alongside.
pub async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let (messages, total) = state.relay.history(query.limit).await;
    Json(HistoryResponse { messages, total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use argot_crypto::KeyManager;
    use argot_relay::{ConnectionRegistry, Relay};

    fn test_state() -> AppState {
        let keys = KeyManager::new();
        let relay = Relay::new(keys.clone(), ConnectionRegistry::new());
        AppState { relay, keys }
    }

    #[test]
    fn limit_defaults_to_100() {
        let query: HistoryQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.limit, 100);
    }

    #[tokio::test]
    async fn serves_the_suffix_with_the_full_total() {
        let state = test_state();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        state.relay.on_participant_connect("alice", tx.clone()).await;
        for i in 0..3 {
            let envelope = state.keys.encrypt(&format!("m{i}"), None).await.unwrap();
            let raw = serde_json::to_string(&envelope).unwrap();
            state.relay.on_participant_message("alice", &tx, &raw).await;
        }

        let response = get_history(State(state), Query(HistoryQuery { limit: 2 })).await;
        assert_eq!(response.0.total, 3);
        assert_eq!(response.0.messages.len(), 2);
        assert_eq!(response.0.messages[0].message, "m1");
        assert_eq!(response.0.messages[1].message, "m2");
    }
}
