/// Argot admin API
///
/// The request/response surface of the relay: message history, operator
/// broadcast, and key administration. Live traffic rides the WebSocket
/// routes in argot-relay; everything here is bounded queries and one-shot
/// commands.

pub mod broadcast;
pub mod crypto;
pub mod history;

use argot_crypto::KeyManager;
use argot_relay::Relay;

/// State shared by every admin handler.
#[derive(Clone)]
pub struct AppState {
    pub relay: Relay,
    pub keys: KeyManager,
}
