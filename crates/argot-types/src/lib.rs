/// Argot shared types
///
/// Wire frames and data shapes used across the relay: participant and
/// observer WebSocket frames, the sealed-envelope format, and the admin
/// API request/response bodies. Everything here is plain serde data;
/// behavior lives in argot-crypto and argot-relay.

pub mod api;
pub mod events;
pub mod models;
