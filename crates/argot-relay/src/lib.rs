/// Argot relay
///
/// The live side of the relay: the connection registry, the broadcast
/// relay that opens, records, and fans out traffic, the WebSocket
/// connection loops, and the background schedules that rotate and retire
/// encryption keys.

pub mod connection;
pub mod registry;
pub mod relay;
pub mod rotation;

pub use registry::ConnectionRegistry;
pub use relay::Relay;
