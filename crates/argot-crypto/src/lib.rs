/// Argot crypto
///
/// The relay's rotating key table: AES-256-GCM with several generations
/// live at once. Payloads are always sealed under the current generation;
/// superseded generations keep opening traffic for a grace window before
/// they are retired. Key material is distributed to participants in-band
/// over the welcome and rotation frames.

pub mod error;
pub mod keys;
pub mod manager;

pub use error::CryptoError;
pub use manager::KeyManager;
