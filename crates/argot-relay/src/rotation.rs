use std::time::Duration;

use tracing::info;

use argot_crypto::KeyManager;

use crate::relay::Relay;

/// Background task that retires the current key on schedule.
///
/// Each tick asks the key manager whether the current generation has lived
/// out its lifetime; only an actual rotation triggers the participant
/// notice. The loop itself never exits, whatever a tick finds.
pub async fn run_rotation_loop(
    keys: KeyManager,
    relay: Relay,
    interval_secs: u64,
    lifetime: Duration,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    // The first tick fires immediately; skip it so a fresh key is not
    // inspected at startup.
    interval.tick().await;

    loop {
        interval.tick().await;

        if keys.rotate_if_expired(lifetime).await {
            let (key_id, key_base64) = keys.current_key().await;
            info!("Scheduled rotation produced key {}", key_id);
            relay.on_key_rotated(&key_id, &key_base64).await;
        }
    }
}

/// Background task that drops superseded keys once they have aged past
/// twice the configured lifetime. Independent of the rotation schedule so
/// a slow rotation never delays retirement.
pub async fn run_prune_loop(keys: KeyManager, interval_secs: u64, lifetime: Duration) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
    interval.tick().await;

    loop {
        interval.tick().await;

        let pruned = keys.prune_expired(lifetime).await;
        if !pruned.is_empty() {
            info!("Pruned {} expired keys", pruned.len());
        }
    }
}
