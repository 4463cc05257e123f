//! Directory expiry: a periodic sweep that forgets silent peers and
//! introductions nobody has renewed.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use burrow_services::SharedDirectory;

/// Forget silent peers and stale introductions once per `lifetime`.
pub async fn expiry_loop(
    directory: SharedDirectory,
    lifetime: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = time::interval(lifetime);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("directory expiry shutting down");
                return;
            }
            _ = interval.tick() => {
                let stats = directory.lock().await.expire(Instant::now(), lifetime);
                if !stats.is_empty() {
                    tracing::debug!(
                        peers = stats.peers,
                        dials = stats.dials,
                        rings = stats.rings,
                        "expired directory entries"
                    );
                }
            }
        }
    }
}
