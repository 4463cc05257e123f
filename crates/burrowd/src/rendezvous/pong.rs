//! Pong broadcast.
//!
//! Every pong period each known peer is told the current endpoints of the
//! peers it should punch toward. The directory lock is taken per peer to
//! build its candidate list and released before anything is sent.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use burrow_core::wire::{self, PeerBound, Pong};
use burrow_services::SharedDirectory;

/// Send pongs on every tick until shutdown.
pub async fn pong_loop(
    socket: Arc<UdpSocket>,
    directory: SharedDirectory,
    period: Duration,
    lifetime: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("pong broadcast shutting down");
                return;
            }
            _ = interval.tick() => {
                let sent = pong_all(&socket, &directory, lifetime).await;
                tracing::trace!(sent, "pong round complete");
            }
        }
    }
}

/// One pong round. Peers silent for longer than `lifetime` are not offered
/// as candidates even before the expiry sweep removes them. Returns the
/// number of datagrams sent.
pub async fn pong_all(
    socket: &UdpSocket,
    directory: &SharedDirectory,
    lifetime: Duration,
) -> usize {
    let ids = directory.lock().await.known_ids();
    let mut sent = 0;

    for id in ids {
        let (addr, candidates) = {
            let dir = directory.lock().await;
            // Expired between the snapshot and now.
            let Some(addr) = dir.lookup(&id) else {
                continue;
            };
            (addr, dir.candidates_for(&id, Instant::now(), lifetime))
        };

        for page in Pong::paginate(candidates) {
            let bytes = match wire::encode(&PeerBound::Pong(page)) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(peer = %id, error = %e, "pong encode failed");
                    continue;
                }
            };
            match socket.send_to(&bytes, addr).await {
                Ok(_) => sent += 1,
                Err(e) => tracing::debug!(peer = %id, %addr, error = %e, "pong send failed"),
            }
        }
    }

    sent
}
