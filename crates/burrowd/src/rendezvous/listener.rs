//! Ping ingestion.
//!
//! One datagram at a time: decode, validate, upsert the sender, record its
//! introduction requests. Anything malformed is dropped without reply; the
//! sender's next periodic ping is the retry.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::Instant;

use burrow_core::wire::{self, Ping, WireError, MAX_PACKET_SIZE};
use burrow_services::SharedDirectory;

/// Receive pings until shutdown.
pub async fn receive_loop(
    socket: Arc<UdpSocket>,
    directory: SharedDirectory,
    mut shutdown: broadcast::Receiver<()>,
) {
    // One spare byte so an oversized datagram is detectable rather than
    // silently truncated into something decodable.
    let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];

    tracing::info!("ping listener starting");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("ping listener shutting down");
                return;
            }

            result = socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        continue;
                    }
                };

                if let Err(e) = handle_ping(&directory, &buf[..len], from, Instant::now()).await {
                    tracing::trace!(%from, error = %e, "dropping datagram");
                }
            }
        }
    }
}

/// Apply one ping datagram to the directory.
pub async fn handle_ping(
    directory: &SharedDirectory,
    data: &[u8],
    from: SocketAddr,
    now: Instant,
) -> Result<(), WireError> {
    let ping: Ping = wire::decode(data)?;
    ping.validate()?;

    let mut dir = directory.lock().await;
    dir.upsert(&ping.id, from, now);
    for target in ping.valid_dialing() {
        dir.record_intro_request(&ping.id, target, now);
    }
    Ok(())
}
