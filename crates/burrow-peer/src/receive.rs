//! Agent receive loop.
//!
//! One socket carries both server pongs and peer cargo. Pongs feed the
//! punch table; cargo completes dials and starts the sender's linger, or
//! reopens a path we had settled or given up on.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::Instant;

use burrow_core::wire::{self, Cargo, PeerBound, Pong, WireError, MAX_PACKET_SIZE};

use crate::agent::AgentContext;
use crate::sender::punch_sender;

pub(crate) async fn receive_loop(ctx: Arc<AgentContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut buf = vec![0u8; MAX_PACKET_SIZE + 1];

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("agent receive loop shutting down");
                return;
            }

            result = ctx.socket.recv_from(&mut buf) => {
                let (len, from) = match result {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(error = %e, "recv_from failed");
                        continue;
                    }
                };

                if let Err(e) = handle_datagram(&ctx, &buf[..len], from).await {
                    tracing::trace!(%from, error = %e, "dropping datagram");
                }
            }
        }
    }
}

async fn handle_datagram(
    ctx: &Arc<AgentContext>,
    data: &[u8],
    from: SocketAddr,
) -> Result<(), WireError> {
    match wire::decode::<PeerBound>(data)? {
        PeerBound::Pong(pong) => handle_pong(ctx, pong).await,
        PeerBound::Cargo(cargo) => handle_cargo(ctx, cargo, from).await?,
    }
    Ok(())
}

async fn handle_pong(ctx: &Arc<AgentContext>, pong: Pong) {
    tracing::trace!(punches = pong.punches.len(), "pong received");

    for point in pong.punches {
        if point.id == ctx.id || wire::validate_id(&point.id).is_err() {
            continue;
        }
        let Some(addr) = resolve_point(&point.address).await else {
            tracing::trace!(peer = %point.id, address = %point.address, "unresolvable punch point");
            continue;
        };

        let generation = ctx
            .punches
            .lock()
            .await
            .refresh(&point.id, addr, Instant::now());
        if let Some(generation) = generation {
            tracing::debug!(peer = %point.id, %addr, generation, "punch starting");
            spawn_sender(ctx, point.id, generation);
        }
    }
}

async fn handle_cargo(
    ctx: &Arc<AgentContext>,
    cargo: Cargo,
    from: SocketAddr,
) -> Result<(), WireError> {
    wire::validate_id(&cargo.origin_id)?;
    if cargo.origin_id == ctx.id {
        return Ok(());
    }

    let completed = ctx.dials.lock().await.complete(&cargo.origin_id, from);
    let (lingering, reopened) = {
        let mut punches = ctx.punches.lock().await;
        if punches.confirm(&cargo.origin_id) {
            (true, None)
        } else {
            (false, punches.reopen(&cargo.origin_id, from, Instant::now()))
        }
    };
    if let Some(generation) = reopened {
        spawn_sender(ctx, cargo.origin_id.clone(), generation);
    }
    tracing::trace!(
        origin = %cargo.origin_id,
        %from,
        completed,
        lingering,
        "cargo received"
    );
    Ok(())
}

fn spawn_sender(ctx: &Arc<AgentContext>, target: String, generation: u64) {
    tokio::spawn(punch_sender(
        ctx.clone(),
        target,
        generation,
        ctx.shutdown.subscribe(),
    ));
}

/// Punch points carry textual `host:port`. IP literals parse directly;
/// anything else goes through the resolver.
async fn resolve_point(address: &str) -> Option<SocketAddr> {
    if let Ok(addr) = address.parse() {
        return Some(addr);
    }
    tokio::net::lookup_host(address).await.ok()?.next()
}
