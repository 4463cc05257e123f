//! Punch senders: one task per punch table entry, firing cargo at the
//! target's endpoint every punch interval.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use burrow_core::wire::{self, Cargo, PeerBound};
use burrow_services::PunchAction;

use crate::agent::AgentContext;

/// Fire cargo at `target` every punch interval until the punch table says
/// stop or the agent shuts down.
pub(crate) async fn punch_sender(
    ctx: Arc<AgentContext>,
    target: String,
    generation: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let cargo = match wire::encode(&PeerBound::Cargo(Cargo {
        origin_id: ctx.id.clone(),
    })) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "cargo encode failed");
            ctx.punches.lock().await.cancel(&target);
            return;
        }
    };

    let mut interval = time::interval(ctx.timing.punch_interval());
    let mut bursts = 0u32;

    loop {
        tokio::select! {
            _ = shutdown.recv() => return,
            _ = interval.tick() => {}
        }

        let action = ctx
            .punches
            .lock()
            .await
            .next_action(&target, generation, Instant::now());

        match action {
            PunchAction::Send(addr) => {
                bursts += 1;
                if let Err(e) = ctx.socket.send_to(&cargo, addr).await {
                    tracing::warn!(peer = %target, %addr, error = %e, "cargo send failed");
                }
            }
            PunchAction::Stop(reason) => {
                tracing::debug!(peer = %target, generation, bursts, ?reason, "punch stopped");
                return;
            }
        }
    }
}
