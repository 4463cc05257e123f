//! Punch table: the agent's registry of running punch senders.
//!
//! A punch sender is a small task that keeps firing cargo at one target.
//! It owns nothing: every tick it asks the table what to do next, so
//! removing or superseding its entry stops it on the following tick. That
//! gives each sender a bounded lifetime:
//!
//! - cancelled: the entry was removed (dial expired, agent shutdown) or
//!   replaced by a newer generation (target moved to a new address);
//! - settled: the target's cargo arrived and the linger countdown ran out;
//! - stale: no pong has mentioned the target for `idle_limit`.
//!
//! A settled target leaves a tombstone so the pongs that keep listing it
//! until the server forgets the introduction do not restart the sender.
//! An abandoned target (its dial timed out) is withheld the same way. Both
//! are lifted by a new dial, or by fresh cargo from the target once the
//! settle grace has passed: the remote is punching again, so we answer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// What a punch sender should do on this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchAction {
    Send(SocketAddr),
    Stop(StopReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    Settled,
    Stale,
}

#[derive(Debug)]
struct PunchEntry {
    addr: SocketAddr,
    refreshed_at: Instant,
    generation: u64,
    /// Bursts left once the target's cargo has arrived.
    linger_left: Option<u32>,
}

#[derive(Debug)]
pub struct PunchTable {
    entries: HashMap<String, PunchEntry>,
    settled: HashMap<String, (SocketAddr, Instant)>,
    /// Targets whose dial timed out, keyed to the time it did.
    withheld: HashMap<String, Instant>,
    next_generation: u64,
    linger_bursts: u32,
    idle_limit: Duration,
    /// Cargo arriving this soon after a settle is the remote's own linger.
    settle_grace: Duration,
}

pub type SharedPunchTable = Arc<Mutex<PunchTable>>;

impl PunchTable {
    pub fn new(linger_bursts: u32, idle_limit: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            settled: HashMap::new(),
            withheld: HashMap::new(),
            next_generation: 0,
            linger_bursts,
            idle_limit,
            settle_grace: Duration::ZERO,
        }
    }

    pub fn with_settle_grace(mut self, grace: Duration) -> Self {
        self.settle_grace = grace;
        self
    }

    pub fn into_shared(self) -> SharedPunchTable {
        Arc::new(Mutex::new(self))
    }

    /// A pong listed `target` at `addr`. Returns the generation of a sender
    /// the caller must spawn, or `None` if one is already running for this
    /// address, the target recently settled there, or it is withheld.
    pub fn refresh(&mut self, target: &str, addr: SocketAddr, now: Instant) -> Option<u64> {
        self.prune(now);
        if self.withheld.contains_key(target) {
            return None;
        }
        if matches!(self.settled.get(target), Some((a, _)) if *a == addr) {
            return None;
        }

        if let Some(entry) = self.entries.get_mut(target) {
            if entry.addr == addr {
                entry.refreshed_at = now;
                return None;
            }
        }

        self.settled.remove(target);
        Some(self.insert(target, addr, now, None))
    }

    /// Cargo from `target` arrived at `addr` while no sender was running
    /// (`confirm` returned false). If the target is withheld, or settled
    /// longer ago than the settle grace, the block is lifted and a sender
    /// that only lingers is started toward `addr`. Returns its generation.
    pub fn reopen(&mut self, target: &str, addr: SocketAddr, now: Instant) -> Option<u64> {
        self.prune(now);
        if self.entries.contains_key(target) {
            return None;
        }

        let lifted = self.withheld.remove(target).is_some()
            || matches!(
                self.settled.get(target),
                Some((_, at)) if now.saturating_duration_since(*at) >= self.settle_grace
            );
        if !lifted {
            return None;
        }

        self.settled.remove(target);
        let generation = self.insert(target, addr, now, Some(self.linger_bursts));
        tracing::debug!(peer = %target, %addr, generation, "punch reopened by cargo");
        Some(generation)
    }

    /// Cargo from `target` arrived. Starts the linger countdown of its
    /// sender, if any. Returns true if a sender was running.
    pub fn confirm(&mut self, target: &str) -> bool {
        match self.entries.get_mut(target) {
            Some(entry) => {
                if entry.linger_left.is_none() {
                    entry.linger_left = Some(self.linger_bursts);
                }
                true
            }
            None => false,
        }
    }

    /// Stop the sender for `target` on its next tick.
    pub fn cancel(&mut self, target: &str) -> bool {
        self.entries.remove(target).is_some()
    }

    /// The dial toward `target` timed out: stop its sender and ignore pongs
    /// listing it for `idle_limit`, which outlasts the server's copy of the
    /// introduction. Returns true if a sender was running.
    pub fn abandon(&mut self, target: &str, now: Instant) -> bool {
        self.withheld.insert(target.to_string(), now);
        let running = self.entries.remove(target).is_some();
        tracing::debug!(peer = %target, running, "punch withheld");
        running
    }

    /// Allow a settled or withheld target to be punched again on a new dial.
    pub fn release(&mut self, target: &str) {
        self.settled.remove(target);
        self.withheld.remove(target);
    }

    /// Decide the next step for the sender of `target` at `generation`.
    pub fn next_action(&mut self, target: &str, generation: u64, now: Instant) -> PunchAction {
        let idle_limit = self.idle_limit;
        let Some(entry) = self.entries.get_mut(target) else {
            return PunchAction::Stop(StopReason::Cancelled);
        };
        if entry.generation != generation {
            return PunchAction::Stop(StopReason::Cancelled);
        }

        match entry.linger_left {
            Some(0) => {
                let addr = entry.addr;
                self.entries.remove(target);
                self.settled.insert(target.to_string(), (addr, now));
                PunchAction::Stop(StopReason::Settled)
            }
            Some(n) => {
                entry.linger_left = Some(n - 1);
                PunchAction::Send(entry.addr)
            }
            None if now.saturating_duration_since(entry.refreshed_at) > idle_limit => {
                self.entries.remove(target);
                PunchAction::Stop(StopReason::Stale)
            }
            None => PunchAction::Send(entry.addr),
        }
    }

    fn insert(
        &mut self,
        target: &str,
        addr: SocketAddr,
        now: Instant,
        linger_left: Option<u32>,
    ) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.entries.insert(
            target.to_string(),
            PunchEntry {
                addr,
                refreshed_at: now,
                generation,
                linger_left,
            },
        );
        generation
    }

    fn prune(&mut self, now: Instant) {
        let idle_limit = self.idle_limit;
        self.settled
            .retain(|_, (_, at)| now.saturating_duration_since(*at) <= idle_limit);
        self.withheld
            .retain(|_, at| now.saturating_duration_since(*at) <= idle_limit);
    }

    pub fn is_punching(&self, target: &str) -> bool {
        self.entries.contains_key(target)
    }

    /// Number of live senders.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
