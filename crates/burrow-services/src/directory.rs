//! Peer directory: the rendezvous server's table of live peers and their
//! pending introductions.
//!
//! Each record carries two independently-expiring maps: `dials` (ids this
//! peer asked to reach) and `rings` (ids that asked to reach this peer).
//! A ring on B mirrors a dial on A, but the two are written and pruned
//! separately, so one side may briefly outlive the other. Keeping them
//! apart means an introduction touches at most two records and never needs
//! a relation table.
//!
//! The whole directory sits behind one exclusive lock (`SharedDirectory`).
//! Callers must release it before any network send.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use burrow_core::wire::{validate_id, PunchPoint};

/// Server-side state for one peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: String,
    /// Public endpoint the last ping arrived from.
    pub addr: SocketAddr,
    pub last_seen: Instant,
    /// Target id → time the dial was last requested.
    pub dials: HashMap<String, Instant>,
    /// Requester id → time the ring was last recorded.
    pub rings: HashMap<String, Instant>,
}

impl PeerRecord {
    fn new(id: String, addr: SocketAddr, now: Instant) -> Self {
        Self {
            id,
            addr,
            last_seen: now,
            dials: HashMap::new(),
            rings: HashMap::new(),
        }
    }
}

/// What one expiration pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryStats {
    pub peers: usize,
    pub dials: usize,
    pub rings: usize,
}

impl ExpiryStats {
    pub fn is_empty(&self) -> bool {
        self.peers == 0 && self.dials == 0 && self.rings == 0
    }
}

/// The peer table. Keyed on exact id bytes; last writer wins on address.
#[derive(Debug, Default)]
pub struct Directory {
    peers: HashMap<String, PeerRecord>,
}

/// The directory as shared between the receive, pong, expiry and lookup
/// paths.
pub type SharedDirectory = Arc<Mutex<Directory>>;

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedDirectory {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Refresh or create the record for `id`. Returns true if the peer was
    /// previously unknown.
    pub fn upsert(&mut self, id: &str, addr: SocketAddr, now: Instant) -> bool {
        match self.peers.get_mut(id) {
            Some(record) => {
                record.last_seen = now;
                record.addr = addr;
                false
            }
            None => {
                self.peers
                    .insert(id.to_string(), PeerRecord::new(id.to_string(), addr, now));
                tracing::debug!(peer = %id, %addr, "peer registered");
                true
            }
        }
    }

    /// Record that `requester` wants to reach `target`.
    ///
    /// The requester must already be known; otherwise nothing is recorded.
    /// The ring side is only written if the target is currently known. An
    /// unknown target picks the introduction up from the dial side once it
    /// pings.
    pub fn record_intro_request(&mut self, requester: &str, target: &str, now: Instant) {
        if requester == target {
            return;
        }
        let Some(record) = self.peers.get_mut(requester) else {
            return;
        };
        record.dials.insert(target.to_string(), now);

        let ring = match self.peers.get_mut(target) {
            Some(target_record) => {
                target_record.rings.insert(requester.to_string(), now);
                true
            }
            None => false,
        };
        tracing::trace!(%requester, %target, ring, "introduction recorded");
    }

    /// Candidate punch targets for `id`: the union of its dials and rings,
    /// resolved to current addresses. Unknown ids and peers silent for longer
    /// than `lifetime` are skipped, duplicates collapse, and the result is
    /// sorted by id.
    pub fn candidates_for(&self, id: &str, now: Instant, lifetime: Duration) -> Vec<PunchPoint> {
        let Some(record) = self.peers.get(id) else {
            return Vec::new();
        };

        let mut resolved = BTreeMap::new();
        for other in record.dials.keys().chain(record.rings.keys()) {
            if other == id {
                continue;
            }
            match self.peers.get(other) {
                Some(peer) if now.saturating_duration_since(peer.last_seen) <= lifetime => {
                    resolved.insert(other.clone(), peer.addr.to_string());
                }
                _ => {}
            }
        }

        resolved
            .into_iter()
            .map(|(id, address)| PunchPoint { id, address })
            .collect()
    }

    /// Drop records not seen within `lifetime`, then prune dials and rings
    /// older than `lifetime` on the survivors.
    pub fn expire(&mut self, now: Instant, lifetime: Duration) -> ExpiryStats {
        let is_stale = |t: &Instant| now.saturating_duration_since(*t) > lifetime;
        let mut stats = ExpiryStats::default();

        let before = self.peers.len();
        self.peers.retain(|id, record| {
            let stale = is_stale(&record.last_seen);
            if stale {
                tracing::trace!(peer = %id, "peer expired");
            }
            !stale
        });
        stats.peers = before - self.peers.len();

        for record in self.peers.values_mut() {
            let dials = record.dials.len();
            record.dials.retain(|_, t| !is_stale(t));
            stats.dials += dials - record.dials.len();

            let rings = record.rings.len();
            record.rings.retain(|_, t| !is_stale(t));
            stats.rings += rings - record.rings.len();
        }

        stats
    }

    /// Last-known address of `id`.
    pub fn lookup(&self, id: &str) -> Option<SocketAddr> {
        self.peers.get(id).map(|r| r.addr)
    }

    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    /// Snapshot of every known id.
    pub fn known_ids(&self) -> Vec<String> {
        self.peers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Resolve a peer id to its last-known address, as text.
///
/// This is the entry point for external lookups: the query is trimmed and
/// must be a valid id. The lock is held for a single map read.
pub async fn lookup(directory: &SharedDirectory, query: &str) -> Option<String> {
    let id = query.trim();
    validate_id(id).ok()?;
    let addr = directory.lock().await.lookup(id)?;
    Some(addr.to_string())
}
