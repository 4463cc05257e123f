//! Burrow wire format: the four message shapes exchanged over UDP.
//!
//! Agents send `Ping` to the rendezvous server. Everything an agent
//! receives (server pongs and peer cargo) arrives as a `PeerBound`
//! envelope so one socket and one receive loop can demultiplex both.
//!
//! Encoding is bincode with fixed-width integers, little-endian, trailing
//! bytes rejected and a hard `MAX_PACKET_SIZE` limit applied in both
//! directions. Changing any of the options is a breaking wire change.

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Maximum length of a peer id in bytes.
pub const MAX_ID_LEN: usize = 64;

/// Maximum encoded size of any datagram, in either direction.
/// Kept below the 65507-byte UDP payload ceiling.
pub const MAX_PACKET_SIZE: usize = 32 * 1024;

/// How often an agent pings the server.
pub const PING_PERIOD_MS: u64 = 3_000;

/// How often the server pongs every known peer.
pub const PONG_PERIOD_MS: u64 = 3_000;

/// How long a dial waits for cargo from its target.
pub const DIAL_TIMEOUT_MS: u64 = 20_000;

/// Lifetime of presence markers, dial and ring requests.
pub const LIFETIME_MS: u64 = 2 * PING_PERIOD_MS;

/// Interval between cargo bursts of a single punch sender.
pub const PUNCH_INTERVAL_MS: u64 = 1_000;

/// Cargo bursts a punch sender still emits after the target's own cargo
/// arrived, so the target sees ours through its freshly opened mapping.
pub const PUNCH_LINGER_BURSTS: u32 = 3;

/// Bytes a `PeerBound::Pong` adds around its punch points:
/// u32 variant tag plus u64 vector length.
const PONG_ENVELOPE_OVERHEAD: usize = 4 + 8;

// ── Messages ──────────────────────────────────────────────────────────────────

/// Agent → server. Refreshes the sender's presence and lists the ids it
/// wants to be introduced to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub id: String,
    pub dialing: Vec<String>,
}

impl Ping {
    /// Reject pings whose own id the server must not store.
    pub fn validate(&self) -> Result<(), WireError> {
        validate_id(&self.id)
    }

    /// Dialing entries that are acceptable ids. Invalid entries are skipped
    /// individually rather than failing the whole ping.
    pub fn valid_dialing(&self) -> impl Iterator<Item = &str> {
        self.dialing
            .iter()
            .map(String::as_str)
            .filter(|id| validate_id(id).is_ok())
    }
}

/// One candidate punch target: a peer id and its public endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PunchPoint {
    pub id: String,
    /// Textual `host:port` UDP endpoint.
    pub address: String,
}

impl PunchPoint {
    /// Exact encoded size of this point inside a pong.
    pub fn encoded_len(&self) -> usize {
        codec()
            .serialized_size(self)
            .map(|n| n as usize)
            .unwrap_or(usize::MAX)
    }
}

/// Server → agent. Candidate punch targets for the receiving peer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub punches: Vec<PunchPoint>,
}

impl Pong {
    /// Split candidates into as many pongs as needed so that every
    /// `PeerBound::Pong` stays within `MAX_PACKET_SIZE`.
    ///
    /// Order is preserved. An empty input yields one empty pong. A point
    /// that could never fit on its own is dropped.
    pub fn paginate(points: Vec<PunchPoint>) -> Vec<Pong> {
        let budget = MAX_PACKET_SIZE - PONG_ENVELOPE_OVERHEAD;
        let mut pages = Vec::new();
        let mut current = Vec::new();
        let mut used = 0usize;

        for point in points {
            let size = point.encoded_len();
            if size > budget {
                continue;
            }
            if used + size > budget {
                pages.push(Pong {
                    punches: std::mem::take(&mut current),
                });
                used = 0;
            }
            used += size;
            current.push(point);
        }

        if !current.is_empty() || pages.is_empty() {
            pages.push(Pong { punches: current });
        }
        pages
    }
}

/// Agent → agent, sent directly over the punched path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cargo {
    pub origin_id: String,
}

/// Everything an agent can receive. Exactly one payload per datagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerBound {
    Pong(Pong),
    Cargo(Cargo),
}

// ── Codec ─────────────────────────────────────────────────────────────────────

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .with_limit(MAX_PACKET_SIZE as u64)
        .reject_trailing_bytes()
}

/// Encode a message. Fails if the result would exceed `MAX_PACKET_SIZE`.
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, WireError> {
    let bytes = codec()
        .serialize(msg)
        .map_err(|e| WireError::Encode(e.to_string()))?;
    if bytes.len() > MAX_PACKET_SIZE {
        return Err(WireError::Oversized(bytes.len()));
    }
    Ok(bytes)
}

/// Decode a message received from the network.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    if bytes.len() > MAX_PACKET_SIZE {
        return Err(WireError::Oversized(bytes.len()));
    }
    codec()
        .deserialize(bytes)
        .map_err(|e| WireError::Decode(e.to_string()))
}

/// A peer id is any non-empty byte string of at most `MAX_ID_LEN` bytes.
/// No normalisation: ids compare as exact byte strings.
pub fn validate_id(id: &str) -> Result<(), WireError> {
    if id.is_empty() {
        return Err(WireError::EmptyId);
    }
    if id.len() > MAX_ID_LEN {
        return Err(WireError::IdTooLong(id.len()));
    }
    Ok(())
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when encoding or interpreting datagrams.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("datagram of {0} bytes exceeds maximum {}", MAX_PACKET_SIZE)]
    Oversized(usize),

    #[error("peer id is empty")]
    EmptyId,

    #[error("peer id of {0} bytes exceeds maximum {}", MAX_ID_LEN)]
    IdTooLong(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
