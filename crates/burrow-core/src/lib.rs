//! burrow-core: wire schema, codec, timing constants, and configuration.
//! All other Burrow crates depend on this one.

pub mod config;
pub mod wire;

pub use config::{BurrowConfig, Timing};
pub use wire::{Cargo, PeerBound, Ping, Pong, PunchPoint, WireError};
