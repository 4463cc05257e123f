//! burrowd: the rendezvous server.
//!
//! Receives pings, keeps the peer directory, and pongs every known peer
//! with its current punch candidates.

pub mod rendezvous;

pub use rendezvous::{RendezvousServer, ServerError, ServerTasks};
