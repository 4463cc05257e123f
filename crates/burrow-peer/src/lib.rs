//! burrow-peer: the agent half of the hole-punching protocol.
//!
//! An `Agent` keeps itself registered with a rendezvous server, asks for
//! introductions on `dial`, and punches toward every peer the server
//! names until the remote side's cargo comes back.

mod agent;
mod receive;
mod sender;

pub use agent::{Agent, AgentError};
pub use burrow_services::DialError;
