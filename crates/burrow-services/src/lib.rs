//! burrow-services: the shared state behind the rendezvous server and the
//! peer agent. Pure data structures with expiration logic; no I/O.

pub mod dial;
pub mod directory;
pub mod punch;

pub use dial::{DialError, DialTicket, DialTracker, PendingDial, SharedDialTracker};
pub use directory::{lookup, Directory, ExpiryStats, PeerRecord, SharedDirectory};
pub use punch::{PunchAction, PunchTable, SharedPunchTable, StopReason};
