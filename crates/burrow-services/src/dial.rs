//! Dial tracking for the peer agent.
//!
//! Every call to `dial` registers a ticket. A ticket ends exactly once:
//! successfully when cargo from its target arrives, or with a timeout when
//! the dial-expiration loop finds it older than the dial timeout. Tickets
//! for the same target are independent; re-dialing before the first
//! ticket fires yields two notifications.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;

/// How a dial ends from the caller's point of view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DialError {
    #[error("dial to {target} timed out after {after:?}")]
    Timeout { target: String, after: Duration },

    #[error("invalid dial target: {0}")]
    InvalidTarget(String),

    #[error("agent shut down before the dial completed")]
    Aborted,
}

type Outcome = Result<SocketAddr, DialError>;

/// One outstanding introduction request.
#[derive(Debug)]
pub struct DialTicket {
    pub target_id: String,
    pub issued_at: Instant,
    notify: oneshot::Sender<Outcome>,
}

impl DialTicket {
    /// Deliver a timeout failure. Consumes the ticket so it fires once.
    pub fn time_out(self, now: Instant) {
        let after = now.saturating_duration_since(self.issued_at);
        let _ = self.notify.send(Err(DialError::Timeout {
            target: self.target_id,
            after,
        }));
    }

    fn succeed(self, from: SocketAddr) {
        let _ = self.notify.send(Ok(from));
    }
}

/// The caller's half of a ticket.
#[derive(Debug)]
pub struct PendingDial {
    target_id: String,
    rx: oneshot::Receiver<Outcome>,
}

impl PendingDial {
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Wait for the ticket to fire. Resolves to the endpoint the target's
    /// cargo arrived from.
    pub async fn wait(self) -> Result<SocketAddr, DialError> {
        self.rx.await.unwrap_or(Err(DialError::Aborted))
    }
}

/// Outstanding dial tickets keyed by target id.
#[derive(Debug, Default)]
pub struct DialTracker {
    tickets: HashMap<String, Vec<DialTicket>>,
    closed: bool,
}

pub type SharedDialTracker = Arc<Mutex<DialTracker>>;

impl DialTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedDialTracker {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Register a new ticket for `target_id`. On a closed tracker the
    /// returned dial resolves to `DialError::Aborted` at once.
    pub fn begin_dial(&mut self, target_id: &str, now: Instant) -> PendingDial {
        let (tx, rx) = oneshot::channel();
        if self.closed {
            drop(tx);
            return PendingDial {
                target_id: target_id.to_string(),
                rx,
            };
        }
        self.tickets
            .entry(target_id.to_string())
            .or_default()
            .push(DialTicket {
                target_id: target_id.to_string(),
                issued_at: now,
                notify: tx,
            });
        PendingDial {
            target_id: target_id.to_string(),
            rx,
        }
    }

    /// Remove and return every ticket older than `age_limit`. The caller
    /// fires each with `DialTicket::time_out`.
    pub fn expire(&mut self, now: Instant, age_limit: Duration) -> Vec<DialTicket> {
        let mut fired = Vec::new();
        for list in self.tickets.values_mut() {
            let (old, young): (Vec<_>, Vec<_>) = std::mem::take(list)
                .into_iter()
                .partition(|t| now.saturating_duration_since(t.issued_at) > age_limit);
            *list = young;
            fired.extend(old);
        }
        self.tickets.retain(|_, list| !list.is_empty());
        fired
    }

    /// Distinct targets with at least one outstanding ticket, sorted.
    pub fn active_target_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tickets.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve every ticket for `target_id` with success. Returns how many
    /// were resolved; zero is normal for an unsolicited punch.
    pub fn complete(&mut self, target_id: &str, from: SocketAddr) -> usize {
        let Some(list) = self.tickets.remove(target_id) else {
            return 0;
        };
        let n = list.len();
        for ticket in list {
            ticket.succeed(from);
        }
        n
    }

    /// Abort every outstanding ticket and refuse new ones. Returns how many
    /// were aborted.
    pub fn close(&mut self) -> usize {
        self.closed = true;
        let n = self.len();
        self.tickets.clear();
        n
    }

    pub fn is_dialing(&self, target_id: &str) -> bool {
        self.tickets.contains_key(target_id)
    }

    /// Number of outstanding tickets across all targets.
    pub fn len(&self) -> usize {
        self.tickets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(20);

    fn from() -> SocketAddr {
        SocketAddr::from(([192, 0, 2, 1], 5000))
    }

    #[tokio::test]
    async fn complete_resolves_every_ticket_for_target() {
        let mut tracker = DialTracker::new();
        let now = Instant::now();
        let first = tracker.begin_dial("bob", now);
        let second = tracker.begin_dial("bob", now);
        let other = tracker.begin_dial("carol", now);

        assert_eq!(tracker.complete("bob", from()), 2);
        assert_eq!(first.wait().await, Ok(from()));
        assert_eq!(second.wait().await, Ok(from()));

        assert!(!tracker.is_dialing("bob"));
        assert!(tracker.is_dialing("carol"));
        drop(other);
    }

    #[test]
    fn complete_without_ticket_is_not_an_error() {
        let mut tracker = DialTracker::new();
        assert_eq!(tracker.complete("stranger", from()), 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn active_target_ids_are_distinct_and_sorted() {
        let mut tracker = DialTracker::new();
        let now = Instant::now();
        let _a = tracker.begin_dial("zed", now);
        let _b = tracker.begin_dial("amy", now);
        let _c = tracker.begin_dial("zed", now);

        assert_eq!(tracker.active_target_ids(), vec!["amy", "zed"]);
        assert_eq!(tracker.len(), 3);
    }

    #[tokio::test]
    async fn expire_fires_only_old_tickets() {
        let mut tracker = DialTracker::new();
        let t0 = Instant::now();
        let old = tracker.begin_dial("bob", t0);
        let young = tracker.begin_dial("bob", t0 + Duration::from_secs(10));

        let now = t0 + TIMEOUT + Duration::from_secs(1);
        let fired = tracker.expire(now, TIMEOUT);
        assert_eq!(fired.len(), 1);
        for ticket in fired {
            ticket.time_out(now);
        }

        match old.wait().await {
            Err(DialError::Timeout { target, after }) => {
                assert_eq!(target, "bob");
                assert_eq!(after, TIMEOUT + Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        assert_eq!(tracker.active_target_ids(), vec!["bob"]);
        assert_eq!(tracker.complete("bob", from()), 1);
        assert_eq!(young.wait().await, Ok(from()));
    }

    #[test]
    fn expire_drops_targets_with_no_tickets_left() {
        let mut tracker = DialTracker::new();
        let t0 = Instant::now();
        let _p = tracker.begin_dial("bob", t0);

        assert!(tracker.expire(t0 + TIMEOUT, TIMEOUT).is_empty());
        assert_eq!(tracker.expire(t0 + TIMEOUT * 2, TIMEOUT).len(), 1);
        assert!(tracker.active_target_ids().is_empty());
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn dropped_tracker_aborts_pending_dial() {
        let mut tracker = DialTracker::new();
        let pending = tracker.begin_dial("bob", Instant::now());
        assert_eq!(pending.target_id(), "bob");
        drop(tracker);
        assert_eq!(pending.wait().await, Err(DialError::Aborted));
    }

    #[tokio::test]
    async fn close_aborts_outstanding_and_future_dials() {
        let mut tracker = DialTracker::new();
        let now = Instant::now();
        let before = tracker.begin_dial("bob", now);
        let _also = tracker.begin_dial("carol", now);

        assert_eq!(tracker.close(), 2);
        assert_eq!(before.wait().await, Err(DialError::Aborted));

        let after = tracker.begin_dial("bob", now);
        assert!(tracker.is_empty());
        assert!(tracker.active_target_ids().is_empty());
        assert_eq!(after.wait().await, Err(DialError::Aborted));
    }
}
