//! Rendezvous server: one UDP socket, one peer directory, three loops.
//!
//! The receive loop ingests pings, the pong loop tells every known peer
//! whom to punch, and the expiry loop forgets silent peers and stale
//! introductions. All three share the directory lock and never hold it
//! across a send.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use burrow_core::Timing;
use burrow_services::{Directory, SharedDirectory};

pub mod expiry;
pub mod listener;
pub mod pong;

/// Setup failures. Reported once; the server does not start.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to resolve {addr}: {source}")]
    Resolve {
        addr: String,
        source: std::io::Error,
    },

    #[error("{0} resolved to no addresses")]
    NoAddress(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("socket has no local address: {0}")]
    LocalAddr(std::io::Error),
}

/// Resolve a `host:port` string to its first socket address.
pub async fn resolve(addr: &str) -> Result<SocketAddr, ServerError> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|source| ServerError::Resolve {
            addr: addr.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| ServerError::NoAddress(addr.to_string()))
}

pub struct RendezvousServer {
    socket: Arc<UdpSocket>,
    directory: SharedDirectory,
    timing: Timing,
    local_addr: SocketAddr,
}

/// Handles to the server's loops.
pub struct ServerTasks {
    pub receive: JoinHandle<()>,
    pub pong: JoinHandle<()>,
    pub expiry: JoinHandle<()>,
}

impl RendezvousServer {
    /// Resolve and bind the ping socket.
    pub async fn bind(addr: &str, timing: Timing) -> Result<Self, ServerError> {
        let bind_addr = resolve(addr).await?;
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr().map_err(ServerError::LocalAddr)?;

        tracing::info!(addr = %local_addr, "rendezvous socket bound");

        Ok(Self {
            socket: Arc::new(socket),
            directory: Directory::shared(),
            timing,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The directory, for the lookup API and for inspection.
    pub fn directory(&self) -> SharedDirectory {
        self.directory.clone()
    }

    /// Resolve `query` to the peer's last-known address.
    pub async fn lookup(&self, query: &str) -> Option<String> {
        burrow_services::lookup(&self.directory, query).await
    }

    /// Start the receive, pong and expiry loops. Each stops when `shutdown`
    /// fires.
    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> ServerTasks {
        tracing::info!(
            pong_period_ms = self.timing.pong_period_ms,
            lifetime_ms = self.timing.lifetime_ms,
            "rendezvous server starting"
        );

        let receive = tokio::spawn(listener::receive_loop(
            self.socket.clone(),
            self.directory.clone(),
            shutdown.subscribe(),
        ));

        let pong = tokio::spawn(pong::pong_loop(
            self.socket.clone(),
            self.directory.clone(),
            self.timing.pong_period(),
            self.timing.lifetime(),
            shutdown.subscribe(),
        ));

        let expiry = tokio::spawn(expiry::expiry_loop(
            self.directory.clone(),
            self.timing.lifetime(),
            shutdown.subscribe(),
        ));

        ServerTasks {
            receive,
            pong,
            expiry,
        }
    }
}
