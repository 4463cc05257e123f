//! Burrow integration test harness.
//!
//! Every test runs a real rendezvous server and real agents on loopback
//! sockets inside the test process, with protocol timing scaled down so
//! introductions converge in well under a second.
//!
//!   cargo test --test integration

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use burrow_core::Timing;
use burrow_peer::Agent;
use burrowd::{RendezvousServer, ServerTasks};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Protocol timing used by every test: all periods divided by ten.
pub fn timing() -> Timing {
    Timing::scaled_down(10)
}

/// A rendezvous server bound to an ephemeral loopback port.
pub struct TestServer {
    pub server: RendezvousServer,
    shutdown: broadcast::Sender<()>,
    tasks: ServerTasks,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        let server = RendezvousServer::bind("127.0.0.1:0", timing())
            .await
            .context("failed to bind test server")?;
        let (shutdown, _) = broadcast::channel(1);
        let tasks = server.spawn(&shutdown);
        Ok(Self {
            server,
            shutdown,
            tasks,
        })
    }

    pub fn addr(&self) -> String {
        self.server.local_addr().to_string()
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.tasks.receive.await?;
        self.tasks.pong.await?;
        self.tasks.expiry.await?;
        Ok(())
    }
}

/// Start an agent on an ephemeral loopback port pointed at `server`.
pub async fn start_agent(id: &str, server: &TestServer) -> Result<Agent> {
    Agent::start(id, "127.0.0.1:0", &server.addr(), timing())
        .await
        .with_context(|| format!("failed to start agent {id}"))
}

/// Poll `check` every few milliseconds until it holds or `deadline` passes.
pub async fn eventually<F, Fut>(deadline: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    loop {
        if check().await {
            return true;
        }
        if start.elapsed() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Wait until the server has heard from `id`.
pub async fn registered(server: &TestServer, id: &str) -> Option<SocketAddr> {
    let directory = server.server.directory();
    eventually(Duration::from_secs(3), || {
        let directory = directory.clone();
        async move { directory.lock().await.lookup(id).is_some() }
    })
    .await;
    let addr = directory.lock().await.lookup(id);
    addr
}

mod liveness;
mod lookup;
mod punching;
