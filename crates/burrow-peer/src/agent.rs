use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

use burrow_core::wire::{self, Ping, WireError, PUNCH_LINGER_BURSTS};
use burrow_core::Timing;
use burrow_services::{
    DialError, DialTracker, PunchTable, SharedDialTracker, SharedPunchTable,
};

/// Agent setup failures.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid agent id: {0}")]
    InvalidId(WireError),

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

/// State shared by the agent's loops and punch senders.
pub(crate) struct AgentContext {
    pub id: String,
    pub socket: Arc<UdpSocket>,
    pub server: SocketAddr,
    pub dials: SharedDialTracker,
    pub punches: SharedPunchTable,
    pub timing: Timing,
    pub shutdown: broadcast::Sender<()>,
}

pub struct Agent {
    ctx: Arc<AgentContext>,
    local_addr: SocketAddr,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

async fn resolve(addr: &str) -> Result<SocketAddr, AgentError> {
    tokio::net::lookup_host(addr)
        .await
        .map_err(|source| AgentError::Resolve {
            addr: addr.to_string(),
            source,
        })?
        .next()
        .ok_or_else(|| AgentError::NoAddress(addr.to_string()))
}

impl Agent {
    /// Bind `bind`, resolve `server`, and start the ping, receive and
    /// dial-expiration loops.
    pub async fn start(
        id: &str,
        bind: &str,
        server: &str,
        timing: Timing,
    ) -> Result<Self, AgentError> {
        wire::validate_id(id).map_err(AgentError::InvalidId)?;

        let server = resolve(server).await?;
        let bind_addr = resolve(bind).await?;
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| AgentError::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = socket.local_addr().map_err(AgentError::LocalAddr)?;

        let (shutdown, _) = broadcast::channel(1);
        let ctx = Arc::new(AgentContext {
            id: id.to_string(),
            socket: Arc::new(socket),
            server,
            dials: DialTracker::shared(),
            punches: PunchTable::new(PUNCH_LINGER_BURSTS, timing.dial_timeout())
                .with_settle_grace(timing.punch_interval() * (PUNCH_LINGER_BURSTS + 1))
                .into_shared(),
            timing,
            shutdown,
        });

        tracing::info!(id, addr = %local_addr, %server, "agent starting");

        let tasks = vec![
            tokio::spawn(ping_loop(ctx.clone(), ctx.shutdown.subscribe())),
            tokio::spawn(crate::receive::receive_loop(
                ctx.clone(),
                ctx.shutdown.subscribe(),
            )),
            tokio::spawn(dial_expiry_loop(ctx.clone(), ctx.shutdown.subscribe())),
        ];

        Ok(Self {
            ctx,
            local_addr,
            tasks: Mutex::new(tasks),
        })
    }

    pub fn id(&self) -> &str {
        &self.ctx.id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Ask the server to introduce us to `target` and wait until its cargo
    /// arrives. Resolves to the endpoint the cargo came from, or a timeout
    /// once the dial is older than the dial timeout.
    pub async fn dial(&self, target: &str) -> Result<SocketAddr, DialError> {
        if let Err(e) = wire::validate_id(target) {
            tracing::debug!(peer = %target, error = %e, "rejecting dial");
            return Err(DialError::InvalidTarget(target.to_string()));
        }
        if target == self.ctx.id {
            return Err(DialError::InvalidTarget(target.to_string()));
        }

        self.ctx.punches.lock().await.release(target);
        let pending = self
            .ctx
            .dials
            .lock()
            .await
            .begin_dial(target, Instant::now());
        tracing::debug!(peer = %target, "dialing");

        send_ping(&self.ctx).await;

        let result = pending.wait().await;
        match &result {
            Ok(addr) => tracing::info!(peer = %target, %addr, "dial complete"),
            Err(e) => tracing::info!(peer = %target, error = %e, "dial failed"),
        }
        result
    }

    /// Whether a punch sender is currently running toward `target`.
    pub async fn is_punching(&self, target: &str) -> bool {
        self.ctx.punches.lock().await.is_punching(target)
    }

    /// Stop every loop and punch sender. Outstanding and later dials
    /// resolve to `DialError::Aborted`.
    pub async fn shutdown(&self) {
        let aborted = self.ctx.dials.lock().await.close();
        let _ = self.ctx.shutdown.send(());

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "agent task panicked");
            }
        }
        tracing::info!(id = %self.ctx.id, aborted, "agent stopped");
    }
}

/// Send one ping listing every target we are still dialing.
pub(crate) async fn send_ping(ctx: &AgentContext) {
    let dialing = ctx.dials.lock().await.active_target_ids();
    let ping = Ping {
        id: ctx.id.clone(),
        dialing,
    };

    let bytes = match wire::encode(&ping) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "ping encode failed");
            return;
        }
    };
    match ctx.socket.send_to(&bytes, ctx.server).await {
        Ok(_) => tracing::trace!(dialing = ping.dialing.len(), "ping sent"),
        Err(e) => tracing::warn!(server = %ctx.server, error = %e, "ping send failed"),
    }
}

async fn ping_loop(ctx: Arc<AgentContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = time::interval(ctx.timing.ping_period());
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("ping loop shutting down");
                return;
            }
            _ = interval.tick() => send_ping(&ctx).await,
        }
    }
}

/// Time out old dials and stop punching toward targets nobody is waiting
/// for any more. Abandoned targets stay withheld while the server still
/// lists them.
async fn dial_expiry_loop(ctx: Arc<AgentContext>, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = time::interval(ctx.timing.ping_period());
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    let dial_timeout = ctx.timing.dial_timeout();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::debug!("dial expiry shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        let now = Instant::now();
        let (fired, abandoned) = {
            let mut dials = ctx.dials.lock().await;
            let fired = dials.expire(now, dial_timeout);
            let mut abandoned: Vec<String> = fired
                .iter()
                .map(|t| t.target_id.clone())
                .filter(|target| !dials.is_dialing(target))
                .collect();
            abandoned.dedup();
            (fired, abandoned)
        };

        for ticket in fired {
            tracing::debug!(peer = %ticket.target_id, "dial timed out");
            ticket.time_out(now);
        }

        if !abandoned.is_empty() {
            let mut punches = ctx.punches.lock().await;
            for target in &abandoned {
                punches.abandon(target, now);
            }
        }
    }
}
