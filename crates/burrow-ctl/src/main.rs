//! burrow-ctl: query a rendezvous server, or run a peer agent.

use anyhow::{Context, Result};
use serde::Deserialize;

use burrow_core::{BurrowConfig, Timing};
use burrow_peer::Agent;

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct StatusResponse {
    peers: usize,
}

// ── Options ───────────────────────────────────────────────────────────────────

struct Options {
    api: String,
    id: String,
    server: String,
    bind: String,
    timing: Timing,
}

impl Options {
    fn from_config(config: &BurrowConfig) -> Self {
        Self {
            api: config.server.api_bind.clone(),
            id: config.peer.id.clone(),
            server: config.peer.server.clone(),
            bind: config.peer.bind.clone(),
            timing: config.timing.clone(),
        }
    }
}

// ── HTTP helpers ──────────────────────────────────────────────────────────────

fn base_url(api: &str) -> String {
    format!("http://{}/api", api)
}

async fn get(url: &str) -> Result<reqwest::Response> {
    reqwest::get(url)
        .await
        .with_context(|| format!("failed to connect to burrowd at {}, is it running?", url))
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn cmd_status(opts: &Options) -> Result<()> {
    let resp: StatusResponse = get(&format!("{}/status", base_url(&opts.api)))
        .await?
        .json()
        .await
        .context("failed to parse response")?;

    println!("Rendezvous server {}", opts.api);
    println!("  Known peers : {}", resp.peers);
    Ok(())
}

async fn cmd_lookup(opts: &Options, id: &str) -> Result<()> {
    let endpoint = format!("{}/lookup", base_url(&opts.api));
    let url = reqwest::Url::parse_with_params(&endpoint, &[("q", id)])
        .context("invalid API address")?;
    let resp = get(url.as_str()).await?;

    let status = resp.status();
    let body = resp.text().await.context("failed to read response")?;
    if status.is_success() {
        println!("{}", body);
        Ok(())
    } else {
        anyhow::bail!("{}: {}", status, body.trim())
    }
}

async fn start_agent(opts: &Options) -> Result<Agent> {
    if opts.id.is_empty() {
        anyhow::bail!("no peer id: pass --id or set peer.id in the config");
    }
    let agent = Agent::start(&opts.id, &opts.bind, &opts.server, opts.timing.clone())
        .await
        .context("failed to start agent")?;
    println!("{} listening on {}", agent.id(), agent.local_addr());
    Ok(agent)
}

async fn cmd_listen(opts: &Options) -> Result<()> {
    let agent = start_agent(opts).await?;
    tokio::signal::ctrl_c().await.ok();
    agent.shutdown().await;
    Ok(())
}

async fn cmd_connect(opts: &Options, remote: &str) -> Result<()> {
    let agent = start_agent(opts).await?;

    let result = tokio::select! {
        r = agent.dial(remote) => r,
        _ = tokio::signal::ctrl_c() => {
            agent.shutdown().await;
            anyhow::bail!("interrupted");
        }
    };

    agent.shutdown().await;
    let addr = result.with_context(|| format!("failed to connect to {}", remote))?;
    println!("connected to {} at {}", remote, addr);
    Ok(())
}

fn print_usage() {
    println!("Usage: burrow-ctl [options] <command>");
    println!();
    println!("Commands:");
    println!("  status              Show rendezvous server status");
    println!("  lookup <id>         Print the last-known address of a peer");
    println!("  listen              Run an agent that accepts introductions");
    println!("  connect <remote>    Run an agent and dial a remote peer");
    println!();
    println!("Options:");
    println!("  --api <addr>      Lookup API address (config: server.api_bind)");
    println!("  --id <id>         Agent id (config: peer.id)");
    println!("  --server <addr>   Rendezvous server UDP address (config: peer.server)");
    println!("  --bind <addr>     Local UDP address (config: peer.bind)");
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = BurrowConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        BurrowConfig::default()
    });
    let mut opts = Options::from_config(&config);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let slot = match args[i].as_str() {
            "--api" => Some(&mut opts.api),
            "--id" => Some(&mut opts.id),
            "--server" => Some(&mut opts.server),
            "--bind" => Some(&mut opts.bind),
            _ => None,
        };
        match slot {
            Some(slot) => {
                i += 1;
                *slot = args
                    .get(i)
                    .with_context(|| format!("{} requires a value", args[i - 1]))?
                    .clone();
            }
            None => remaining.push(&args[i]),
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | []                => cmd_status(&opts).await,
        ["lookup", id]                 => cmd_lookup(&opts, id).await,
        ["listen"]                     => cmd_listen(&opts).await,
        ["connect", remote]            => cmd_connect(&opts, remote).await,
        ["help"] | ["--help"] | ["-h"] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
