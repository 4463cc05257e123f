use std::net::SocketAddr;

use anyhow::{Context, Result};
use serde_json::Value;

use burrow_api::ApiState;

use crate::*;

/// Serve the lookup API for `server` on an ephemeral port.
async fn start_api(server: &TestServer, max_connections: usize) -> Result<SocketAddr> {
    let state = ApiState::new(server.server.directory(), max_connections);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, burrow_api::router(state)).await;
    });
    Ok(addr)
}

#[tokio::test]
async fn test_lookup_returns_registered_address() -> Result<()> {
    let server = TestServer::start().await?;
    let api = start_api(&server, 8).await?;
    let alice = start_agent("alice", &server).await?;
    registered(&server, "alice").await.context("alice never registered")?;

    let resp = reqwest::get(format!("http://{api}/api/lookup?q=alice")).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.text().await?, alice.local_addr().to_string());

    let resp = reqwest::get(format!("http://{api}/api/lookup?q=nobody")).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await?, "no such entry");

    let resp = reqwest::get(format!("http://{api}/api/lookup")).await?;
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    alice.shutdown().await;
    server.stop().await
}

#[tokio::test]
async fn test_status_reports_peer_count() -> Result<()> {
    let server = TestServer::start().await?;
    let api = start_api(&server, 8).await?;
    let alice = start_agent("alice", &server).await?;
    let bob = start_agent("bob", &server).await?;
    registered(&server, "alice").await.context("alice never registered")?;
    registered(&server, "bob").await.context("bob never registered")?;

    let status: Value = reqwest::get(format!("http://{api}/api/status"))
        .await?
        .json()
        .await?;
    assert_eq!(status["peers"], 2);

    alice.shutdown().await;
    bob.shutdown().await;
    server.stop().await
}
