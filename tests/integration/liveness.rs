use std::time::Duration;

use anyhow::Result;

use crate::*;

#[tokio::test]
async fn test_server_forgets_stopped_agent() -> Result<()> {
    let server = TestServer::start().await?;
    let alice = start_agent("alice", &server).await?;
    assert_eq!(registered(&server, "alice").await, Some(alice.local_addr()));

    alice.shutdown().await;

    let directory = server.server.directory();
    let forgotten = eventually(Duration::from_secs(3), || {
        let directory = directory.clone();
        async move { directory.lock().await.lookup("alice").is_none() }
    })
    .await;
    assert!(forgotten, "silent agent still in the directory");

    server.stop().await
}

#[tokio::test]
async fn test_running_agent_stays_registered() -> Result<()> {
    let server = TestServer::start().await?;
    let alice = start_agent("alice", &server).await?;
    registered(&server, "alice").await.expect("alice registered");

    // Several lifetimes; the periodic ping keeps the record alive.
    tokio::time::sleep(timing().lifetime() * 4).await;
    assert_eq!(
        server.server.lookup("alice").await,
        Some(alice.local_addr().to_string())
    );

    alice.shutdown().await;
    server.stop().await
}

#[tokio::test]
async fn test_restarted_agent_moves_address() -> Result<()> {
    let server = TestServer::start().await?;
    let first = start_agent("alice", &server).await?;
    registered(&server, "alice").await.expect("alice registered");
    first.shutdown().await;

    let second = start_agent("alice", &server).await?;
    let moved = second.local_addr();
    let directory = server.server.directory();
    let updated = eventually(Duration::from_secs(3), || {
        let directory = directory.clone();
        async move { directory.lock().await.lookup("alice") == Some(moved) }
    })
    .await;
    assert!(updated, "directory kept the old endpoint");
    assert_eq!(directory.lock().await.len(), 1);

    second.shutdown().await;
    server.stop().await
}
