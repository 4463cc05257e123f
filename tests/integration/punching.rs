use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};

use burrow_core::wire::{self, Ping};
use burrow_peer::DialError;

use crate::*;

#[tokio::test]
async fn test_mutual_dial_completes_both_sides() -> Result<()> {
    let server = TestServer::start().await?;
    let alice = Arc::new(start_agent("alice", &server).await?);
    let bob = Arc::new(start_agent("bob", &server).await?);
    registered(&server, "alice").await.expect("alice registered");
    registered(&server, "bob").await.expect("bob registered");

    let t = timing();
    let bound = 2 * t.pong_period() + 2 * t.ping_period();
    let started = Instant::now();

    let a = {
        let alice = alice.clone();
        tokio::spawn(async move { alice.dial("bob").await })
    };
    let b = {
        let bob = bob.clone();
        tokio::spawn(async move { bob.dial("alice").await })
    };

    let slack = t.ping_period();
    let a = timeout(bound + slack, a).await.expect("alice dial hung")?;
    let b = timeout(bound + slack, b).await.expect("bob dial hung")?;

    assert_eq!(a, Ok(bob.local_addr()));
    assert_eq!(b, Ok(alice.local_addr()));
    println!("mutual dial completed in {:?}", started.elapsed());

    alice.shutdown().await;
    bob.shutdown().await;
    server.stop().await
}

#[tokio::test]
async fn test_one_sided_dial_reaches_listener() -> Result<()> {
    let server = TestServer::start().await?;
    let alice = start_agent("alice", &server).await?;
    let bob = start_agent("bob", &server).await?;
    registered(&server, "bob").await.expect("bob registered");

    // Bob never dials; the ring alone makes him punch back.
    let result = timeout(Duration::from_secs(3), alice.dial("bob"))
        .await
        .expect("dial hung");
    assert_eq!(result, Ok(bob.local_addr()));

    alice.shutdown().await;
    bob.shutdown().await;
    server.stop().await
}

#[tokio::test]
async fn test_punch_senders_stop_after_completion() -> Result<()> {
    let server = TestServer::start().await?;
    let alice = start_agent("alice", &server).await?;
    let bob = start_agent("bob", &server).await?;
    registered(&server, "bob").await.expect("bob registered");

    alice.dial("bob").await?;

    let (a, b) = (&alice, &bob);
    let settled = eventually(Duration::from_secs(5), move || async move {
        !a.is_punching("bob").await && !b.is_punching("alice").await
    })
    .await;
    assert!(settled, "punch senders kept running after both sides heard cargo");

    // Trailing pongs still list the introduction for a while; the senders
    // must not come back.
    tokio::time::sleep(2 * timing().pong_period()).await;
    assert!(!alice.is_punching("bob").await);
    assert!(!bob.is_punching("alice").await);

    alice.shutdown().await;
    bob.shutdown().await;
    server.stop().await
}

#[tokio::test]
async fn test_redial_after_settle_completes_in_bounds() -> Result<()> {
    let server = TestServer::start().await?;
    let alice = start_agent("alice", &server).await?;
    let bob = start_agent("bob", &server).await?;
    registered(&server, "bob").await.expect("bob registered");

    alice.dial("bob").await?;
    let (a, b) = (&alice, &bob);
    let settled = eventually(Duration::from_secs(5), move || async move {
        !a.is_punching("bob").await && !b.is_punching("alice").await
    })
    .await;
    assert!(settled, "first dial never settled");

    // Bob still remembers settling with alice; her second dial must get
    // an answer anyway.
    let t = timing();
    let bound = 2 * t.pong_period() + 2 * t.ping_period();
    let started = Instant::now();
    let result = timeout(bound + t.ping_period(), alice.dial("bob"))
        .await
        .expect("second dial hung");
    assert_eq!(result, Ok(bob.local_addr()));
    println!("second dial completed in {:?}", started.elapsed());

    alice.shutdown().await;
    bob.shutdown().await;
    server.stop().await
}

#[tokio::test]
async fn test_silent_target_is_not_punched_after_timeout() -> Result<()> {
    let server = TestServer::start().await?;
    let alice = start_agent("alice", &server).await?;

    // Bob keeps his registration alive but never answers cargo.
    let bob = UdpSocket::bind("127.0.0.1:0").await?;
    let ping = wire::encode(&Ping {
        id: "bob".to_string(),
        dialing: Vec::new(),
    })?;
    let server_addr = server.server.local_addr();
    let pinger = tokio::spawn(async move {
        let mut interval = tokio::time::interval(timing().ping_period());
        loop {
            interval.tick().await;
            let _ = bob.send_to(&ping, server_addr).await;
        }
    });
    registered(&server, "bob").await.expect("bob registered");

    let result = alice.dial("bob").await;
    assert!(matches!(result, Err(DialError::Timeout { .. })), "{result:?}");

    // The server lists the introduction for up to two more lifetimes.
    let a = &alice;
    let window = 2 * timing().lifetime() + timing().pong_period();
    let quiet = !eventually(window, move || async move { a.is_punching("bob").await }).await;
    assert!(quiet, "alice went back to punching a target she gave up on");

    pinger.abort();
    alice.shutdown().await;
    server.stop().await
}

#[tokio::test]
async fn test_dial_to_absent_peer_times_out_in_bounds() -> Result<()> {
    let server = TestServer::start().await?;
    let alice = start_agent("alice", &server).await?;

    let t = timing();
    let started = Instant::now();
    let result = alice.dial("ghost").await;
    let elapsed = started.elapsed();

    match result {
        Err(DialError::Timeout { target, .. }) => assert_eq!(target, "ghost"),
        other => panic!("expected timeout, got {other:?}"),
    }
    assert!(elapsed >= t.dial_timeout(), "timed out early: {elapsed:?}");
    assert!(
        elapsed <= t.dial_timeout() + 2 * t.ping_period(),
        "timed out late: {elapsed:?}"
    );

    alice.shutdown().await;
    server.stop().await
}

#[tokio::test]
async fn test_late_target_is_introduced() -> Result<()> {
    let server = TestServer::start().await?;
    let alice = Arc::new(start_agent("alice", &server).await?);

    let dial = {
        let alice = alice.clone();
        tokio::spawn(async move { alice.dial("carol").await })
    };

    // Carol shows up after the dial was requested but well within its timeout.
    tokio::time::sleep(timing().ping_period()).await;
    let carol = start_agent("carol", &server).await?;

    let result = timeout(timing().dial_timeout(), dial)
        .await
        .expect("dial hung")?;
    assert_eq!(result, Ok(carol.local_addr()));

    alice.shutdown().await;
    carol.shutdown().await;
    server.stop().await
}
