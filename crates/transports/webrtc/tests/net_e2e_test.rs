//! End-to-end adapter tests over the in-process engine
//!
//! Signaling runs over real TCP/UDP loopback sockets or in-memory duplex
//! pipes; the peer connections themselves come from `MemoryEngine`, so no
//! ICE traffic is needed.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test net_e2e_test -- --nocapture
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use webrtc_net::signaling::{read_frame, write_frame};
use webrtc_net::{
    Conn, Error, LifecycleState, Listener, MemoryEngine, NetConfig, SessionDescription,
    WebRtcNet,
};

/// Initialize test logging (call once per test)
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,webrtc_net=debug")
        .try_init();
}

fn memory_net() -> (WebRtcNet, MemoryEngine) {
    let engine = MemoryEngine::new();
    let net = WebRtcNet::with_engine(NetConfig::local_only(), Arc::new(engine.clone()))
        .expect("valid config");
    (net, engine)
}

const STEP: Duration = Duration::from_secs(2);

// ============================================================================
// Stream Connection Tests
// ============================================================================

#[tokio::test]
async fn test_ping_pong_over_tcp_signaling() -> anyhow::Result<()> {
    init_logging();
    let (net, engine) = memory_net();

    let listener = net.listen(TcpListener::bind("127.0.0.1:0").await?);
    let addr = listener.local_addr().expect("tcp listener has an address");

    let dialed = net.dial(TcpStream::connect(addr).await?).await?;
    let accepted = tokio::time::timeout(STEP, listener.accept()).await??;

    assert_eq!(dialed.remote_addr(), Some(addr));
    assert_eq!(accepted.local_addr(), Some(addr));

    dialed.write(b"ping").await?;
    let mut buf = [0u8; 64];
    let n = tokio::time::timeout(STEP, accepted.read(&mut buf)).await??;
    assert_eq!(&buf[..n], b"ping");

    accepted.write(b"pong").await?;
    let n = tokio::time::timeout(STEP, dialed.read(&mut buf)).await??;
    assert_eq!(&buf[..n], b"pong");

    dialed.close().await?;
    accepted.close().await?;
    listener.close().await?;
    assert_eq!(engine.session_count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_offer_and_answer_on_the_wire() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();

    // Sit between the two sides to observe the exact frames.
    let (dial_side, mut relay_a) = tokio::io::duplex(4096);
    let (mut relay_b, listen_side) = tokio::io::duplex(4096);

    let accepting = {
        let net = net.clone();
        tokio::spawn(async move { net.accept_stream(listen_side).await })
    };
    let dialed = net.dial(dial_side).await?;

    let offer = read_frame(&mut relay_a, 65_536).await?;
    let offer_json: serde_json::Value = serde_json::from_slice(&offer)?;
    assert_eq!(offer_json["type"], "offer");
    assert!(offer_json["sdp"].is_string());
    write_frame(&mut relay_b, &offer, 65_536).await?;

    let answer = read_frame(&mut relay_b, 65_536).await?;
    let answer_json: serde_json::Value = serde_json::from_slice(&answer)?;
    assert_eq!(answer_json["type"], "answer");
    write_frame(&mut relay_a, &answer, 65_536).await?;

    let accepted = accepting.await??;
    dialed.write(b"ping").await?;
    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(STEP, accepted.read(&mut buf)).await??;
    assert_eq!(&buf[..n], b"ping");
    Ok(())
}

#[tokio::test]
async fn test_truncated_remainder_is_never_returned() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();
    let (dial_side, listen_side) = tokio::io::duplex(4096);

    let accepting = {
        let net = net.clone();
        tokio::spawn(async move { net.accept_stream(listen_side).await })
    };
    let dialed = net.dial(dial_side).await?;
    let accepted = accepting.await??;

    dialed.write(b"0123456789").await?;
    dialed.write(b"second").await?;

    let mut small = [0u8; 4];
    assert_eq!(accepted.read(&mut small).await?, 4);
    assert_eq!(&small, b"0123");

    let mut buf = [0u8; 32];
    let n = accepted.read(&mut buf).await?;
    assert_eq!(&buf[..n], b"second");
    Ok(())
}

#[tokio::test]
async fn test_close_is_idempotent_and_final() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();
    let (dial_side, listen_side) = tokio::io::duplex(4096);

    let accepting = {
        let net = net.clone();
        tokio::spawn(async move { net.accept_stream(listen_side).await })
    };
    let dialed = Arc::new(net.dial(dial_side).await?);
    let _accepted = accepting.await??;
    dialed.ready().await?;

    let mut closers = Vec::new();
    for _ in 0..4 {
        let dialed = Arc::clone(&dialed);
        closers.push(tokio::spawn(async move { dialed.close().await }));
    }
    for closer in closers {
        assert!(closer.await?.is_ok());
    }
    assert!(dialed.close().await.is_ok());
    assert_eq!(dialed.state(), LifecycleState::Closed);

    let mut buf = [0u8; 4];
    assert!(matches!(
        dialed.read(&mut buf).await,
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        dialed.write(b"x").await,
        Err(Error::ConnectionClosed)
    ));
    Ok(())
}

#[tokio::test]
async fn test_handshake_failure_wakes_blocked_reader() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();
    let (dial_side, mut bogus_listener) = tokio::io::duplex(4096);

    let dialed = Arc::new(net.dial(dial_side).await?);
    let reader = {
        let dialed = Arc::clone(&dialed);
        tokio::spawn(async move {
            let mut buf = [0u8; 4];
            dialed.read(&mut buf).await
        })
    };

    // Reply to the offer with something that is not a session description.
    let _offer = read_frame(&mut bogus_listener, 65_536).await?;
    write_frame(&mut bogus_listener, b"{\"hello\":1}", 65_536).await?;

    let result = tokio::time::timeout(STEP, reader).await??;
    match result {
        Err(Error::HandshakeFailed(reason)) => assert!(reason.contains("Serialization")),
        other => panic!("expected handshake failure, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_handshake_timeout() -> anyhow::Result<()> {
    init_logging();
    let engine = MemoryEngine::new();
    let config = NetConfig::local_only().with_handshake_timeout(Some(Duration::from_millis(50)));
    let net = WebRtcNet::with_engine(config, Arc::new(engine))?;

    // Nobody ever answers.
    let (dial_side, _silent) = tokio::io::duplex(4096);
    let dialed = net.dial(dial_side).await?;

    let err = tokio::time::timeout(STEP, dialed.write(b"x"))
        .await?
        .unwrap_err();
    assert!(err.to_string().contains("timed out"));
    Ok(())
}

#[tokio::test]
async fn test_transport_failure_after_signaling() -> anyhow::Result<()> {
    init_logging();
    let (net, engine) = memory_net();
    engine.set_unreachable(true);

    let (dial_side, listen_side) = tokio::io::duplex(4096);
    let accepting = {
        let net = net.clone();
        tokio::spawn(async move { net.accept_stream(listen_side).await })
    };
    let dialed = net.dial(dial_side).await?;

    // Signaling succeeds; the connection itself never comes up.
    let accepted = accepting.await??;

    let err = tokio::time::timeout(STEP, dialed.write(b"x"))
        .await?
        .unwrap_err();
    assert!(matches!(err, Error::HandshakeFailed(_)), "got {:?}", err);

    let mut buf = [0u8; 4];
    let err = tokio::time::timeout(STEP, accepted.read(&mut buf))
        .await?
        .unwrap_err();
    assert!(err.is_closed(), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn test_stream_write_deadline_before_open() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();
    let (dial_side, _silent) = tokio::io::duplex(4096);
    let dialed = net.dial(dial_side).await?;

    dialed.set_write_deadline(Some(Instant::now() + Duration::from_millis(30)));
    let err = dialed.write(b"x").await.unwrap_err();
    assert!(err.is_timeout());

    dialed.set_write_deadline(None);
    let blocked = tokio::time::timeout(Duration::from_millis(50), dialed.write(b"x")).await;
    assert!(blocked.is_err(), "cleared deadline must not fire");
    Ok(())
}

// ============================================================================
// Listener Tests
// ============================================================================

#[tokio::test]
async fn test_concurrent_accept_delivers_each_once() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();

    let listener = Arc::new(net.listen(TcpListener::bind("127.0.0.1:0").await?));
    let addr = listener.local_addr().expect("tcp listener has an address");

    const CONNS: usize = 6;
    let mut acceptors = Vec::new();
    for _ in 0..CONNS {
        let listener = Arc::clone(&listener);
        acceptors.push(tokio::spawn(async move {
            let conn = listener.accept().await?;
            let mut buf = [0u8; 16];
            let n = conn.read(&mut buf).await?;
            Ok::<_, Error>(buf[..n].to_vec())
        }));
    }

    let mut dialed = Vec::new();
    for i in 0..CONNS {
        let conn = net.dial(TcpStream::connect(addr).await?).await?;
        conn.write(format!("conn-{}", i).as_bytes()).await?;
        dialed.push(conn);
    }

    let mut seen = HashSet::new();
    for acceptor in acceptors {
        let payload = tokio::time::timeout(STEP, acceptor).await???;
        assert!(seen.insert(payload), "connection delivered twice");
    }
    assert_eq!(seen.len(), CONNS);

    listener.close().await?;
    assert!(matches!(
        listener.accept().await,
        Err(Error::ConnectionClosed)
    ));
    Ok(())
}

#[tokio::test]
async fn test_listener_survives_bad_dialer() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();

    let listener = net.listen(TcpListener::bind("127.0.0.1:0").await?);
    let addr = listener.local_addr().expect("tcp listener has an address");

    // A client that sends an oversized frame header and hangs up.
    let mut bad = TcpStream::connect(addr).await?;
    bad.write_u32(u32::MAX).await?;
    bad.shutdown().await?;

    // A client that sends an answer where an offer is expected.
    let mut confused = TcpStream::connect(addr).await?;
    let answer = SessionDescription::answer("memory:nobody").to_json()?;
    write_frame(&mut confused, &answer, 65_536).await?;
    let mut rest = Vec::new();
    let _ = confused.read_to_end(&mut rest).await;

    let good = net.dial(TcpStream::connect(addr).await?).await?;
    let accepted = tokio::time::timeout(STEP, listener.accept()).await??;

    good.write(b"still here").await?;
    let mut buf = [0u8; 32];
    let n = tokio::time::timeout(STEP, accepted.read(&mut buf)).await??;
    assert_eq!(&buf[..n], b"still here");
    Ok(())
}

#[tokio::test]
async fn test_listener_close_frees_the_port() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();

    let listener = net.listen(TcpListener::bind("127.0.0.1:0").await?);
    let addr = listener.local_addr().expect("tcp listener has an address");

    let dialed = net.dial(TcpStream::connect(addr).await?).await?;
    let _accepted = tokio::time::timeout(STEP, listener.accept()).await??;
    dialed.close().await?;

    listener.close().await?;
    let rebound = TcpListener::bind(addr).await;
    assert!(rebound.is_ok(), "address still bound after close: {:?}", rebound.err());
    Ok(())
}

#[tokio::test]
async fn test_listener_as_trait_object() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();

    let listener: Box<dyn Listener> =
        Box::new(net.listen(TcpListener::bind("127.0.0.1:0").await?));
    let addr = listener.local_addr().expect("tcp listener has an address");

    let dialed: Box<dyn Conn> = Box::new(net.dial(TcpStream::connect(addr).await?).await?);
    let accepted = tokio::time::timeout(STEP, listener.accept()).await??;

    dialed.write(b"dyn").await?;
    let mut buf = [0u8; 8];
    let n = accepted.read(&mut buf).await?;
    assert_eq!(&buf[..n], b"dyn");

    listener.close().await?;
    Ok(())
}

// ============================================================================
// Datagram Connection Tests
// ============================================================================

#[tokio::test]
async fn test_datagram_exchange_over_udp_signaling() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();

    let listen_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let listen_addr = listen_socket.local_addr()?;
    let dial_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let dial_addr = dial_socket.local_addr()?;

    let accepting = {
        let net = net.clone();
        tokio::spawn(async move { net.accept_packet(listen_socket).await })
    };
    let dialed = net.dial_packet(dial_socket, listen_addr).await?;
    let accepted = tokio::time::timeout(STEP, accepting).await???;

    dialed.ready().await?;
    accepted.ready().await?;
    assert_eq!(accepted.remote_addr(), dial_addr);

    dialed.write_to(b"ping", listen_addr).await?;
    let mut buf = [0u8; 16];
    let (n, from) = tokio::time::timeout(STEP, accepted.read_from(&mut buf)).await??;
    assert_eq!(&buf[..n], b"ping");
    assert_eq!(from, dial_addr);

    accepted.write_to(b"pong", from).await?;
    let (n, from) = tokio::time::timeout(STEP, dialed.read_from(&mut buf)).await??;
    assert_eq!(&buf[..n], b"pong");
    assert_eq!(from, listen_addr);

    dialed.close().await?;
    assert!(matches!(
        dialed.read_from(&mut buf).await,
        Err(Error::ConnectionClosed)
    ));
    assert!(matches!(
        dialed.write_to(b"x", listen_addr).await,
        Err(Error::ConnectionClosed)
    ));
    Ok(())
}

#[tokio::test]
async fn test_datagram_read_deadline_replaced_and_cleared() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();

    let listen_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let listen_addr = listen_socket.local_addr()?;
    let accepting = {
        let net = net.clone();
        tokio::spawn(async move { net.accept_packet(listen_socket).await })
    };
    let dialed = Arc::new(
        net.dial_packet(UdpSocket::bind("127.0.0.1:0").await?, listen_addr)
            .await?,
    );
    let accepted = accepting.await??;
    dialed.ready().await?;
    accepted.ready().await?;

    // A far deadline replaced by a near one fires at the near one.
    dialed.set_read_deadline(Some(Instant::now() + Duration::from_secs(60)));
    let reader = {
        let dialed = Arc::clone(&dialed);
        tokio::spawn(async move {
            let mut buf = [0u8; 4];
            dialed.read_from(&mut buf).await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    dialed.set_read_deadline(Some(Instant::now() + Duration::from_millis(20)));
    let result = tokio::time::timeout(STEP, reader).await??;
    assert!(matches!(result, Err(Error::DeadlineExceeded)));

    // Clearing it lets the next read wait for data again.
    dialed.set_read_deadline(None);
    accepted.write_to(b"late", listen_addr).await?;
    let mut buf = [0u8; 8];
    let (n, _) = tokio::time::timeout(STEP, dialed.read_from(&mut buf)).await??;
    assert_eq!(&buf[..n], b"late");
    Ok(())
}

#[tokio::test]
async fn test_datagram_accept_ignores_stray_traffic() -> anyhow::Result<()> {
    init_logging();
    let (net, _engine) = memory_net();

    let listen_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let listen_addr = listen_socket.local_addr()?;

    let stray = UdpSocket::bind("127.0.0.1:0").await?;
    stray.send_to(b"garbage", listen_addr).await?;

    let accepting = {
        let net = net.clone();
        tokio::spawn(async move { net.accept_packet(listen_socket).await })
    };
    let dial_socket = UdpSocket::bind("127.0.0.1:0").await?;
    let dial_addr = dial_socket.local_addr()?;
    let dialed = net.dial_packet(dial_socket, listen_addr).await?;
    let accepted = tokio::time::timeout(STEP, accepting).await???;

    assert_eq!(accepted.remote_addr(), dial_addr);
    dialed.ready().await?;
    accepted.ready().await?;

    dialed.write_to(b"hello", listen_addr).await?;
    let mut buf = [0u8; 16];
    let (n, from) = tokio::time::timeout(STEP, accepted.read_from(&mut buf)).await??;
    assert_eq!(&buf[..n], b"hello");
    assert_eq!(from, dial_addr);
    Ok(())
}
