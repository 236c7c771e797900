//! Stream Client Integration Tests
//!
//! Drives real clients against local TCP peers: delivery, reconnection,
//! disconnect, outbound writes and bounded shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use test_case::test_case;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

use tcp_stream_client::{
    ClientConfig, ClientError, FrameFormat, ObserverError, ParsedMessage, StreamClient,
    StreamError, StreamObserver, WorkerMode,
};

// =============================================================================
// Helpers
// =============================================================================

#[derive(Debug)]
enum Seen {
    Data(ParsedMessage),
    Connection(bool),
    Error(StreamError),
}

struct ChannelObserver {
    tx: mpsc::UnboundedSender<(Instant, Seen)>,
}

impl ChannelObserver {
    fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<(Instant, Seen)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl StreamObserver for ChannelObserver {
    fn on_data_received(&self, message: &ParsedMessage) -> Result<(), ObserverError> {
        let _ = self.tx.send((Instant::now(), Seen::Data(message.clone())));
        Ok(())
    }

    fn on_connection_changed(&self, connected: bool) -> Result<(), ObserverError> {
        let _ = self.tx.send((Instant::now(), Seen::Connection(connected)));
        Ok(())
    }

    fn on_error(&self, error: &StreamError) -> Result<(), ObserverError> {
        let _ = self.tx.send((Instant::now(), Seen::Error(error.clone())));
        Ok(())
    }
}

async fn next(rx: &mut mpsc::UnboundedReceiver<(Instant, Seen)>) -> (Instant, Seen) {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for observer event")
        .expect("observer channel closed")
}

async fn expect_connection(rx: &mut mpsc::UnboundedReceiver<(Instant, Seen)>, want: bool) -> Instant {
    loop {
        match next(rx).await {
            (at, Seen::Connection(connected)) if connected == want => return at,
            (_, Seen::Connection(other)) => panic!("expected connection({want}), got {other}"),
            _ => {}
        }
    }
}

async fn expect_data(rx: &mut mpsc::UnboundedReceiver<(Instant, Seen)>) -> ParsedMessage {
    loop {
        if let (_, Seen::Data(message)) = next(rx).await {
            return message;
        }
    }
}

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn unused_port() -> u16 {
    let (listener, port) = bind().await;
    drop(listener);
    port
}

// =============================================================================
// Delivery
// =============================================================================

#[test_case(WorkerMode::Task ; "task worker")]
#[test_case(WorkerMode::Isolated ; "isolated worker")]
#[tokio::test]
async fn frames_are_classified_and_counted(mode: WorkerMode) {
    let (listener, port) = bind().await;
    let client = StreamClient::new(ClientConfig::new("127.0.0.1", port).with_worker_mode(mode)).unwrap();
    let (observer, mut rx) = ChannelObserver::pair();
    client.attach(observer);
    assert_ok!(client.start());

    let (mut peer, _) = listener.accept().await.unwrap();
    expect_connection(&mut rx, true).await;
    assert!(client.is_connected());

    let json = br#"{"type":"quote","px":101.25}"#;
    peer.write_all(json).await.unwrap();
    let message = expect_data(&mut rx).await;
    assert_eq!(message.format, FrameFormat::Json);
    assert_eq!(message.message_type, "quote");

    let mut binary = 5_u32.to_be_bytes().to_vec();
    binary.push(b'A');
    binary.extend_from_slice(b"hello");
    peer.write_all(&binary).await.unwrap();
    let message = expect_data(&mut rx).await;
    assert_eq!(message.format, FrameFormat::Binary);
    assert_eq!(message.message_type, "A");
    assert_eq!(message.payload.as_bytes(), Some(&b"hello"[..]));

    let stats = client.get_stats();
    assert_eq!(stats.total_received, 2);
    assert_eq!(stats.total_bytes, (json.len() + binary.len()) as u64);
    assert!(stats.last_received.is_some());

    client.stop().await;
    assert!(!client.is_connected());
    assert!(!client.is_running());
}

#[tokio::test]
async fn failing_observer_does_not_block_others() {
    struct Rejecting {
        errors: mpsc::UnboundedSender<StreamError>,
    }

    impl StreamObserver for Rejecting {
        fn on_data_received(&self, _message: &ParsedMessage) -> Result<(), ObserverError> {
            Err(ObserverError::new("cannot handle"))
        }

        fn on_error(&self, error: &StreamError) -> Result<(), ObserverError> {
            let _ = self.errors.send(error.clone());
            Ok(())
        }
    }

    let (listener, port) = bind().await;
    let client = StreamClient::new(ClientConfig::new("127.0.0.1", port)).unwrap();
    let (first, mut first_rx) = ChannelObserver::pair();
    let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
    let (third, mut third_rx) = ChannelObserver::pair();
    client.attach(first);
    client.attach(Arc::new(Rejecting { errors: errors_tx }));
    client.attach(third);
    client.start().unwrap();

    let (mut peer, _) = listener.accept().await.unwrap();
    peer.write_all(b"abc").await.unwrap();

    assert_eq!(expect_data(&mut first_rx).await.format, FrameFormat::Text);
    assert_eq!(expect_data(&mut third_rx).await.format, FrameFormat::Text);

    let error = timeout(Duration::from_secs(5), errors_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(error, StreamError::Observer { ref reason, .. } if reason == "cannot handle"));

    client.stop().await;
    assert!(errors_rx.try_recv().is_err(), "expected exactly one on_error");
}

// =============================================================================
// Reconnection
// =============================================================================

#[tokio::test]
async fn reconnects_after_peer_closes() {
    let (listener, port) = bind().await;
    let interval = Duration::from_millis(200);

    // Accept and immediately close every connection.
    let acceptor = tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                break;
            };
            drop(socket);
        }
    });

    let client = StreamClient::new(
        ClientConfig::new("127.0.0.1", port).with_reconnect_interval(interval),
    )
    .unwrap();
    let (observer, mut rx) = ChannelObserver::pair();
    client.attach(observer);
    client.start().unwrap();

    let mut previous_down: Option<Instant> = None;
    for _ in 0..3 {
        let up = expect_connection(&mut rx, true).await;
        if let Some(down) = previous_down {
            let gap = up.duration_since(down);
            assert!(gap >= interval.mul_f64(0.8), "reconnected after only {gap:?}");
        }
        previous_down = Some(expect_connection(&mut rx, false).await);
    }

    client.stop().await;
    acceptor.abort();
    assert!(client.get_stats().total_received == 0);
}

#[tokio::test]
async fn disconnect_drops_connection_and_reconnects() {
    let (listener, port) = bind().await;
    let client = StreamClient::new(
        ClientConfig::new("127.0.0.1", port).with_reconnect_interval(Duration::from_millis(100)),
    )
    .unwrap();
    let (observer, mut rx) = ChannelObserver::pair();
    client.attach(observer);
    client.start().unwrap();

    let (_first, _) = listener.accept().await.unwrap();
    expect_connection(&mut rx, true).await;

    assert!(client.disconnect());
    expect_connection(&mut rx, false).await;

    let (_second, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .unwrap()
        .unwrap();
    expect_connection(&mut rx, true).await;

    client.stop().await;
}

#[tokio::test]
async fn no_reconnect_when_disabled() {
    let port = unused_port().await;
    let client = StreamClient::new(
        ClientConfig::new("127.0.0.1", port)
            .with_auto_reconnect(false)
            .with_reconnect_interval(Duration::from_millis(50)),
    )
    .unwrap();
    let (observer, mut rx) = ChannelObserver::pair();
    client.attach(observer);
    client.start().unwrap();

    expect_connection(&mut rx, false).await;
    match next(&mut rx).await {
        (_, Seen::Error(StreamError::Connection(_))) => {}
        (_, other) => panic!("expected connection error, got {other:?}"),
    }

    // A second attempt would produce another pair of events.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(rx.try_recv().is_err());

    client.stop().await;
}

// =============================================================================
// Outbound
// =============================================================================

#[tokio::test]
async fn send_writes_to_peer() {
    let (listener, port) = bind().await;
    let client = StreamClient::new(ClientConfig::new("127.0.0.1", port)).unwrap();
    let (observer, mut rx) = ChannelObserver::pair();
    client.attach(observer);

    assert!(matches!(client.send(b"early".to_vec()), Err(ClientError::NotRunning)));
    client.start().unwrap();

    let (mut peer, _) = listener.accept().await.unwrap();
    expect_connection(&mut rx, true).await;

    assert_ok!(client.send(b"ping".to_vec()));
    let mut buf = [0u8; 4];
    timeout(Duration::from_secs(2), peer.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"ping");

    client.stop().await;
    assert_err!(client.send(b"late".to_vec()));
}

// =============================================================================
// Shutdown
// =============================================================================

#[test_case(WorkerMode::Task ; "task worker")]
#[test_case(WorkerMode::Isolated ; "isolated worker")]
#[tokio::test]
async fn stop_is_bounded_during_long_reconnect_wait(mode: WorkerMode) {
    let port = unused_port().await;
    let client = StreamClient::new(
        ClientConfig::new("127.0.0.1", port)
            .with_reconnect_interval(Duration::from_secs(3600))
            .with_worker_mode(mode),
    )
    .unwrap();
    let (observer, mut rx) = ChannelObserver::pair();
    client.attach(observer);
    client.start().unwrap();

    // Wait until the loop is sleeping before its next attempt.
    expect_connection(&mut rx, false).await;

    let started = Instant::now();
    client.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2), "stop took {:?}", started.elapsed());
}

#[tokio::test]
async fn stop_is_bounded_while_connected_to_silent_peer() {
    let (listener, port) = bind().await;
    let client = StreamClient::new(ClientConfig::new("127.0.0.1", port)).unwrap();
    let (observer, mut rx) = ChannelObserver::pair();
    client.attach(observer);
    client.start().unwrap();

    let (_peer, _) = listener.accept().await.unwrap();
    expect_connection(&mut rx, true).await;

    let started = Instant::now();
    client.stop().await;
    assert!(started.elapsed() < Duration::from_secs(2));

    expect_connection(&mut rx, false).await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn client_can_restart_after_stop() {
    let (listener, port) = bind().await;
    let client = StreamClient::new(ClientConfig::new("127.0.0.1", port)).unwrap();
    let (observer, mut rx) = ChannelObserver::pair();
    client.attach(observer);

    client.start().unwrap();
    let (_first, _) = listener.accept().await.unwrap();
    expect_connection(&mut rx, true).await;
    client.stop().await;
    expect_connection(&mut rx, false).await;

    client.start().unwrap();
    let (mut second, _) = listener.accept().await.unwrap();
    expect_connection(&mut rx, true).await;
    second.write_all(b"xyz").await.unwrap();
    expect_data(&mut rx).await;

    // Counters survive the restart.
    assert_eq!(client.get_stats().total_received, 1);
    client.stop().await;
}
