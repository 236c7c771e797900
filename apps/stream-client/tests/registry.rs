//! Client Registry Integration Tests
//!
//! Named clients started, inspected and shut down through the registry.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::time::timeout;

use tcp_stream_client::{ClientConfig, ClientRegistry, RegistryError, TracingObserver};

async fn wait_until(mut check: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn registry_tracks_connected_clients() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let registry = ClientRegistry::new();
    registry
        .create_client("feed", ClientConfig::new("127.0.0.1", port))
        .unwrap();
    registry
        .attach_listener("feed", Arc::new(TracingObserver::new("feed")))
        .unwrap();
    registry.start_client("feed").unwrap();

    let (mut peer, _) = listener.accept().await.unwrap();
    wait_until(|| registry.is_connected("feed")).await;
    assert!(registry.any_connected());

    peer.write_all(br#"{"type":"tick"}"#).await.unwrap();
    wait_until(|| registry.client_stats("feed").is_some_and(|s| s.total_received == 1)).await;

    let all = registry.all_stats();
    assert_eq!(all.len(), 1);
    assert_eq!(all["feed"].total_bytes, 15);

    registry.stop_client("feed").await.unwrap();
    assert!(!registry.is_connected("feed"));
    assert!(registry.contains("feed"));

    registry.shutdown_all().await;
    assert!(registry.is_empty());
}

#[tokio::test]
async fn removed_client_is_stopped() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let registry = ClientRegistry::new();
    let client = registry
        .create_client("feed", ClientConfig::new("127.0.0.1", port))
        .unwrap();
    registry.start_client("feed").unwrap();
    let (_peer, _) = listener.accept().await.unwrap();
    wait_until(|| client.is_connected()).await;

    registry.remove_client("feed").await.unwrap();
    assert!(!client.is_running());
    assert!(!client.is_connected());
    assert!(matches!(
        registry.start_client("feed"),
        Err(RegistryError::NotFound(_))
    ));
}
