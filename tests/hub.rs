use std::time::Duration;
use bytes::Bytes;
use relay_hub::config::HubConfig;
use relay_hub::websocket::memory::{MemoryConnection, MemoryPeer};
use relay_hub::{ClientId, Envelope, Hub};
use serde_json::json;
use tokio::time::{sleep, timeout};
use tokio_test::{assert_err, assert_ok};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn start_hub(config: HubConfig) -> Hub {
    let (hub, hub_loop) = Hub::new(config);
    tokio::spawn(hub_loop.run());
    hub
}

fn connect(hub: &Hub, name: &str) -> (ClientId, MemoryPeer) {
    let (connection, peer) = MemoryConnection::pair(name);
    let id = hub.connect(connection).expect("hub accepts connections");
    (id, peer)
}

async fn next_frame(peer: &mut MemoryPeer) -> Option<Bytes> {
    timeout(RECV_TIMEOUT, peer.recv()).await.expect("timed out waiting for frame")
}

async fn wait_until_gone(hub: &Hub, id: ClientId) {
    for _ in 0..200 {
        if !hub.clients().await.unwrap().contains(&id) {
            return;
        }
        sleep(POLL_INTERVAL).await;
    }
    panic!("client {} was never unregistered", id);
}

#[test_log::test(tokio::test)]
async fn ping_reaches_everyone_but_the_excluded_client() {
    let hub = start_hub(HubConfig::default());
    let (x, mut x_peer) = connect(&hub, "x");
    let (_y, mut y_peer) = connect(&hub, "y");
    let (_z, mut z_peer) = connect(&hub, "z");

    assert_ok!(hub.broadcast(&json!({ "type": "ping" }), Some(x)));
    // Fence: the broadcast has been fanned out once this returns
    assert_eq!(hub.clients().await.unwrap().len(), 3);

    let expected = Bytes::from_static(br#"{"type":"ping"}"#);
    assert_eq!(next_frame(&mut y_peer).await, Some(expected.clone()));
    assert_eq!(next_frame(&mut z_peer).await, Some(expected));

    sleep(Duration::from_millis(50)).await;
    assert!(x_peer.try_recv().is_none());
    assert!(y_peer.try_recv().is_none());
    assert!(z_peer.try_recv().is_none());
}

#[test_log::test(tokio::test)]
async fn every_recipient_sees_identical_bytes() {
    let hub = start_hub(HubConfig::default());
    let mut peers: Vec<MemoryPeer> = (0..5).map(|i| connect(&hub, &format!("p{}", i)).1).collect();

    let envelope = Envelope::new("post_created", json!({ "id": "2F1x", "post_content": "hello" }));
    assert_ok!(hub.broadcast(&envelope, None));

    let mut frames = Vec::new();
    for peer in peers.iter_mut() {
        frames.push(next_frame(peer).await.unwrap());
    }
    assert!(frames.windows(2).all(|pair| pair[0] == pair[1]));

    let decoded: Envelope<serde_json::Value> = serde_json::from_slice(&frames[0]).unwrap();
    assert_eq!(decoded, envelope);
}

#[test_log::test(tokio::test)]
async fn unregistered_client_is_skipped_without_error() {
    let hub = start_hub(HubConfig::default());
    let (x, mut x_peer) = connect(&hub, "x");

    hub.unregister(x);
    assert_ok!(hub.broadcast(&json!({ "type": "message" }), None));

    // Queue released without any frame, then the connection is closed once
    assert_eq!(next_frame(&mut x_peer).await, None);
    assert_eq!(x_peer.close_count(), 1);
    assert!(hub.clients().await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn repeated_unregister_is_a_noop() {
    let hub = start_hub(HubConfig::default());
    let (x, mut x_peer) = connect(&hub, "x");
    let (_y, mut y_peer) = connect(&hub, "y");

    hub.unregister(x);
    hub.unregister(x);
    hub.unregister(ClientId::new());
    assert_ok!(hub.broadcast("after", None));

    assert_eq!(next_frame(&mut y_peer).await, Some(Bytes::from_static(br#""after""#)));
    assert_eq!(next_frame(&mut x_peer).await, None);
    assert_eq!(x_peer.close_count(), 1);
}

#[test_log::test(tokio::test)]
async fn frames_arrive_in_enqueue_order() {
    let hub = start_hub(HubConfig::default());
    let (_id, mut peer) = connect(&hub, "ordered");

    for n in 0..20 {
        assert_ok!(hub.broadcast(&n, None));
    }
    for n in 0..20 {
        assert_eq!(next_frame(&mut peer).await, Some(Bytes::from(n.to_string())));
    }
}

#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn concurrent_registrations_both_receive_next_broadcast() {
    let hub = start_hub(HubConfig::default());

    let hub_a = hub.clone();
    let hub_b = hub.clone();
    let a = tokio::spawn(async move { connect(&hub_a, "a") });
    let b = tokio::spawn(async move { connect(&hub_b, "b") });
    let (_, mut a_peer) = a.await.unwrap();
    let (_, mut b_peer) = b.await.unwrap();

    assert_ok!(hub.broadcast(&json!({ "type": "hello" }), None));

    assert!(next_frame(&mut a_peer).await.is_some());
    assert!(next_frame(&mut b_peer).await.is_some());
    sleep(Duration::from_millis(50)).await;
    assert!(a_peer.try_recv().is_none());
    assert!(b_peer.try_recv().is_none());
}

#[test_log::test(tokio::test)]
async fn write_failure_unregisters_without_affecting_others() {
    let hub = start_hub(HubConfig::default());
    let (broken, mut broken_peer) = connect(&hub, "broken");
    let (_healthy, mut healthy_peer) = connect(&hub, "healthy");

    broken_peer.fail_writes();
    assert_ok!(hub.broadcast("first", None));
    wait_until_gone(&hub, broken).await;
    assert_eq!(next_frame(&mut broken_peer).await, None);
    assert_eq!(broken_peer.close_count(), 1);

    assert_ok!(hub.broadcast("second", None));
    assert_eq!(next_frame(&mut healthy_peer).await, Some(Bytes::from_static(br#""first""#)));
    assert_eq!(next_frame(&mut healthy_peer).await, Some(Bytes::from_static(br#""second""#)));
}

#[test_log::test(tokio::test)]
async fn stalled_client_cannot_hold_up_the_rest() {
    let config = HubConfig {
        queue_capacity: 2,
        write_timeout_ms: 100,
        ..HubConfig::default()
    };
    let hub = start_hub(config);
    let (stalled, stalled_peer) = connect(&hub, "stalled");
    let (_fast, mut fast_peer) = connect(&hub, "fast");

    stalled_peer.stall_writes();
    for n in 0..10 {
        assert_ok!(hub.broadcast(&n, None));
        assert_eq!(next_frame(&mut fast_peer).await, Some(Bytes::from(n.to_string())));
    }

    wait_until_gone(&hub, stalled).await;
    for _ in 0..200 {
        if stalled_peer.close_count() == 1 {
            break;
        }
        sleep(POLL_INTERVAL).await;
    }
    assert_eq!(stalled_peer.close_count(), 1);
}

#[test_log::test(tokio::test)]
async fn relayed_frames_skip_their_sender() {
    let config = HubConfig {
        relay_inbound: true,
        ..HubConfig::default()
    };
    let hub = start_hub(config);
    let (_sender, mut sender_peer) = connect(&hub, "sender");
    let (_listener, mut listener_peer) = connect(&hub, "listener");
    hub.clients().await.unwrap();

    assert!(sender_peer.send(Bytes::from_static(br#"{"type":"chat","payload":"hi"}"#)));

    assert_eq!(
        next_frame(&mut listener_peer).await,
        Some(Bytes::from_static(br#"{"type":"chat","payload":"hi"}"#))
    );
    sleep(Duration::from_millis(50)).await;
    assert!(sender_peer.try_recv().is_none());
}

#[test_log::test(tokio::test)]
async fn inbound_frames_are_ignored_by_default() {
    let hub = start_hub(HubConfig::default());
    let (_sender, sender_peer) = connect(&hub, "sender");
    let (_listener, mut listener_peer) = connect(&hub, "listener");

    assert!(sender_peer.send(Bytes::from_static(b"noise")));
    sleep(Duration::from_millis(50)).await;
    assert!(listener_peer.try_recv().is_none());
    assert_eq!(hub.stats().await.unwrap().broadcasts, 0);
}

#[test_log::test(tokio::test)]
async fn shutdown_closes_every_connection() {
    let hub = start_hub(HubConfig::default());
    let (_a, mut a_peer) = connect(&hub, "a");
    let (_b, mut b_peer) = connect(&hub, "b");
    hub.clients().await.unwrap();

    hub.shutdown();
    assert_eq!(next_frame(&mut a_peer).await, None);
    assert_eq!(next_frame(&mut b_peer).await, None);
    assert_eq!(a_peer.close_count(), 1);
    assert_eq!(b_peer.close_count(), 1);

    assert_err!(hub.broadcast("late", None));
    let (connection, _late_peer) = MemoryConnection::pair("late");
    assert_err!(hub.connect(connection));
    hub.unregister(ClientId::new());
}
