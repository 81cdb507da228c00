mod common;

use std::time::Duration;

use captain_client::{ChannelConfig, ConnectionState, ReconnectPolicy, ReconnectingChannel};
use captain_shared::{InboundEvent, OutboundEvent};
use common::{wait_for_state, MockConnection, MockSocketServer, WAIT};
use serde_json::json;
use tokio::time::Instant;

const BACKOFF: Duration = Duration::from_millis(100);

async fn connected(
    server: &mut MockSocketServer,
    token: &str,
) -> (ReconnectingChannel, MockConnection) {
    let channel = ReconnectingChannel::new(server.channel_config(BACKOFF));
    channel.connect(token);
    let conn = server.next_connection().await;
    wait_for_state(&channel, ConnectionState::Connected).await;
    (channel, conn)
}

#[tokio::test]
async fn whitespace_token_never_connects() {
    let mut server = MockSocketServer::start().await;
    let channel = ReconnectingChannel::new(server.channel_config(BACKOFF));

    channel.connect("   ");
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    server.expect_no_connection(Duration::from_millis(300)).await;
    assert_eq!(server.accepted(), 0);
}

#[tokio::test]
async fn token_travels_url_encoded() {
    let mut server = MockSocketServer::start().await;
    let (_channel, conn) = connected(&mut server, "a b+c/d").await;
    assert_eq!(conn.uri, "/ws?token=a%20b%2Bc%2Fd");
}

#[tokio::test]
async fn sent_events_arrive_as_tagged_json() {
    let mut server = MockSocketServer::start().await;
    let (channel, mut conn) = connected(&mut server, "tok").await;

    channel.send(&OutboundEvent::AcceptRide {
        ride_id: "r1".into(),
    });
    assert_eq!(
        conn.next_frame().await,
        json!({"event": "accept_ride", "data": {"ride_id": "r1"}})
    );
}

#[tokio::test]
async fn reconnects_after_server_drops_connection() {
    let mut server = MockSocketServer::start().await;
    let (channel, conn) = connected(&mut server, "tok").await;

    drop(conn);
    let again = server.next_connection().await;
    assert_eq!(again.uri, "/ws?token=tok");
    wait_for_state(&channel, ConnectionState::Connected).await;
    assert_eq!(server.accepted(), 2);
}

#[tokio::test]
async fn reconnects_after_failed_dial() {
    // Nothing listens on port 9 of this host.
    let config = ChannelConfig::new("http://127.0.0.1:9", "ws")
        .unwrap()
        .with_reconnect(ReconnectPolicy {
            base_delay: BACKOFF,
            max_delay: BACKOFF * 4,
        });
    let channel = ReconnectingChannel::new(config);

    let mut states = channel.watch_state();
    channel.connect("tok");
    let mut seen = Vec::new();
    while seen.len() < 4 {
        tokio::time::timeout(WAIT, states.changed())
            .await
            .expect("no state change")
            .unwrap();
        seen.push(*states.borrow_and_update());
    }
    assert!(seen.contains(&ConnectionState::Disconnected));
    assert!(seen.contains(&ConnectionState::Connecting));
    assert!(!seen.contains(&ConnectionState::Connected));

    channel.disconnect();
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_during_backoff_prevents_reconnect() {
    let mut server = MockSocketServer::start().await;
    let channel = ReconnectingChannel::new(server.channel_config(Duration::from_millis(300)));
    channel.connect("tok");
    let conn = server.next_connection().await;
    wait_for_state(&channel, ConnectionState::Connected).await;

    drop(conn);
    wait_for_state(&channel, ConnectionState::Disconnected).await;
    channel.disconnect();

    server.expect_no_connection(Duration::from_millis(1_200)).await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn explicit_connect_after_disconnect_works() {
    let mut server = MockSocketServer::start().await;
    let (channel, _conn) = connected(&mut server, "tok").await;

    channel.disconnect();
    assert_eq!(channel.state(), ConnectionState::Disconnected);
    channel.connect("tok2");
    let conn = server.next_connection().await;
    assert_eq!(conn.uri, "/ws?token=tok2");
    wait_for_state(&channel, ConnectionState::Connected).await;
}

#[tokio::test]
async fn connect_if_needed_keeps_live_connection() {
    let mut server = MockSocketServer::start().await;
    let (channel, _conn) = connected(&mut server, "tok").await;

    channel.connect_if_needed("tok");
    server.expect_no_connection(Duration::from_millis(300)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(channel.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn ride_requests_reach_subscribers() {
    let mut server = MockSocketServer::start().await;
    let (channel, conn) = connected(&mut server, "tok").await;
    let mut events = channel.subscribe();

    conn.push_raw("not json");
    conn.push(json!({"event": "ride_cancelled", "data": {"ride_id": "r0"}}));
    conn.push(json!({
        "@event": "new_ride_request",
        "data": {
            "ride_id": 77,
            "estimated_fare": "18.5",
            "pickup": {"latitude": 30.1, "longitude": 31.2}
        }
    }));

    let event = tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no event")
        .unwrap();
    let InboundEvent::NewOffer(offer) = event;
    assert_eq!(offer.ride_id(), "77");
    assert_eq!(offer.fare(), 18.5);
    assert_eq!(offer.pickup_address(), "Pickup");
    let pickup = offer.pickup_location().unwrap();
    assert_eq!((pickup.lat, pickup.lng), (30.1, 31.2));
}

#[tokio::test]
async fn sends_before_connect_are_dropped() {
    let mut server = MockSocketServer::start().await;
    let channel = ReconnectingChannel::new(server.channel_config(BACKOFF));
    channel.send(&OutboundEvent::RejectRide {
        ride_id: "early".into(),
    });

    channel.connect("tok");
    let mut conn = server.next_connection().await;
    wait_for_state(&channel, ConnectionState::Connected).await;
    channel.send(&OutboundEvent::RejectRide {
        ride_id: "late".into(),
    });
    assert_eq!(conn.next_frame().await["data"]["ride_id"], "late");
}

#[tokio::test]
async fn shutdown_flushes_queued_frames_then_closes() {
    let mut server = MockSocketServer::start().await;
    let (channel, mut conn) = connected(&mut server, "tok").await;

    channel.send(&OutboundEvent::GoOffline {
        driver_id: "d1".into(),
    });
    channel.shutdown().await;
    assert_eq!(channel.state(), ConnectionState::Disconnected);

    assert_eq!(
        conn.next_frame().await,
        json!({"event": "go_offline", "data": {"driver_id": "d1"}})
    );
    conn.expect_close().await;
    server.expect_no_connection(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn heartbeat_pings_until_the_link_dies() {
    let mut server = MockSocketServer::start().await;
    let channel = ReconnectingChannel::new(
        server
            .channel_config(BACKOFF)
            .with_heartbeat(Duration::from_millis(100)),
    );
    channel.connect("tok");
    let mut conn = server.next_connection().await;
    wait_for_state(&channel, ConnectionState::Connected).await;

    conn.next_ping().await;
    conn.next_ping().await;

    drop(conn);
    let mut again = server.next_connection().await;
    wait_for_state(&channel, ConnectionState::Connected).await;
    again.next_ping().await;
}

/// Gaps between the starts of consecutive dial attempts. Transitions closer
/// together than `SAME_ATTEMPT` belong to one attempt.
async fn dial_attempt_gaps(channel: &ReconnectingChannel, attempts: usize) -> Vec<Duration> {
    const SAME_ATTEMPT: Duration = Duration::from_millis(40);

    let mut states = channel.watch_state();
    channel.connect("tok");
    let mut starts = vec![Instant::now()];
    let mut last = Instant::now();
    while starts.len() < attempts {
        tokio::time::timeout(WAIT, states.changed())
            .await
            .expect("no state change")
            .unwrap();
        let now = Instant::now();
        if now - last > SAME_ATTEMPT {
            starts.push(now);
        }
        last = now;
    }
    starts.windows(2).map(|w| w[1] - w[0]).collect()
}

fn assert_close_to(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected * 3 / 4 && actual <= expected + Duration::from_millis(150),
        "delay {actual:?} is not close to {expected:?}"
    );
}

#[tokio::test]
async fn reconnect_delays_double_up_to_cap() {
    // Nothing listens on port 9 of this host.
    let config = ChannelConfig::new("http://127.0.0.1:9", "ws")
        .unwrap()
        .with_reconnect(ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        });
    let channel = ReconnectingChannel::new(config);

    let gaps = dial_attempt_gaps(&channel, 5).await;
    channel.disconnect();

    let expected = [100, 200, 400, 400].map(Duration::from_millis);
    assert_eq!(gaps.len(), expected.len());
    for (gap, want) in gaps.into_iter().zip(expected) {
        assert_close_to(gap, want);
    }
}

#[tokio::test]
async fn backoff_restarts_after_successful_connect() {
    let mut server = MockSocketServer::start().await;
    let base = Duration::from_millis(200);
    let channel = ReconnectingChannel::new(server.channel_config(base));
    channel.connect("tok");
    let conn = server.next_connection().await;
    wait_for_state(&channel, ConnectionState::Connected).await;

    let dropped = Instant::now();
    drop(conn);
    let conn = server.next_connection().await;
    assert_close_to(dropped.elapsed(), base);
    wait_for_state(&channel, ConnectionState::Connected).await;

    // A second drop after a good connection waits the base delay again,
    // not twice it.
    let dropped = Instant::now();
    drop(conn);
    let _conn = server.next_connection().await;
    assert_close_to(dropped.elapsed(), base);
    wait_for_state(&channel, ConnectionState::Connected).await;
}
