//! Integration tests for data transfer, teardown and lossy channels.
//!
//! Each test runs both endpoints as tokio tasks on loopback.  The lossy
//! test routes every datagram through the fault-injecting [`Relay`] with a
//! fixed seed, so a failure replays exactly.

use std::net::SocketAddr;
use std::time::Duration;

use reldat::connection::{Config, Connection, State};
use reldat::packet::MAX_PAYLOAD_SIZE;
use reldat::retransmit::TimerConfig;
use reldat::simulator::{FaultConfig, Relay};
use reldat::socket::Socket;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

/// Short timers so retransmission rounds finish quickly under test.
fn fast_config(max_control_retries: u32) -> Config {
    Config {
        poll_timeout: Duration::from_millis(100),
        timers: TimerConfig {
            retransmit_timeout: Duration::from_millis(100),
            max_transmissions: None,
        },
        max_control_retries,
    }
}

/// Run an uppercase-echo listener until the peer closes; returns every
/// message it received, and its final state.
async fn uppercase_listener(
    socket: Socket,
    window: u32,
    config: Config,
) -> (Vec<Vec<u8>>, State) {
    let mut conn = Connection::accept_with(socket, window, config)
        .await
        .expect("accept failed");

    let mut received = Vec::new();
    loop {
        match conn.recv().await.expect("listener recv failed") {
            Some(data) => {
                let reply = data.to_ascii_uppercase();
                received.push(data);
                conn.send(&reply).await.expect("listener reply failed");
            }
            None => break,
        }
    }
    (received, conn.state)
}

// ---------------------------------------------------------------------------
// Test 1: the canonical exchange
// ---------------------------------------------------------------------------

#[tokio::test]
async fn uppercase_exchange_roundtrip() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server = tokio::spawn(uppercase_listener(server_socket, 4, Config::default()));

    let client = tokio::spawn(async move {
        let socket = ephemeral().await;
        let mut conn = Connection::connect(socket, server_addr, 4)
            .await
            .expect("connect failed");

        conn.send(b"Hello World").await.expect("send failed");
        let reply = conn
            .recv()
            .await
            .expect("recv failed")
            .expect("peer closed early");
        assert!(conn.end_of_data_received, "EOD latch not set after recv");
        conn.close().await.expect("close failed");

        (reply, conn.state)
    });

    let (server_result, client_result) = tokio::time::timeout(
        Duration::from_secs(10),
        async { tokio::join!(server, client) },
    )
    .await
    .expect("exchange timed out");

    let (received, server_state) = server_result.unwrap();
    let (reply, client_state) = client_result.unwrap();

    assert_eq!(received, vec![b"Hello World".to_vec()]);
    assert_eq!(reply, b"HELLO WORLD");
    assert_eq!(client_state, State::Closed);
    assert_eq!(server_state, State::Closed);
}

// ---------------------------------------------------------------------------
// Test 2: payload spanning several receive windows
// ---------------------------------------------------------------------------

#[tokio::test]
async fn multi_window_transfer() {
    // Ten full packets plus a partial one, window 4: the receive window
    // slides twice on buffer-full and once on the END_OF_DATA flush.
    let payload: Vec<u8> = (0..MAX_PAYLOAD_SIZE * 10 + 100)
        .map(|i| b'a' + (i % 26) as u8)
        .collect();
    let expected_reply = payload.to_ascii_uppercase();

    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server = tokio::spawn(uppercase_listener(server_socket, 4, Config::default()));

    let sent = payload.clone();
    let client = tokio::spawn(async move {
        let socket = ephemeral().await;
        let mut conn = Connection::connect(socket, server_addr, 4)
            .await
            .expect("connect failed");

        conn.send(&sent).await.expect("send failed");
        let reply = conn
            .recv()
            .await
            .expect("recv failed")
            .expect("peer closed early");
        conn.close().await.expect("close failed");
        reply
    });

    let (server_result, client_result) = tokio::time::timeout(
        Duration::from_secs(30),
        async { tokio::join!(server, client) },
    )
    .await
    .expect("transfer timed out");

    let (received, server_state) = server_result.unwrap();
    let reply = client_result.unwrap();

    assert_eq!(received.len(), 1);
    assert_eq!(received[0], payload, "listener reassembled wrong bytes");
    assert_eq!(reply, expected_reply, "connector reassembled wrong bytes");
    assert_eq!(server_state, State::Closed);
}

// ---------------------------------------------------------------------------
// Test 3: an empty message is just the END_OF_DATA marker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_message_roundtrip() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server = tokio::spawn(uppercase_listener(server_socket, 4, Config::default()));

    let client = tokio::spawn(async move {
        let socket = ephemeral().await;
        let mut conn = Connection::connect(socket, server_addr, 4)
            .await
            .expect("connect failed");

        conn.send(b"").await.expect("send failed");
        let reply = conn
            .recv()
            .await
            .expect("recv failed")
            .expect("peer closed early");
        conn.close().await.expect("close failed");
        reply
    });

    let (server_result, client_result) = tokio::time::timeout(
        Duration::from_secs(10),
        async { tokio::join!(server, client) },
    )
    .await
    .expect("exchange timed out");

    let (received, _) = server_result.unwrap();
    assert_eq!(received, vec![Vec::<u8>::new()]);
    assert_eq!(client_result.unwrap(), Vec::<u8>::new());
}

// ---------------------------------------------------------------------------
// Test 4: closing twice is harmless
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_is_idempotent() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server = tokio::spawn(uppercase_listener(server_socket, 4, Config::default()));

    let client = tokio::spawn(async move {
        let socket = ephemeral().await;
        let mut conn = Connection::connect(socket, server_addr, 4)
            .await
            .expect("connect failed");

        conn.send(b"bye").await.expect("send failed");
        conn.recv().await.expect("recv failed");

        conn.close().await.expect("first close failed");
        assert_eq!(conn.state, State::Closed);
        conn.close().await.expect("second close must be a no-op");
        assert_eq!(conn.state, State::Closed);
    });

    tokio::time::timeout(Duration::from_secs(10), async {
        let (s, c) = tokio::join!(server, client);
        s.unwrap();
        c.unwrap();
    })
    .await
    .expect("teardown timed out");
}

// ---------------------------------------------------------------------------
// Test 5: reliable delivery over a 10 %-loss channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lossy_channel_delivers_exactly() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    // Every datagram in both directions crosses the relay, which drops
    // 10 % of them.  The seed pins the loss pattern.
    let relay = Relay::bind(
        "127.0.0.1:0".parse().unwrap(),
        server_addr,
        FaultConfig {
            loss_rate: 0.1,
            duplicate_rate: 0.05,
            seed: 7,
        },
    )
    .await
    .expect("relay bind failed");
    let relay_addr = relay.local_addr;
    let relay_task = tokio::spawn(relay.run());

    let server = tokio::spawn(uppercase_listener(
        server_socket,
        4,
        fast_config(16),
    ));

    let client = tokio::spawn(async move {
        let socket = ephemeral().await;
        let mut conn = Connection::connect_with(socket, relay_addr, 4, fast_config(16))
            .await
            .expect("connect through relay failed");

        conn.send(b"HELLO WORLD").await.expect("send failed");
        let reply = conn
            .recv()
            .await
            .expect("recv failed")
            .expect("peer closed early");
        conn.close().await.expect("close failed");
        (reply, conn.state)
    });

    let (server_result, client_result) = tokio::time::timeout(
        Duration::from_secs(30),
        async { tokio::join!(server, client) },
    )
    .await
    .expect("lossy exchange did not finish in a bounded number of rounds");

    relay_task.abort();

    let (received, server_state) = server_result.unwrap();
    let (reply, client_state) = client_result.unwrap();

    assert_eq!(received, vec![b"HELLO WORLD".to_vec()]);
    assert_eq!(reply, b"HELLO WORLD");
    assert_eq!(client_state, State::Closed);
    assert_eq!(server_state, State::Closed);
}
