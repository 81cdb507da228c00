//! In-process stand-ins for the backend.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use captain_client::{ChannelConfig, ConnectionState, ReconnectPolicy, ReconnectingChannel};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);

/// A socket server that hands each accepted connection to the test.
pub struct MockSocketServer {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    connections: mpsc::UnboundedReceiver<MockConnection>,
}

/// Server side of one client connection. Dropping it cuts the socket
/// without a close handshake.
pub struct MockConnection {
    pub uri: String,
    incoming: mpsc::UnboundedReceiver<Message>,
    outgoing: mpsc::UnboundedSender<Message>,
}

impl MockSocketServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let (conn_tx, connections) = mpsc::unbounded_channel();

        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let conn_tx = conn_tx.clone();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let (uri_tx, uri_rx) = oneshot::channel();
                    let callback =
                        move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                            let _ = uri_tx.send(req.uri().to_string());
                            Ok(resp)
                        };
                    let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                    else {
                        return;
                    };
                    counter.fetch_add(1, Ordering::SeqCst);

                    let uri = uri_rx.await.unwrap_or_default();
                    let (in_tx, incoming) = mpsc::unbounded_channel();
                    let (outgoing, mut out_rx) = mpsc::unbounded_channel::<Message>();
                    if conn_tx
                        .send(MockConnection {
                            uri,
                            incoming,
                            outgoing,
                        })
                        .is_err()
                    {
                        return;
                    }

                    let (mut sink, mut stream) = ws.split();
                    loop {
                        tokio::select! {
                            frame = stream.next() => match frame {
                                Some(Ok(message)) => {
                                    let _ = in_tx.send(message);
                                }
                                _ => break,
                            },
                            out = out_rx.recv() => match out {
                                Some(message) => {
                                    if sink.send(message).await.is_err() {
                                        break;
                                    }
                                }
                                None => break,
                            },
                        }
                    }
                });
            }
        });

        Self {
            addr,
            accepted,
            connections,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Channel config pointed at this server with test-friendly timings.
    pub fn channel_config(&self, base_delay: Duration) -> ChannelConfig {
        ChannelConfig::new(&self.base_url(), "ws")
            .unwrap()
            .with_heartbeat(Duration::from_secs(60))
            .with_reconnect(ReconnectPolicy {
                base_delay,
                max_delay: base_delay * 8,
            })
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub async fn next_connection(&mut self) -> MockConnection {
        tokio::time::timeout(WAIT, self.connections.recv())
            .await
            .expect("no connection arrived")
            .expect("server stopped")
    }

    pub async fn expect_no_connection(&mut self, within: Duration) {
        let next = tokio::time::timeout(within, self.connections.recv()).await;
        assert!(next.is_err(), "unexpected connection");
    }
}

impl MockConnection {
    pub fn push(&self, frame: Value) {
        self.outgoing
            .send(Message::Text(frame.to_string().into()))
            .expect("connection closed");
    }

    pub fn push_raw(&self, frame: &str) {
        self.outgoing
            .send(Message::Text(frame.to_string().into()))
            .expect("connection closed");
    }

    /// Next message of any kind, including pings and close frames.
    pub async fn next_message(&mut self) -> Option<Message> {
        tokio::time::timeout(WAIT, self.incoming.recv())
            .await
            .expect("no message arrived")
    }

    /// Next text frame, parsed. Control frames are skipped.
    pub async fn next_frame(&mut self) -> Value {
        loop {
            match self.next_message().await {
                Some(Message::Text(text)) => {
                    return serde_json::from_str(text.as_str()).expect("frame is not JSON")
                }
                Some(_) => continue,
                None => panic!("connection closed"),
            }
        }
    }

    /// Wait for a ping from the client. Text frames before it are a failure.
    pub async fn next_ping(&mut self) {
        loop {
            match self.next_message().await {
                Some(Message::Ping(_)) => return,
                Some(Message::Pong(_)) => continue,
                other => panic!("expected ping, got {other:?}"),
            }
        }
    }

    /// Wait for the client's close frame, skipping control traffic.
    pub async fn expect_close(&mut self) {
        loop {
            match self.next_message().await {
                Some(Message::Close(_)) => return,
                Some(Message::Ping(_) | Message::Pong(_)) => continue,
                other => panic!("expected close, got {other:?}"),
            }
        }
    }

    pub async fn expect_no_frame(&mut self, within: Duration) {
        let deadline = tokio::time::Instant::now() + within;
        loop {
            match tokio::time::timeout_at(deadline, self.incoming.recv()).await {
                Err(_) | Ok(None) => return,
                Ok(Some(Message::Text(text))) => panic!("unexpected frame: {text}"),
                Ok(Some(_)) => continue,
            }
        }
    }
}

pub async fn wait_for_state(channel: &ReconnectingChannel, wanted: ConnectionState) {
    let mut states = channel.watch_state();
    tokio::time::timeout(WAIT, states.wait_for(|s| *s == wanted))
        .await
        .expect("state not reached in time")
        .expect("channel dropped");
}

/// Serve `router` on an ephemeral port and return its base URL.
pub async fn serve_http(router: axum::Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
