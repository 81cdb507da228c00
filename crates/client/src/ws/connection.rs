//! The reconnecting realtime channel.
//!
//! One [`ReconnectingChannel`] owns at most one live socket. Three kinds of
//! background task act on it: the reader, the heartbeat and the reconnect
//! timer. Each is stamped with the connection generation it was started for,
//! and any effect it has on shared state is discarded once that generation
//! has been replaced.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use captain_shared::{InboundEvent, OutboundEvent};
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::normalizer::normalize;
use crate::config::ChannelConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedSink = Arc<tokio::sync::Mutex<SplitSink<WsStream, Message>>>;

const EVENT_CAPACITY: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection state for the channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// A durable connection to the backend that reconnects with exponential
/// backoff until it is explicitly disconnected.
///
/// Clones are handles to the same channel. Methods that open connections
/// spawn onto the ambient Tokio runtime and must be called from within one.
#[derive(Clone)]
pub struct ReconnectingChannel {
    inner: Arc<Inner>,
}

struct Inner {
    config: ChannelConfig,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<InboundEvent>,
    control: Mutex<Control>,
}

#[derive(Default)]
struct Control {
    token: Option<String>,
    manually_disconnected: bool,
    attempt: u32,
    generation: u64,
    link: Option<Link>,
    dialing: Option<JoinHandle<()>>,
}

/// The live half of a connection. Dropping it stops the reader and heartbeat
/// and lets the writer flush what is queued and close the socket.
struct Link {
    outbound: UnboundedSender<Message>,
    tasks: Vec<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ReconnectingChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectingChannel")
            .field("endpoint", &self.inner.config.endpoint())
            .field("state", &self.state())
            .finish()
    }
}

impl ReconnectingChannel {
    pub fn new(config: ChannelConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                state_tx,
                events_tx,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    /// Open a connection authenticated by `token`, replacing any existing one.
    ///
    /// Blank tokens are refused with a diagnostic and leave the channel untouched.
    pub fn connect(&self, token: &str) {
        let token = token.trim();
        if token.is_empty() {
            tracing::warn!("refusing to connect without an auth token");
            return;
        }
        let mut ctl = self.inner.lock();
        ctl.manually_disconnected = false;
        ctl.token = Some(token.to_string());
        self.inner.open(&mut ctl);
    }

    /// Connect unless a connection is already up or being established.
    pub fn connect_if_needed(&self, token: &str) {
        match self.state() {
            ConnectionState::Connected | ConnectionState::Connecting => {
                tracing::debug!("channel already connected; nothing to do");
            }
            ConnectionState::Disconnected => self.connect(token),
        }
    }

    /// Close the connection and suppress reconnects until the next [`connect`].
    ///
    /// [`connect`]: ReconnectingChannel::connect
    pub fn disconnect(&self) {
        let mut ctl = self.inner.lock();
        ctl.manually_disconnected = true;
        ctl.token = None;
        ctl.attempt = 0;
        Inner::teardown(&mut ctl);
        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!("channel disconnected");
    }

    /// Like [`disconnect`], but waits for frames already handed to [`send`]
    /// to be written and the close handshake to start, up to a bounded time.
    ///
    /// [`disconnect`]: ReconnectingChannel::disconnect
    /// [`send`]: ReconnectingChannel::send
    pub async fn shutdown(&self) {
        let writer = self
            .inner
            .lock()
            .link
            .as_mut()
            .and_then(|link| link.writer.take());
        self.disconnect();

        let Some(writer) = writer else { return };
        match tokio::time::timeout(CLOSE_TIMEOUT, writer).await {
            Ok(Ok(())) => tracing::debug!("channel writer drained"),
            Ok(Err(e)) => tracing::debug!(error = %e, "channel writer ended abnormally"),
            Err(_) => tracing::warn!(timeout = ?CLOSE_TIMEOUT, "channel writer did not drain in time"),
        }
    }

    /// Fire-and-forget send of one event. Dropped with a diagnostic when not connected.
    pub fn send(&self, event: &OutboundEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(event = event.name(), error = %e, "failed to serialize event");
                return;
            }
        };

        let ctl = self.inner.lock();
        let link = match (&ctl.link, self.state()) {
            (Some(link), ConnectionState::Connected) => link,
            _ => {
                tracing::warn!(event = event.name(), "dropping send: channel not connected");
                return;
            }
        };
        match link.outbound.unbounded_send(Message::Text(json.into())) {
            Ok(()) => tracing::debug!(event = event.name(), "event queued"),
            Err(_) => tracing::warn!(event = event.name(), "dropping send: writer closed"),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Observe connection state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Receive normalized inbound events.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Whether both handles refer to the same underlying channel.
    pub fn same_channel(&self, other: &ReconnectingChannel) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, ?state, "connection state changed");
        }
    }

    /// Invalidate the current connection and every task tied to it.
    fn teardown(ctl: &mut Control) {
        ctl.generation = ctl.generation.wrapping_add(1);
        ctl.link = None;
        if let Some(dialing) = ctl.dialing.take() {
            dialing.abort();
        }
    }

    fn open(self: &Arc<Self>, ctl: &mut Control) {
        let Some(token) = ctl.token.clone() else {
            tracing::debug!("no token; not opening connection");
            return;
        };
        Self::teardown(ctl);
        self.set_state(ConnectionState::Connecting);

        let generation = ctl.generation;
        let url = self.config.socket_url(&token);
        tracing::info!(endpoint = self.config.endpoint(), generation, "opening channel");
        ctl.dialing = Some(tokio::spawn(Arc::clone(self).dial(url, generation)));
    }

    async fn dial(self: Arc<Self>, url: String, generation: u64) {
        let stream = match tokio::time::timeout(self.config.connect_timeout, connect_async(url.as_str())).await {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "channel connect failed");
                self.on_transport_failure(generation);
                return;
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.config.connect_timeout, "channel connect timed out");
                self.on_transport_failure(generation);
                return;
            }
        };

        let mut ctl = self.lock();
        if ctl.generation != generation || ctl.manually_disconnected {
            tracing::debug!(generation, "discarding superseded connection");
            return;
        }

        let (sink, read) = stream.split();
        let sink: SharedSink = Arc::new(tokio::sync::Mutex::new(sink));
        let (outbound, outbound_rx) = unbounded();
        let weak = Arc::downgrade(&self);

        let tasks = vec![
            tokio::spawn(read_loop(
                weak.clone(),
                self.events_tx.clone(),
                read,
                generation,
            )),
            tokio::spawn(heartbeat(
                weak.clone(),
                Arc::clone(&sink),
                self.config.heartbeat_interval,
                generation,
            )),
        ];
        let writer = tokio::spawn(write_loop(weak, sink, outbound_rx, generation));

        ctl.link = Some(Link {
            outbound,
            tasks,
            writer: Some(writer),
        });
        ctl.dialing = None;
        ctl.attempt = 0;
        self.set_state(ConnectionState::Connected);
        tracing::info!(generation, "channel connected");
    }

    /// Receive, send, ping and connect failures all end up here.
    fn on_transport_failure(self: &Arc<Self>, generation: u64) {
        let mut ctl = self.lock();
        if ctl.generation != generation {
            return;
        }
        Self::teardown(&mut ctl);
        self.set_state(ConnectionState::Disconnected);
        self.schedule_reconnect(&mut ctl);
    }

    fn schedule_reconnect(self: &Arc<Self>, ctl: &mut Control) {
        if ctl.manually_disconnected {
            tracing::debug!("manually disconnected; not reconnecting");
            return;
        }
        if ctl.token.is_none() {
            tracing::debug!("no token; not reconnecting");
            return;
        }

        let delay = self.config.reconnect.delay_for_attempt(ctl.attempt);
        ctl.attempt = ctl.attempt.saturating_add(1);
        let generation = ctl.generation;
        tracing::info!(
            attempt = ctl.attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.fire_reconnect(generation);
            }
        });
    }

    /// The manual-disconnect flag may have flipped while the timer slept, so
    /// everything is re-checked here rather than trusted from scheduling time.
    fn fire_reconnect(self: &Arc<Self>, generation: u64) {
        let mut ctl = self.lock();
        if ctl.manually_disconnected {
            tracing::debug!("reconnect cancelled by manual disconnect");
            return;
        }
        if ctl.generation != generation {
            tracing::debug!("reconnect superseded by a newer connection");
            return;
        }
        let state = *self.state_tx.borrow();
        if state != ConnectionState::Disconnected {
            tracing::debug!(?state, "reconnect skipped");
            return;
        }
        self.open(&mut ctl);
    }
}

fn report_failure(weak: &Weak<Inner>, generation: u64) {
    if let Some(inner) = weak.upgrade() {
        inner.on_transport_failure(generation);
    }
}

async fn read_loop(
    weak: Weak<Inner>,
    events: broadcast::Sender<InboundEvent>,
    mut read: SplitStream<WsStream>,
    generation: u64,
) {
    while let Some(frame) = read.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Some(event) = normalize(text.as_str()) {
                    if events.send(event).is_err() {
                        tracing::debug!("no subscribers for inbound event");
                    }
                }
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "server closed channel");
                break;
            }
            Ok(Message::Binary(_)) => tracing::debug!("ignoring binary frame"),
            // Pong is handled automatically by tungstenite
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "channel receive failed");
                break;
            }
        }
    }
    report_failure(&weak, generation);
}

async fn write_loop(
    weak: Weak<Inner>,
    sink: SharedSink,
    mut outbound: UnboundedReceiver<Message>,
    generation: u64,
) {
    while let Some(message) = outbound.next().await {
        let result = sink.lock().await.send(message).await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "channel send failed");
            report_failure(&weak, generation);
            return;
        }
    }

    // Link dropped: say goodbye, but don't wait on a dead peer.
    let closed = tokio::time::timeout(CLOSE_TIMEOUT, async {
        sink.lock().await.close().await
    })
    .await;
    if let Ok(Err(e)) = closed {
        tracing::debug!(error = %e, "error closing channel");
    }
}

async fn heartbeat<S>(
    weak: Weak<Inner>,
    sink: Arc<tokio::sync::Mutex<S>>,
    period: Duration,
    generation: u64,
) where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    if period.is_zero() {
        return;
    }
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let result = sink.lock().await.send(Message::Ping(Default::default())).await;
        if let Err(e) = result {
            tracing::warn!(error = %e, "heartbeat ping failed");
            report_failure(&weak, generation);
            return;
        }
        tracing::trace!("heartbeat ping sent");
    }
}
