//! The driver session: the one object the UI layer talks to.
//!
//! UI code reads [`DriverSessionState`] through [`DriverSession::subscribe`]
//! and sends intents (go online, accept, reject) through the methods on
//! [`DriverSession`]. Transport problems never reach the UI; they are
//! recovered or dropped here with a diagnostic.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use captain_shared::{Coordinate, InboundEvent, OutboundEvent, RideOffer};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::api_client::ApiClient;
use crate::auth_session::AuthSession;
use crate::offer::{OfferIntent, OfferStateMachine};
use crate::ws::{ConnectionState, ReconnectingChannel};

const TICK: Duration = Duration::from_secs(1);

/// Everything the UI renders from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverSessionState {
    pub is_online: bool,
    pub current_position: Option<Coordinate>,
    pub pending_offer: Option<RideOffer>,
    /// Seconds left to decide on `pending_offer`.
    pub decision_seconds_remaining: Option<u32>,
    /// Mirror of the bound channel's state.
    pub connection: ConnectionState,
}

/// Handle to a driver session. Clones share the same session.
#[derive(Clone)]
pub struct DriverSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    auth: AuthSession,
    api: ApiClient,
    state_tx: watch::Sender<DriverSessionState>,
    offers: Mutex<Offers>,
    binding: Mutex<Option<Binding>>,
}

struct Offers {
    machine: OfferStateMachine,
    countdown: Option<JoinHandle<()>>,
}

struct Binding {
    channel: ReconnectingChannel,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Binding {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DriverSession {
    pub fn new(auth: AuthSession, api: ApiClient, decision_window_secs: u32) -> Self {
        let (state_tx, _) = watch::channel(DriverSessionState::default());
        Self {
            inner: Arc::new(SessionInner {
                auth,
                api,
                state_tx,
                offers: Mutex::new(Offers {
                    machine: OfferStateMachine::new(decision_window_secs),
                    countdown: None,
                }),
                binding: Mutex::new(None),
            }),
        }
    }

    pub fn auth(&self) -> &AuthSession {
        &self.inner.auth
    }

    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Latest state snapshot.
    pub fn state(&self) -> DriverSessionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Observe state changes. Every mutation is published in order.
    pub fn subscribe(&self) -> watch::Receiver<DriverSessionState> {
        self.inner.state_tx.subscribe()
    }

    /// The channel this session sends through, if bound.
    pub fn channel(&self) -> Option<ReconnectingChannel> {
        lock(&self.inner.binding)
            .as_ref()
            .map(|binding| binding.channel.clone())
    }

    /// Attach the session to `channel`. Binding the channel that is already
    /// bound keeps the existing subscriptions.
    pub fn bind(&self, channel: &ReconnectingChannel) {
        let mut binding = lock(&self.inner.binding);
        if let Some(current) = binding.as_mut() {
            if current.channel.same_channel(channel) {
                current.channel = channel.clone();
                tracing::debug!("session already bound to this channel");
                return;
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let tasks = vec![
            tokio::spawn(forward_events(weak.clone(), channel.subscribe())),
            tokio::spawn(mirror_connection(weak, channel.watch_state())),
        ];
        *binding = Some(Binding {
            channel: channel.clone(),
            tasks,
        });
        tracing::debug!("session bound to channel");
    }

    /// Connect the bound channel with the current auth token.
    pub fn connect(&self) {
        let Some(channel) = self.channel() else {
            tracing::warn!("connect requested with no channel bound");
            return;
        };
        match self.inner.auth.token() {
            Some(token) => channel.connect_if_needed(&token),
            None => tracing::warn!("connect requested without an auth token"),
        }
    }

    // --- Availability ---

    pub fn go_online(&self) {
        self.set_online(true);
    }

    pub fn go_offline(&self) {
        self.set_online(false);
    }

    /// Flip availability. Returns the new value.
    pub fn toggle_online(&self) -> bool {
        let mut online = false;
        self.inner.state_tx.send_modify(|state| {
            state.is_online = !state.is_online;
            online = state.is_online;
        });
        self.announce_availability(online);
        online
    }

    /// Set availability locally at once, then tell the backend if the driver
    /// id is known.
    pub fn set_online(&self, online: bool) {
        self.inner
            .state_tx
            .send_modify(|state| state.is_online = online);
        self.announce_availability(online);
    }

    fn announce_availability(&self, online: bool) {
        tracing::info!(online, "driver availability changed");
        let Some(driver_id) = self.inner.auth.driver_id() else {
            tracing::warn!(online, "driver id unknown; backend not informed");
            return;
        };
        let event = if online {
            OutboundEvent::GoOnline { driver_id }
        } else {
            OutboundEvent::GoOffline { driver_id }
        };
        self.send(&event);
    }

    // --- Position ---

    /// Record the driver's position and report it while online.
    pub async fn update_position(&self, position: Coordinate) {
        let mut online = false;
        self.inner.state_tx.send_modify(|state| {
            state.current_position = Some(position);
            online = state.is_online;
        });
        if !online {
            return;
        }
        let Some(token) = self.inner.auth.token() else {
            tracing::debug!("no auth token; position not reported");
            return;
        };
        let api = self.inner.api.with_token(Some(&token));
        if let Err(e) = api.update_location(position).await {
            tracing::warn!(error = %e, "failed to report position");
        }
    }

    // --- Offers ---

    /// Accept a ride over HTTP, falling back to the socket when HTTP fails.
    pub async fn accept_offer(&self, ride_id: &str, auth_token: Option<&str>) {
        let api = self.inner.api.with_token(auth_token);
        match api.accept_ride(ride_id).await {
            Ok(()) => tracing::info!(ride_id, "ride accepted"),
            Err(e) => {
                tracing::warn!(ride_id, error = %e, "accept over HTTP failed; using socket");
                self.send(&OutboundEvent::AcceptRide {
                    ride_id: ride_id.to_string(),
                });
            }
        }
    }

    /// Reject a ride over the socket.
    pub fn reject_offer(&self, ride_id: &str) {
        tracing::info!(ride_id, "rejecting ride");
        self.send(&OutboundEvent::RejectRide {
            ride_id: ride_id.to_string(),
        });
    }

    /// Accept whatever offer is on screen. No-op without one.
    pub async fn accept_pending(&self) {
        let intent = self.transition(OfferStateMachine::accept);
        if let Some(intent) = intent {
            self.perform(intent).await;
        }
    }

    /// Reject whatever offer is on screen. No-op without one.
    pub fn reject_pending(&self) {
        if let Some(intent) = self.transition(OfferStateMachine::reject) {
            self.reject_offer(intent.ride_id());
        }
    }

    async fn perform(&self, intent: OfferIntent) {
        match intent {
            OfferIntent::Accept { ride_id } => {
                let token = self.inner.auth.token();
                self.accept_offer(&ride_id, token.as_deref()).await;
            }
            OfferIntent::Reject { ride_id, reason } => {
                tracing::debug!(ride_id, ?reason, "offer rejected");
                self.reject_offer(&ride_id);
            }
        }
    }

    /// Put `offer` on screen, replacing any current one.
    pub(crate) fn present_offer(&self, offer: RideOffer) {
        let mut offers = lock(&self.inner.offers);
        tracing::info!(ride_id = offer.ride_id(), fare = offer.fare(), "new ride offer");
        if let Some(previous) = offers.machine.present(offer) {
            tracing::info!(ride_id = previous.ride_id(), "pending offer superseded");
        }
        if let Some(countdown) = offers.countdown.take() {
            countdown.abort();
        }
        let serial = offers.machine.serial();
        offers.countdown = Some(tokio::spawn(run_countdown(
            Arc::downgrade(&self.inner),
            serial,
        )));
        self.publish_offer(&offers.machine);
    }

    /// Apply `f` to the offer machine and publish the result. Stops the
    /// countdown if the machine went idle.
    fn transition<R>(&self, f: impl FnOnce(&mut OfferStateMachine) -> R) -> R {
        let mut offers = lock(&self.inner.offers);
        let result = f(&mut offers.machine);
        if offers.machine.window().is_none() {
            if let Some(countdown) = offers.countdown.take() {
                countdown.abort();
            }
        }
        self.publish_offer(&offers.machine);
        result
    }

    /// Caller must hold the offers lock so publications follow transition order.
    fn publish_offer(&self, machine: &OfferStateMachine) {
        let window = machine.window();
        let pending = window.map(|w| w.offer().clone());
        let remaining = window.map(|w| w.remaining_seconds());
        self.inner.state_tx.send_if_modified(|state| {
            if state.pending_offer == pending && state.decision_seconds_remaining == remaining {
                return false;
            }
            state.pending_offer = pending;
            state.decision_seconds_remaining = remaining;
            true
        });
    }

    // --- Lifecycle ---

    /// Forget the driver, drop any pending offer, and close the channel.
    pub fn logout(&self) {
        self.transition(OfferStateMachine::clear);
        self.inner
            .state_tx
            .send_modify(|state| state.is_online = false);
        if let Some(channel) = self.channel() {
            channel.disconnect();
        }
        self.inner.auth.logout();
        tracing::info!("driver logged out");
    }

    fn send(&self, event: &OutboundEvent) {
        match self.channel() {
            Some(channel) => channel.send(event),
            None => tracing::warn!(event = event.name(), "no channel bound; dropping event"),
        }
    }
}

async fn forward_events(
    weak: Weak<SessionInner>,
    mut events: tokio::sync::broadcast::Receiver<InboundEvent>,
) {
    loop {
        match events.recv().await {
            Ok(InboundEvent::NewOffer(offer)) => {
                let Some(inner) = weak.upgrade() else { return };
                DriverSession { inner }.present_offer(offer);
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "session fell behind channel events");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn mirror_connection(
    weak: Weak<SessionInner>,
    mut states: watch::Receiver<ConnectionState>,
) {
    loop {
        let current = *states.borrow_and_update();
        {
            let Some(inner) = weak.upgrade() else { return };
            inner.state_tx.send_if_modified(|state| {
                let changed = state.connection != current;
                state.connection = current;
                changed
            });
        }
        if states.changed().await.is_err() {
            return;
        }
    }
}

async fn run_countdown(weak: Weak<SessionInner>, serial: u64) {
    let mut ticker = tokio::time::interval_at(Instant::now() + TICK, TICK);
    loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else { return };
        let session = DriverSession { inner };

        let intent = {
            let mut offers = lock(&session.inner.offers);
            if offers.machine.serial() != serial {
                return;
            }
            let intent = offers.machine.tick();
            if intent.is_some() {
                // Finishing on our own; keep the handle from aborting us.
                offers.countdown = None;
            }
            session.publish_offer(&offers.machine);
            intent
        };

        if let Some(intent) = intent {
            tracing::info!(ride_id = intent.ride_id(), "decision window expired");
            session.perform(intent).await;
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth_session::DriverIdentity;

    fn session(identity: DriverIdentity) -> DriverSession {
        let api = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        DriverSession::new(AuthSession::with_identity(identity), api, 30)
    }

    fn offer(ride_id: &str) -> RideOffer {
        RideOffer::builder(ride_id).unwrap().build()
    }

    #[tokio::test]
    async fn toggle_without_driver_id_still_updates_state() {
        let session = session(DriverIdentity::default());
        assert!(session.toggle_online());
        assert!(session.state().is_online);
        assert!(!session.toggle_online());
        assert!(!session.state().is_online);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_expires_offer() {
        let session = session(DriverIdentity::new("d1", "tok"));
        let mut rx = session.subscribe();

        session.present_offer(offer("r1"));
        let state = rx.borrow_and_update().clone();
        assert_eq!(state.pending_offer.as_ref().map(RideOffer::ride_id), Some("r1"));
        assert_eq!(state.decision_seconds_remaining, Some(30));

        tokio::time::sleep(Duration::from_millis(10_500)).await;
        assert_eq!(session.state().decision_seconds_remaining, Some(20));

        tokio::time::sleep(Duration::from_secs(20)).await;
        let state = session.state();
        assert_eq!(state.pending_offer, None);
        assert_eq!(state.decision_seconds_remaining, None);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_offer_restarts_countdown() {
        let session = session(DriverIdentity::new("d1", "tok"));

        session.present_offer(offer("a"));
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(session.state().decision_seconds_remaining, Some(25));

        session.present_offer(offer("b"));
        let state = session.state();
        assert_eq!(state.pending_offer.as_ref().map(RideOffer::ride_id), Some("b"));
        assert_eq!(state.decision_seconds_remaining, Some(30));

        // The first countdown must not keep ticking against the new window.
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(session.state().decision_seconds_remaining, Some(27));
    }

    #[tokio::test(start_paused = true)]
    async fn reject_pending_clears_offer_and_stops_countdown() {
        let session = session(DriverIdentity::new("d1", "tok"));
        session.present_offer(offer("a"));
        session.reject_pending();
        assert_eq!(session.state().pending_offer, None);

        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(session.state().pending_offer, None);
        assert_eq!(session.state().decision_seconds_remaining, None);
    }

    #[tokio::test]
    async fn decisions_without_offer_are_noops() {
        let session = session(DriverIdentity::new("d1", "tok"));
        let before = session.state();
        session.reject_pending();
        session.accept_pending().await;
        assert_eq!(session.state(), before);
    }

    #[tokio::test]
    async fn logout_resets_state_and_identity() {
        let session = session(DriverIdentity::new("d1", "tok"));
        session.go_online();
        session.present_offer(offer("a"));
        session.logout();

        let state = session.state();
        assert!(!state.is_online);
        assert_eq!(state.pending_offer, None);
        assert!(!session.auth().is_authenticated());
    }
}
