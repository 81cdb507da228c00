//! Time-boxed accept/reject decisions for incoming ride offers.
//!
//! [`OfferStateMachine`] is pure: it never sleeps and never talks to the
//! network. Its owner calls [`OfferStateMachine::tick`] once per second and
//! carries out whatever [`OfferIntent`] comes back.

use captain_shared::RideOffer;

/// What happens when a decision window runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineAction {
    Reject,
}

/// An offer being shown to the driver together with its countdown.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferDecisionWindow {
    offer: RideOffer,
    remaining_seconds: u32,
}

impl OfferDecisionWindow {
    pub fn offer(&self) -> &RideOffer {
        &self.offer
    }

    pub fn remaining_seconds(&self) -> u32 {
        self.remaining_seconds
    }

    pub fn deadline_action(&self) -> DeadlineAction {
        DeadlineAction::Reject
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The driver declined.
    Driver,
    /// The window ran out.
    Timeout,
}

/// Outbound action decided by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferIntent {
    Accept { ride_id: String },
    Reject { ride_id: String, reason: RejectReason },
}

impl OfferIntent {
    pub fn ride_id(&self) -> &str {
        match self {
            OfferIntent::Accept { ride_id } | OfferIntent::Reject { ride_id, .. } => ride_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum OfferState {
    #[default]
    Idle,
    Presenting(OfferDecisionWindow),
}

/// Keeps at most one decision window. A newer offer replaces the current one
/// and restarts the countdown; the replaced offer produces no intent.
#[derive(Debug, Clone)]
pub struct OfferStateMachine {
    state: OfferState,
    window_secs: u32,
    serial: u64,
}

impl OfferStateMachine {
    /// `window_secs` is clamped to at least one second.
    pub fn new(window_secs: u32) -> Self {
        Self {
            state: OfferState::Idle,
            window_secs: window_secs.max(1),
            serial: 0,
        }
    }

    pub fn state(&self) -> &OfferState {
        &self.state
    }

    pub fn window(&self) -> Option<&OfferDecisionWindow> {
        match &self.state {
            OfferState::Presenting(window) => Some(window),
            OfferState::Idle => None,
        }
    }

    /// Identifies the current window; changes every time an offer is presented.
    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Show `offer` with a full countdown. Returns the offer it superseded, if any.
    pub fn present(&mut self, offer: RideOffer) -> Option<RideOffer> {
        self.serial = self.serial.wrapping_add(1);
        let previous = std::mem::replace(
            &mut self.state,
            OfferState::Presenting(OfferDecisionWindow {
                offer,
                remaining_seconds: self.window_secs,
            }),
        );
        match previous {
            OfferState::Presenting(window) => Some(window.offer),
            OfferState::Idle => None,
        }
    }

    /// Advance the countdown by one second. Reaching zero rejects the offer.
    pub fn tick(&mut self) -> Option<OfferIntent> {
        let OfferState::Presenting(window) = &mut self.state else {
            return None;
        };
        window.remaining_seconds = window.remaining_seconds.saturating_sub(1);
        if window.remaining_seconds > 0 {
            return None;
        }
        self.close().map(|offer| OfferIntent::Reject {
            ride_id: offer.ride_id().to_string(),
            reason: RejectReason::Timeout,
        })
    }

    pub fn accept(&mut self) -> Option<OfferIntent> {
        self.close().map(|offer| OfferIntent::Accept {
            ride_id: offer.ride_id().to_string(),
        })
    }

    pub fn reject(&mut self) -> Option<OfferIntent> {
        self.close().map(|offer| OfferIntent::Reject {
            ride_id: offer.ride_id().to_string(),
            reason: RejectReason::Driver,
        })
    }

    /// Return to idle without emitting anything.
    pub fn clear(&mut self) -> Option<RideOffer> {
        self.close()
    }

    fn close(&mut self) -> Option<RideOffer> {
        match std::mem::take(&mut self.state) {
            OfferState::Presenting(window) => Some(window.offer),
            OfferState::Idle => None,
        }
    }
}
