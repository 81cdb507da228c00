//! Realtime wire protocol between the captain client and the backend.
//!
//! Every frame is one JSON object of the shape `{"event": ..., "data": {...}}`.

use serde::{Deserialize, Serialize};

use crate::models::RideOffer;

/// Event name the backend uses to push a ride offer.
pub const NEW_RIDE_REQUEST: &str = "new_ride_request";

/// Keys under which an inbound frame may carry its event name, in lookup order.
pub const EVENT_NAME_KEYS: [&str; 2] = ["event", "@event"];

/// Key holding the event payload object.
pub const EVENT_DATA_KEY: &str = "data";

/// Frames the client sends over the socket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundEvent {
    GoOnline { driver_id: String },
    GoOffline { driver_id: String },
    AcceptRide { ride_id: String },
    RejectRide { ride_id: String },
}

impl OutboundEvent {
    /// Wire name of the event, for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::GoOnline { .. } => "go_online",
            OutboundEvent::GoOffline { .. } => "go_offline",
            OutboundEvent::AcceptRide { .. } => "accept_ride",
            OutboundEvent::RejectRide { .. } => "reject_ride",
        }
    }
}

/// Normalized domain events decoded from inbound frames.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    NewOffer(RideOffer),
}
