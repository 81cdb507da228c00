//! Realtime channel to the ride-hailing backend.
//!
//! This module provides:
//! - [`ReconnectingChannel`]: one durable socket with heartbeat and
//!   exponential-backoff reconnect
//! - [`normalize`]: decoding of inbound frames into [`InboundEvent`]s
//!
//! # Architecture
//!
//! ```text
//!   backend frame
//!        │
//!        ▼
//! ┌─────────────────────┐   ConnectionState (watch)
//! │ ReconnectingChannel ├──────────────────────────►
//! └─────────┬───────────┘
//!           │ text frame
//!           ▼
//! ┌─────────────────────┐   InboundEvent (broadcast)
//! │     normalize()     ├──────────────────────────► DriverSession
//! └─────────────────────┘
//! ```
//!
//! [`InboundEvent`]: captain_shared::InboundEvent

mod connection;
mod normalizer;

pub use connection::{ConnectionState, ReconnectingChannel};
pub use normalizer::normalize;
