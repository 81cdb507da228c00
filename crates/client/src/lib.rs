//! Captain Client - realtime core of the ride-hailing driver app
//!
//! This crate keeps a durable socket to the backend, turns pushed ride
//! requests into time-boxed offers, and exposes a single session object
//! ([`DriverSession`]) for UI code to observe and drive.

pub mod api_client;
pub mod auth_session;
pub mod config;
pub mod logging;
pub mod offer;
pub mod session;
pub mod storage;
pub mod ws;

pub use api_client::ApiClient;
pub use auth_session::{AuthSession, DriverIdentity};
pub use config::{ChannelConfig, ClientConfig, ConfigError, ReconnectPolicy};
pub use offer::{OfferDecisionWindow, OfferIntent, OfferState, OfferStateMachine};
pub use session::{DriverSession, DriverSessionState};
pub use storage::Storage;
pub use ws::{ConnectionState, ReconnectingChannel};
