//! Shared types for the captain driver client: ride and driver models, the
//! realtime wire protocol, and API errors.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
