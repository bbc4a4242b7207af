//! Core WebSocket infrastructure.
//!
//! # Architecture
//!
//! - [`frame`]: `m:`/`c:` prefixed JSON envelopes for the data and control channels
//! - [`Broadcast`]: Fan-out of incoming messages and connection events to listeners
//! - [`ConnectionManager`]: Self-healing connection that owns one socket at a time
//! - [`retry`]: Repeat a control request until the server acknowledges it
//!
//! The protocol extensions built on top of the manager live in
//! [`crate::protocol`].

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod retry;

pub use broadcast::{Broadcast, Listener};
pub use connection::{ConnectionManager, ConnectionState};
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use frame::{Channel, Envelope};
