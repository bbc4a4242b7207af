//! Application protocol layered on top of the [`ConnectionManager`].
//!
//! Each extension runs as a background task that listens on the manager's
//! broadcasts and only holds a weak reference to the manager, so the tasks end
//! once the last manager handle is dropped:
//!
//! - [`keepalive`]: restart a connection that went silent
//! - [`ping_pong`]: answer control `ping` with `pong`
//! - [`token`]: expect a `client-token` shortly after every open
//! - [`transfer`]: migrate the previous session to the new token
//!
//! [`ConnectionManager`]: crate::ws::ConnectionManager

pub mod keepalive;
pub mod ping_pong;
pub mod token;
pub mod transfer;

use crate::ws::ConnectionManager;

/// Control message sent by the server to probe the client.
pub const PING: &str = "ping";
/// Answer to [`PING`], echoing its payload.
pub const PONG: &str = "pong";
/// Control message carrying a freshly issued session token.
pub const CLIENT_TOKEN: &str = "client-token";
/// Control message migrating the session of a previous token; echoed by the
/// server as acknowledgement.
pub const CLIENT_CHANGE: &str = "client-change";
/// Control message stopping the live feeds of a transaction; echoed by the
/// server as acknowledgement.
pub const UNSUBSCRIBE: &str = "unsubscribe";

/// Attach every protocol extension to `connection`.
///
/// Listeners are registered before this returns, so nothing the first socket
/// receives is missed.
pub(crate) fn attach(connection: &ConnectionManager) {
    keepalive::attach(connection);
    ping_pong::attach(connection);
    token::attach(connection);
    transfer::attach(connection);
}
