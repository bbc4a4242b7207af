//! Session token handshake.
//!
//! Every time a socket opens, the server has [`Config::token_timeout`] to send
//! it a control `client-token`. A socket that gets no token in time is
//! restarted. The manager itself stores and broadcasts the tokens as they
//! arrive; this task only keeps the deadline.
//!
//! [`Config::token_timeout`]: crate::ws::config::Config::token_timeout

use std::time::Duration;

use futures::StreamExt as _;
use tokio::time::{self, Instant};

use crate::ws::ConnectionManager;
use crate::ws::broadcast::Listener;
use crate::ws::connection::{SocketEvent, WeakConnectionManager};

pub(crate) fn attach(connection: &ConnectionManager) {
    tokio::spawn(await_tokens(
        connection.downgrade(),
        connection.socket_events(),
        connection.config().token_timeout,
    ));
}

async fn await_tokens(
    connection: WeakConnectionManager,
    mut events: Listener<SocketEvent>,
    timeout: Duration,
) {
    // Socket still waiting for its token, and until when.
    let mut waiting: Option<(u64, Instant)> = None;

    loop {
        let deadline = waiting.map(|(_, deadline)| deadline);

        tokio::select! {
            event = events.next() => match event {
                Some(SocketEvent::Opened(generation)) => {
                    waiting = Some((generation, Instant::now() + timeout));
                }
                Some(SocketEvent::Authenticated(generation) | SocketEvent::Closed(generation)) => {
                    if waiting.is_some_and(|(socket, _)| socket == generation) {
                        waiting = None;
                    }
                }
                None => return,
            },

            () = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                let Some((generation, _)) = waiting.take() else { continue };
                let Some(connection) = connection.upgrade() else { return };

                #[cfg(feature = "tracing")]
                tracing::warn!(?timeout, generation, "No client-token received after open, restarting connection");
                connection.restart_socket(generation);
            }
        }
    }
}
