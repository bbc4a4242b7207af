//! Idle detection.
//!
//! The first message on either channel arms a timer and every later message
//! pushes it back by [`Config::keepalive_timeout`]. If it fires, the
//! connection is restarted and the timer stays disarmed until the next
//! message.
//!
//! [`Config::keepalive_timeout`]: crate::ws::config::Config::keepalive_timeout

use std::pin::pin;
use std::time::Duration;

use futures::{Stream, StreamExt as _, stream};
use tokio::time::{self, Instant};

use crate::ws::ConnectionManager;
use crate::ws::connection::WeakConnectionManager;
use crate::ws::frame::Envelope;

pub(crate) fn attach(connection: &ConnectionManager) {
    let messages = stream::select(connection.data_messages(), connection.control_messages());
    let timeout = connection.config().keepalive_timeout;

    tokio::spawn(watch_idle(connection.downgrade(), messages, timeout));
}

async fn watch_idle<S>(connection: WeakConnectionManager, messages: S, timeout: Duration)
where
    S: Stream<Item = Envelope>,
{
    let mut messages = pin!(messages);
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            message = messages.next() => {
                if message.is_none() {
                    return;
                }
                deadline = Some(Instant::now() + timeout);
            }

            () = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                let Some(connection) = connection.upgrade() else { return };

                #[cfg(feature = "tracing")]
                tracing::warn!(?timeout, "No message received within keepalive window, restarting connection");
                connection.force_reconnect();
            }
        }
    }
}
