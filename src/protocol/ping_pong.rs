//! Answers every control `ping` with a `pong` carrying the same payload.

use futures::StreamExt as _;

use super::{PING, PONG};
use crate::ws::ConnectionManager;
use crate::ws::broadcast::Listener;
use crate::ws::connection::WeakConnectionManager;
use crate::ws::frame::{Channel, Envelope};

pub(crate) fn attach(connection: &ConnectionManager) {
    tokio::spawn(answer_pings(
        connection.downgrade(),
        connection.control_messages(),
    ));
}

async fn answer_pings(connection: WeakConnectionManager, mut control: Listener<Envelope>) {
    while let Some(envelope) = control.next().await {
        if !envelope.is(PING) {
            continue;
        }
        let Some(connection) = connection.upgrade() else { return };

        #[cfg(feature = "tracing")]
        tracing::trace!(payload = %envelope.payload, "Answering ping");
        // Queued straight onto the socket: pongs leave in the order of their pings.
        if let Err(e) = connection.enqueue(Channel::Control, PONG, &envelope.payload) {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "Unable to answer ping");
            #[cfg(not(feature = "tracing"))]
            let _ = &e;
        }
    }
}
