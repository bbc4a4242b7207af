//! Session migration across reconnects.
//!
//! Whenever a token replaces a previous one, the server is told which session
//! the client is continuing by a control `client-change` carrying the previous
//! token. It is repeated on the [`RetryConfig`] schedule until the server
//! echoes it; a transfer that is never acknowledged is dropped.
//!
//! [`RetryConfig`]: crate::ws::config::RetryConfig

use futures::StreamExt as _;

use super::CLIENT_CHANGE;
use crate::types::Token;
use crate::ws::ConnectionManager;
use crate::ws::broadcast::Listener;
use crate::ws::config::RetryConfig;
use crate::ws::connection::WeakConnectionManager;
use crate::ws::frame::{Channel, Envelope};
use crate::ws::retry;

pub(crate) fn attach(connection: &ConnectionManager) {
    tokio::spawn(follow_tokens(connection.downgrade(), connection.tokens()));
}

async fn follow_tokens(connection: WeakConnectionManager, mut tokens: Listener<Token>) {
    let mut previous: Option<Token> = None;

    while let Some(token) = tokens.next().await {
        let Some(stale) = previous.replace(token) else {
            continue;
        };
        let Some(manager) = connection.upgrade() else { return };

        tokio::spawn(transfer(
            connection.clone(),
            manager.config().retry,
            manager.control_messages(),
            stale,
        ));
    }
}

async fn transfer(
    connection: WeakConnectionManager,
    retry: RetryConfig,
    control: Listener<Envelope>,
    stale: Token,
) {
    let acknowledged = retry::confirm(
        retry,
        control,
        |envelope| envelope.is(CLIENT_CHANGE) && envelope.payload.as_str() == Some(stale.expose()),
        |attempt| {
            if let Some(connection) = connection.upgrade() {
                #[cfg(feature = "tracing")]
                tracing::debug!(attempt, "Sending client-change");
                #[cfg(not(feature = "tracing"))]
                let _ = attempt;
                connection.spawn_send(Channel::Control, CLIENT_CHANGE, stale.clone());
            }
        },
    )
    .await;

    if !acknowledged {
        #[cfg(feature = "tracing")]
        tracing::warn!("client-change was never acknowledged, giving up on session transfer");
    }
}
