//! Retry an action until the server acknowledges it on the control channel.

use std::pin::pin;

use futures::{Stream, StreamExt as _};
use tokio::time::{self, MissedTickBehavior};

use super::config::RetryConfig;
use super::frame::Envelope;

/// Run `on_attempt` immediately and then once per `retry.interval` until a
/// message from `control` satisfies `matches`.
///
/// Resolves to `true` on the first match and to `false` once
/// `retry.max_attempts` attempts went unanswered for a full interval each (or
/// the control stream ended). Whichever path resolves it, the timer and the
/// control listener are both dropped with the future.
///
/// `control` should be subscribed before calling so that an acknowledgement
/// racing the first attempt is not missed.
pub async fn confirm<S, P, A>(retry: RetryConfig, control: S, mut matches: P, mut on_attempt: A) -> bool
where
    S: Stream<Item = Envelope>,
    P: FnMut(&Envelope) -> bool,
    A: FnMut(u32),
{
    let mut control = pin!(control);
    let mut ticker = time::interval(retry.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts = 0_u32;

    loop {
        tokio::select! {
            biased;

            message = control.next() => match message {
                Some(envelope) if matches(&envelope) => return true,
                Some(_) => {}
                None => return false,
            },

            _ = ticker.tick() => {
                if attempts >= retry.max_attempts {
                    return false;
                }
                attempts += 1;
                on_attempt(attempts);
            }
        }
    }
}
