use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt as _};
use serde_json::Value;

use super::merge::MergeStrategy;
use super::types::{Mappings, TransactionSubscriptions};
use crate::Result;
use crate::http::Response;
use crate::ws::ConnectionManager;

/// Turn a response stream into a stream of live values.
///
/// For every response, the body (after the body mapping) is emitted first.
/// Then every feed declared in the `client-subscriptions` header is followed
/// on `connection`'s data channel: each message (after its type's mapping) is
/// folded into the current value with the feed's merge strategy, and every
/// new value is emitted.
///
/// Feeds are opened before the body is emitted, so no message published after
/// the response is missed. Dropping the returned stream releases every feed;
/// the server is not told, use [`ConnectionManager::unsubscribe`] for that.
///
/// An unknown merge strategy is emitted as an error before the body. A
/// response without subscriptions passes straight through.
pub fn wrap<S>(
    responses: S,
    connection: ConnectionManager,
    mappings: Mappings,
) -> impl Stream<Item = Result<Value>> + Send + 'static
where
    S: Stream<Item = Result<Response>> + Send + 'static,
{
    async_stream::try_stream! {
        let mut responses = Box::pin(responses);

        while let Some(response) = responses.next().await {
            let response = response?;
            let declared = TransactionSubscriptions::from_headers(&response.headers);

            let mut strategies = Vec::with_capacity(declared.subscriptions.len());
            let mut feeds: Vec<BoxStream<'static, (usize, Value)>> =
                Vec::with_capacity(declared.subscriptions.len());

            for (index, subscription) in declared.subscriptions.into_iter().enumerate() {
                strategies.push(MergeStrategy::resolve(
                    subscription.merge_strategy.as_deref(),
                    subscription.upsert_key.as_deref(),
                )?);

                let mapping = mappings.message(&subscription.msg_type);
                feeds.push(
                    connection
                        .data(&subscription.msg_type)
                        .map(move |payload| {
                            let payload = match &mapping {
                                Some(mapping) => mapping(payload),
                                None => payload,
                            };
                            (index, payload)
                        })
                        .boxed(),
                );
            }

            let mut current = mappings.map_body(response.body);
            yield current.clone();

            if feeds.is_empty() {
                continue;
            }

            #[cfg(feature = "tracing")]
            tracing::debug!(
                transaction_id = %declared.transaction_id,
                feeds = feeds.len(),
                "Following live feeds"
            );

            let mut updates = stream::select_all(feeds);
            while let Some((index, payload)) = updates.next().await {
                let Some(strategy) = strategies.get(index) else {
                    continue;
                };
                if let Some(next) = strategy.merge(&current, payload) {
                    current = next;
                    yield current.clone();
                }
            }
        }
    }
}
