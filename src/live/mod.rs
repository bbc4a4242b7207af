//! Live requests: responses that keep updating.
//!
//! The server declares, in a response header, which data-channel message types
//! affect the response and how each one is merged into it (see
//! [`MergeStrategy`]). [`wrap`] turns such a response into a stream of values
//! that starts with the body and follows every declared feed.

pub mod merge;
pub mod stream;
pub mod types;

pub use merge::MergeStrategy;
pub use stream::wrap;
pub use types::{Mapping, Mappings, TransactionSubscription, TransactionSubscriptions};

/// Response header declaring the live feeds of a request.
pub const SUBSCRIPTION_HEADER: &str = "client-subscriptions";
