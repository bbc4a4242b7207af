use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use reqwest::header::HeaderMap;
use serde::Deserialize;
use serde_json::Value;

use super::SUBSCRIPTION_HEADER;
use crate::error::{Error, Kind};
use crate::serde_helpers::deserialize_with_warnings;

/// Live feeds the server opened for one request, declared in the
/// `client-subscriptions` response header.
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSubscriptions {
    /// Identifier to pass to `unsubscribe` to stop these feeds
    #[serde(default)]
    pub transaction_id: String,
    #[serde(default)]
    pub subscriptions: Vec<TransactionSubscription>,
}

/// One live feed: data messages of `msg_type`, folded with a merge strategy.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSubscription {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub merge_strategy: Option<String>,
    #[serde(default)]
    pub upsert_key: Option<String>,
}

impl TransactionSubscriptions {
    /// Parse the subscription header of a response.
    ///
    /// A missing header means no subscriptions. So does a malformed one, which
    /// is logged.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let Some(raw) = headers.get(SUBSCRIPTION_HEADER) else {
            return Self::default();
        };

        let parsed = raw
            .to_str()
            .map_err(|e| Error::with_source(Kind::Validation, e))
            .and_then(|text| serde_json::from_str::<Value>(text).map_err(Error::from))
            .and_then(deserialize_with_warnings::<Self>);

        match parsed {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Ignoring malformed {SUBSCRIPTION_HEADER} header");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                Self::default()
            }
        }
    }
}

/// Value mapping applied to a live request.
pub type Mapping = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Mappings for a live request: one for the response body and one per
/// message type for pushed messages, applied before merging.
#[derive(Clone, Default)]
pub struct Mappings {
    body: Option<Mapping>,
    messages: HashMap<String, Mapping>,
}

impl Mappings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Map the response body before it is emitted.
    #[must_use]
    pub fn with_body<F>(mut self, mapping: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.body = Some(Arc::new(mapping));
        self
    }

    /// Map every pushed message of `msg_type` before it is merged.
    #[must_use]
    pub fn with_message<S, F>(mut self, msg_type: S, mapping: F) -> Self
    where
        S: Into<String>,
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.messages.insert(msg_type.into(), Arc::new(mapping));
        self
    }

    pub(crate) fn map_body(&self, body: Value) -> Value {
        match &self.body {
            Some(mapping) => mapping(body),
            None => body,
        }
    }

    pub(crate) fn message(&self, msg_type: &str) -> Option<Mapping> {
        self.messages.get(msg_type).cloned()
    }
}

impl fmt::Debug for Mappings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mappings")
            .field("body", &self.body.is_some())
            .field("messages", &self.messages.keys().collect::<Vec<_>>())
            .finish()
    }
}
