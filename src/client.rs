//! Client facade: live requests over one managed connection.

use std::sync::Arc;

use bon::Builder;
use futures::{Stream, StreamExt as _, stream};
use reqwest::header::HeaderValue;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Result;
use crate::http::{HttpFulfiller, Request, RequestFulfiller, Response};
use crate::live::{self, Mappings};
use crate::serde_helpers::deserialize_with_warnings;
use crate::types::Token;
use crate::ws::ConnectionManager;
use crate::ws::config::Config as ConnectionConfig;

/// Request header carrying the current session token.
pub const TOKEN_HEADER: &str = "client-token";

/// Client configuration.
#[derive(Debug, Clone, Default, Builder)]
#[non_exhaustive]
pub struct Config {
    /// Configuration of the underlying connection.
    #[builder(default)]
    pub connection: ConnectionConfig,
    /// Hold requests back until a session token is available, instead of
    /// sending them without [`TOKEN_HEADER`] (default: false).
    #[builder(default)]
    pub wait_for_token: bool,
}

/// Issues requests through a [`RequestFulfiller`] and keeps their results
/// live over a [`ConnectionManager`].
///
/// # Example
///
/// ```no_run
/// use futures::StreamExt as _;
/// use stockings_client::client::{Client, Config};
/// use stockings_client::http::Request;
/// use stockings_client::live::Mappings;
///
/// # async fn example() -> anyhow::Result<()> {
/// let client = Client::new("wss://example.com/socket", Config::default())?;
///
/// let request = Request::builder()
///     .url("https://example.com/todos".parse()?)
///     .build();
/// let mut todos = Box::pin(client.request(request, Mappings::new()));
///
/// while let Some(todos) = todos.next().await {
///     println!("todos: {}", todos?);
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client<F: RequestFulfiller = HttpFulfiller> {
    inner: Arc<ClientInner<F>>,
}

struct ClientInner<F> {
    connection: ConnectionManager,
    fulfiller: F,
    wait_for_token: bool,
}

impl<F: RequestFulfiller> Clone for Client<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Client<HttpFulfiller> {
    /// Connect to `endpoint` and fulfil requests over HTTP.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        let connection = ConnectionManager::new(endpoint, config.connection)?;
        Ok(Self::with_fulfiller(
            connection,
            HttpFulfiller::default(),
            config.wait_for_token,
        ))
    }
}

impl<F: RequestFulfiller> Client<F> {
    /// Use an existing connection and any request fulfiller.
    #[must_use]
    pub fn with_fulfiller(connection: ConnectionManager, fulfiller: F, wait_for_token: bool) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                connection,
                fulfiller,
                wait_for_token,
            }),
        }
    }

    #[must_use]
    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    /// Fulfil `request` and follow the live feeds its response declares.
    ///
    /// See [`live::wrap`] for the shape of the returned stream.
    pub fn request(
        &self,
        request: Request,
        mappings: Mappings,
    ) -> impl Stream<Item = Result<Value>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let response = stream::once(async move { inner.fulfill(request).await });

        live::wrap(response, self.inner.connection.clone(), mappings)
    }

    /// Like [`Client::request`], with every value deserialized into `T`.
    pub fn request_as<T>(
        &self,
        request: Request,
        mappings: Mappings,
    ) -> impl Stream<Item = Result<T>> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.request(request, mappings)
            .map(|value| value.and_then(deserialize_with_warnings::<T>))
    }

    /// Raw data-channel payloads of `msg_type`.
    pub fn observe_messages(&self, msg_type: &str) -> impl Stream<Item = Value> + Send + 'static {
        self.inner.connection.data(msg_type)
    }

    /// Stop the live feeds of `transaction_id` on the server.
    pub async fn unsubscribe(&self, transaction_id: &str) -> Result<()> {
        self.inner.connection.unsubscribe(transaction_id).await
    }
}

impl<F: RequestFulfiller> ClientInner<F> {
    async fn fulfill(&self, mut request: Request) -> Result<Response> {
        if let Some(token) = self.token().await {
            let mut value = HeaderValue::from_str(token.expose())?;
            value.set_sensitive(true);
            request.headers.insert(TOKEN_HEADER, value);
        }

        self.fulfiller.fulfill(request).await
    }

    async fn token(&self) -> Option<Token> {
        // Subscribe before checking so a token issued in between is not missed.
        let mut tokens = self.connection.tokens();

        if let Some(token) = self.connection.token() {
            return Some(token);
        }
        if !self.wait_for_token {
            return None;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Waiting for a session token before sending request");
        tokens.next().await
    }
}
