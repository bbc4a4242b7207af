//! Request/response values and the capability that turns one into the other.
//!
//! The live-merge layer does not care how a request reaches the server; it
//! only needs one [`Response`] with status, headers and a JSON body. Anything
//! implementing [`RequestFulfiller`] can provide it. [`HttpFulfiller`] does so
//! over plain HTTP.

#![expect(
    clippy::module_name_repetitions,
    reason = "HttpFulfiller names the transport it fulfils requests over"
)]

use async_trait::async_trait;
use bon::Builder;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use url::Url;

use crate::Result;
use crate::error::Error;

/// A request to fulfil.
///
/// # Example
///
/// ```
/// use stockings_client::http::Request;
///
/// let request = Request::builder()
///     .url("https://example.com/todos".parse()?)
///     .query("done=false")
///     .build();
///
/// assert_eq!(request.full_url().as_str(), "https://example.com/todos?done=false");
/// # Ok::<_, url::ParseError>(())
/// ```
#[derive(Debug, Clone, Builder)]
#[non_exhaustive]
pub struct Request {
    /// HTTP method (default: GET).
    #[builder(default)]
    pub method: Method,
    pub url: Url,
    /// Raw query string, with or without the leading `?`.
    #[builder(into)]
    pub query: Option<String>,
    #[builder(default)]
    pub headers: HeaderMap,
    /// JSON body. A string body is sent as-is.
    pub body: Option<Value>,
}

impl Request {
    /// The URL with the query string applied.
    #[must_use]
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if let Some(query) = &self.query {
            let query = query.strip_prefix('?').unwrap_or(query);
            if !query.is_empty() {
                url.set_query(Some(query));
            }
        }
        url
    }
}

/// A fulfilled request.
#[derive(Debug, Clone, Builder)]
#[non_exhaustive]
pub struct Response {
    #[builder(default = StatusCode::OK)]
    pub status: StatusCode,
    #[builder(default)]
    pub headers: HeaderMap,
    /// JSON body; `null` when the server sent none.
    #[builder(default)]
    pub body: Value,
}

/// Capability turning a [`Request`] into exactly one [`Response`].
#[async_trait]
pub trait RequestFulfiller: Send + Sync + 'static {
    async fn fulfill(&self, request: Request) -> Result<Response>;
}

/// [`RequestFulfiller`] over HTTP.
///
/// Status codes from 200 to 399 are successes; anything else is a
/// [`Kind::Status`](crate::error::Kind::Status) error carrying the response
/// text.
#[derive(Debug, Clone, Default)]
pub struct HttpFulfiller {
    client: reqwest::Client,
}

impl HttpFulfiller {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RequestFulfiller for HttpFulfiller {
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(
            level = "debug",
            skip(self, request),
            fields(
                method = %request.method,
                path = request.url.path(),
                status_code
            )
        )
    )]
    async fn fulfill(&self, request: Request) -> Result<Response> {
        let method = request.method.clone();
        let path = request.url.path().to_owned();

        let mut builder = self
            .client
            .request(method.clone(), request.full_url())
            .headers(request.headers);
        builder = match request.body {
            Some(Value::String(raw)) => builder.body(raw),
            Some(body) => builder.json(&body),
            None => builder,
        };

        let response = builder.send().await?;
        let status_code = response.status();

        #[cfg(feature = "tracing")]
        tracing::Span::current().record("status_code", status_code.as_u16());

        let headers = response.headers().clone();
        let text = response.text().await?;

        if !(200..400).contains(&status_code.as_u16()) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                status = %status_code,
                method = %method,
                path = %path,
                message = %text,
                "Request failed"
            );

            return Err(Error::status(status_code, method, path, text));
        }

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text))
        };

        Ok(Response {
            status: status_code,
            headers,
            body,
        })
    }
}
