#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use httpmock::MockServer;
use reqwest::StatusCode;
use serde_json::json;
use stockings_client::http::{HttpFulfiller, Request, RequestFulfiller as _};

fn request(server: &MockServer, path: &str) -> Request {
    Request::builder()
        .url(server.url(path).parse().unwrap())
        .build()
}

mod fulfill {
    use httpmock::Method::{GET, POST};
    use reqwest::Method;
    use reqwest::header::{HeaderMap, HeaderValue};
    use serde_json::Value;
    use stockings_client::error::{Kind, Status};
    use stockings_client::http::RequestFulfiller as _;

    use super::*;

    #[tokio::test]
    async fn json_response_should_succeed() -> anyhow::Result<()> {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/todos").query_param("done", "false");
            then.status(StatusCode::OK)
                .header("client-subscriptions", r#"{"transactionId":"tx-1","subscriptions":[]}"#)
                .json_body(json!([{ "id": 1 }]));
        });

        let mut request = request(&server, "/todos");
        request.query = Some("?done=false".to_owned());
        let response = HttpFulfiller::default().fulfill(request).await?;

        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, json!([{ "id": 1 }]));
        assert_eq!(
            response.headers.get("client-subscriptions").unwrap(),
            r#"{"transactionId":"tx-1","subscriptions":[]}"#
        );
        mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn json_body_and_headers_are_sent() -> anyhow::Result<()> {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/todos")
                .header("client-token", "token-1")
                .header("content-type", "application/json")
                .json_body(json!({ "title": "write tests" }));
            then.status(StatusCode::CREATED).json_body(json!({ "id": 3 }));
        });

        let mut headers = HeaderMap::new();
        headers.insert("client-token", HeaderValue::from_static("token-1"));
        let request = Request::builder()
            .method(Method::POST)
            .url(server.url("/todos").parse()?)
            .headers(headers)
            .body(json!({ "title": "write tests" }))
            .build();

        let response = HttpFulfiller::default().fulfill(request).await?;

        assert_eq!(response.status, StatusCode::CREATED);
        assert_eq!(response.body, json!({ "id": 3 }));
        mock.assert();

        Ok(())
    }

    #[tokio::test]
    async fn empty_and_text_bodies() -> anyhow::Result<()> {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/empty");
            then.status(StatusCode::NO_CONTENT);
        });
        server.mock(|when, then| {
            when.method(GET).path("/text");
            then.status(StatusCode::OK).body("plain words");
        });

        let fulfiller = HttpFulfiller::default();

        let empty = fulfiller.fulfill(request(&server, "/empty")).await?;
        assert_eq!(empty.body, Value::Null);

        let text = fulfiller.fulfill(request(&server, "/text")).await?;
        assert_eq!(text.body, json!("plain words"));

        Ok(())
    }

    #[tokio::test]
    async fn error_status_should_fail() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(StatusCode::NOT_FOUND).body("no such todo");
        });

        let err = HttpFulfiller::default()
            .fulfill(request(&server, "/missing"))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), Kind::Status);
        let status = err.downcast_ref::<Status>().unwrap();
        assert_eq!(status.status_code, StatusCode::NOT_FOUND);
        assert_eq!(status.method, Method::GET);
        assert_eq!(status.path, "/missing");
        assert_eq!(status.message, "no such todo");
        mock.assert();
    }
}
