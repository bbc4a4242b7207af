#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use stockings_client::ws::config::Config;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;

/// Send client logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    #[cfg(feature = "tracing")]
    drop(
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init(),
    );
}

/// How long helpers wait for something to happen before giving up.
pub const WAIT: Duration = Duration::from_secs(2);

/// Timings short enough for tests; everything not under test stays out of the way.
#[must_use]
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.reconnect.delay = Duration::from_millis(100);
    config.keepalive_timeout = Duration::from_secs(30);
    config.token_timeout = Duration::from_secs(30);
    config.retry.interval = Duration::from_millis(100);
    config
}

#[must_use]
pub fn data_frame(msg_type: &str, payload: &Value) -> String {
    format!("m:{}", json!({ "type": msg_type, "payload": payload }))
}

#[must_use]
pub fn control_frame(msg_type: &str, payload: &Value) -> String {
    format!("c:{}", json!({ "type": msg_type, "payload": payload }))
}

/// Split a frame into its prefix and envelope.
#[must_use]
pub fn parse_frame(text: &str) -> Option<(&str, Value)> {
    let (prefix, body) = text.split_at_checked(2)?;
    Some((prefix, serde_json::from_str(body).ok()?))
}

/// What the mock server does on its own.
#[derive(Debug, Clone, Copy)]
pub struct Behavior {
    /// Send `client-token` `token-<n>` to the n-th connection right after the handshake
    pub issue_tokens: bool,
    /// Echo `unsubscribe` and `client-change` control messages back
    pub acknowledge: bool,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            issue_tokens: true,
            acknowledge: true,
        }
    }
}

#[derive(Debug, Clone)]
enum Command {
    Frame(String),
    Close,
}

/// Mock WebSocket server speaking the stockings sub-protocol.
pub struct MockWsServer {
    addr: SocketAddr,
    /// Commands for ALL currently connected clients
    command_tx: broadcast::Sender<Command>,
    /// Frames received from clients
    received_rx: mpsc::UnboundedReceiver<String>,
    /// Id of every connection, once it is ready to receive commands
    connected_rx: mpsc::UnboundedReceiver<usize>,
    accepted: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
}

impl MockWsServer {
    pub async fn start() -> Self {
        Self::start_with(Behavior::default()).await
    }

    /// Start a mock WebSocket server on a random port.
    pub async fn start_with(behavior: Behavior) -> Self {
        init_tracing();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<Command>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();
        let (connected_tx, connected_rx) = mpsc::unbounded_channel::<usize>();
        let accepted = Arc::new(AtomicUsize::new(0));
        let active = Arc::new(AtomicUsize::new(0));

        let commands = command_tx.clone();
        let accepted_count = Arc::clone(&accepted);
        let active_count = Arc::clone(&active);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                // Agree to whatever sub-protocol the client asks for.
                let negotiate = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                    if let Some(protocol) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                        response
                            .headers_mut()
                            .insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
                    }
                    Ok(response)
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, negotiate).await
                else {
                    continue;
                };

                let id = accepted_count.fetch_add(1, Ordering::SeqCst) + 1;
                let active = Arc::clone(&active_count);
                active.fetch_add(1, Ordering::SeqCst);

                let (mut write, mut read) = ws_stream.split();
                let mut command_rx = commands.subscribe();
                let received_tx = received_tx.clone();
                let connected_tx = connected_tx.clone();

                tokio::spawn(async move {
                    if behavior.issue_tokens {
                        let token = control_frame("client-token", &json!(format!("token-{id}")));
                        if write.send(Message::Text(token.into())).await.is_err() {
                            active.fetch_sub(1, Ordering::SeqCst);
                            return;
                        }
                    }
                    drop(connected_tx.send(id));

                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        let text = text.to_string();
                                        if behavior.acknowledge && is_acknowledged(&text)
                                            && write.send(Message::Text(text.clone().into())).await.is_err()
                                        {
                                            break;
                                        }
                                        drop(received_tx.send(text));
                                    }
                                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(Command::Frame(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Command::Close) | Err(_) => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                }
                            }
                        }
                    }

                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            command_tx,
            received_rx,
            connected_rx,
            accepted,
            active,
        }
    }

    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Send a raw text frame to all connected clients.
    pub fn send_raw(&self, text: &str) {
        drop(self.command_tx.send(Command::Frame(text.to_owned())));
    }

    pub fn send_data(&self, msg_type: &str, payload: &Value) {
        self.send_raw(&data_frame(msg_type, payload));
    }

    pub fn send_control(&self, msg_type: &str, payload: &Value) {
        self.send_raw(&control_frame(msg_type, payload));
    }

    /// Close every connected client.
    pub fn close_all(&self) {
        drop(self.command_tx.send(Command::Close));
    }

    /// Connections accepted so far.
    #[must_use]
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Wait for the next connection to be ready and return its id.
    pub async fn next_connection(&mut self) -> Option<usize> {
        timeout(WAIT, self.connected_rx.recv()).await.ok().flatten()
    }

    /// Receive the next frame sent by a client.
    pub async fn recv_frame(&mut self) -> Option<String> {
        self.recv_frame_within(WAIT).await
    }

    pub async fn recv_frame_within(&mut self, wait: Duration) -> Option<String> {
        timeout(wait, self.received_rx.recv()).await.ok().flatten()
    }

    /// Receive the payload of the next control message of `msg_type`, skipping others.
    pub async fn recv_control(&mut self, msg_type: &str) -> Option<Value> {
        let deadline = Instant::now() + WAIT;
        loop {
            let text = timeout(deadline - Instant::now(), self.received_rx.recv())
                .await
                .ok()
                .flatten()?;
            if let Some(("c:", envelope)) = parse_frame(&text)
                && envelope["type"] == msg_type
            {
                return Some(envelope["payload"].clone());
            }
        }
    }

    /// Count control messages of `msg_type` until none arrives for `quiet`.
    pub async fn count_control(&mut self, msg_type: &str, quiet: Duration) -> usize {
        let mut count = 0;
        while let Some(text) = self.recv_frame_within(quiet).await {
            if let Some(("c:", envelope)) = parse_frame(&text)
                && envelope["type"] == msg_type
            {
                count += 1;
            }
        }
        count
    }
}

fn is_acknowledged(text: &str) -> bool {
    matches!(
        parse_frame(text),
        Some(("c:", envelope)) if envelope["type"] == "unsubscribe" || envelope["type"] == "client-change"
    )
}

/// Poll `condition` until it holds or [`WAIT`] elapses.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
