#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use backoff::backoff::{Backoff as _, Constant};
use futures::{SinkExt as _, Stream, StreamExt as _, future};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::handshake::client::Request as ClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_util::sync::CancellationToken;

use super::broadcast::{Broadcast, Listener};
use super::config::Config;
use super::error::WsError;
use super::frame::{self, Channel, Envelope};
use super::retry;
use crate::error::{Error, Kind};
use crate::protocol::{self, CLIENT_TOKEN, UNSUBSCRIBE};
use crate::types::Token;
use crate::Result;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// A socket has been created and is performing its handshake
    Connecting,
    /// The current socket is open
    Open,
    /// The current socket closed or failed; a reconnect is scheduled
    Closed,
}

impl ConnectionState {
    /// Check if the connection is currently open.
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open)
    }
}

/// Lifecycle of individual sockets, broadcast in the order the manager saw it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketEvent {
    Opened(u64),
    /// The socket received its `client-token`
    Authenticated(u64),
    Closed(u64),
}

/// A frame waiting to be written by the socket task, with its write outcome.
struct OutboundFrame {
    text: String,
    written: oneshot::Sender<Result<()>>,
}

/// The one socket currently owned by the manager.
struct Socket {
    generation: u64,
    writer: mpsc::UnboundedSender<OutboundFrame>,
    cancel: CancellationToken,
}

struct Inner {
    endpoint: String,
    config: Config,
    state_tx: watch::Sender<ConnectionState>,
    /// Current socket; every transition of the socket slot and the state
    /// happens while this lock is held.
    socket: Mutex<Option<Socket>>,
    next_generation: AtomicU64,
    reconnect: Mutex<Constant>,
    /// Delayed retry of a socket that could not even be created.
    pending_retry: Mutex<Option<CancellationToken>>,
    token: RwLock<Option<Token>>,
    open: Broadcast<bool>,
    data: Broadcast<Envelope>,
    control: Broadcast<Envelope>,
    tokens: Broadcast<Token>,
    events: Broadcast<SocketEvent>,
    shutdown: CancellationToken,
}

/// Owns one self-healing WebSocket connection and the broadcasts built on it.
///
/// Incoming frames are split by prefix into a data and a control broadcast;
/// open-state changes and session tokens get broadcasts of their own. The
/// protocol extensions (keepalive, ping-pong, token handshake, token transfer)
/// are attached when the manager is created.
///
/// A closed or failed socket is replaced after [`ReconnectConfig::delay`]
/// unless something else (for example [`ConnectionManager::restart`]) already
/// started a new one. Replacing a socket closes the old one and ignores any
/// event it still produces.
///
/// Cloning is cheap and every clone refers to the same connection. Background
/// tasks only hold weak references, so the socket is closed once the last
/// clone is dropped.
///
/// [`ReconnectConfig::delay`]: super::config::ReconnectConfig::delay
///
/// # Example
///
/// ```no_run
/// use stockings_client::ws::ConnectionManager;
/// use stockings_client::ws::config::Config;
/// use futures::StreamExt as _;
///
/// # async fn example() -> stockings_client::Result<()> {
/// let connection = ConnectionManager::new("wss://example.com/socket", Config::default())?;
///
/// let mut updates = Box::pin(connection.data("todo-updated"));
/// connection.wait_until_open().await;
/// while let Some(payload) = updates.next().await {
///     println!("update: {payload}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

/// Weak handle used by background tasks so they never keep a connection alive.
#[derive(Clone)]
pub(crate) struct WeakConnectionManager {
    inner: Weak<Inner>,
}

impl WeakConnectionManager {
    pub(crate) fn upgrade(&self) -> Option<ConnectionManager> {
        self.inner.upgrade().map(|inner| ConnectionManager { inner })
    }
}

impl ConnectionManager {
    /// Create a connection manager, attach the protocol extensions and start
    /// connecting to `endpoint`.
    ///
    /// Must be called from within a Tokio runtime. An endpoint that cannot be
    /// turned into a WebSocket request is not an error here: construction is
    /// retried after the reconnect delay, indefinitely.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        if config.retry.max_attempts == 0 {
            return Err(Error::validation(
                "retry.max_attempts must allow at least one attempt",
            ));
        }

        let (state_tx, _) = watch::channel(ConnectionState::Closed);
        let reconnect = config.reconnect.clone().into();

        let connection = Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.to_owned(),
                config,
                state_tx,
                socket: Mutex::new(None),
                next_generation: AtomicU64::new(0),
                reconnect: Mutex::new(reconnect),
                pending_retry: Mutex::new(None),
                token: RwLock::new(None),
                open: Broadcast::new(),
                data: Broadcast::new(),
                control: Broadcast::new(),
                tokens: Broadcast::new(),
                events: Broadcast::new(),
                shutdown: CancellationToken::new(),
            }),
        };

        protocol::attach(&connection);
        connection.inner.force_reconnect();

        Ok(connection)
    }

    pub(crate) fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Configuration this manager was created with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Whether the current socket is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Current session token. Always `None` while the connection is not open.
    #[must_use]
    pub fn token(&self) -> Option<Token> {
        if !self.is_open() {
            return None;
        }
        self.inner
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Resolve once the connection is open; immediately if it already is.
    ///
    /// Returns `false` only if the connection is being torn down.
    pub async fn wait_until_open(&self) -> bool {
        let mut state_rx = self.inner.state_tx.subscribe();
        state_rx.wait_for(|state| state.is_open()).await.is_ok()
    }

    /// Tear down the current socket and open a new one, whatever the state.
    ///
    /// The new socket is created before this returns; the returned future
    /// resolves once it is open.
    pub fn restart(&self) -> impl Future<Output = bool> + Send + 'static {
        self.inner.force_reconnect();
        let this = self.clone();
        async move { this.wait_until_open().await }
    }

    /// Send a message, waiting for the connection to be open first.
    ///
    /// Fails if the payload cannot be serialized, or if the socket closes
    /// before the frame is written.
    pub async fn send<P: Serialize + ?Sized>(
        &self,
        channel: Channel,
        msg_type: &str,
        payload: &P,
    ) -> Result<()> {
        let text = frame::encode(channel, msg_type, payload)?;
        self.send_raw(text).await
    }

    /// Send a message on the data channel.
    pub async fn send_data<P: Serialize + ?Sized>(&self, msg_type: &str, payload: &P) -> Result<()> {
        self.send(Channel::Data, msg_type, payload).await
    }

    /// Send a message on the control channel.
    pub async fn send_control<P: Serialize + ?Sized>(
        &self,
        msg_type: &str,
        payload: &P,
    ) -> Result<()> {
        self.send(Channel::Control, msg_type, payload).await
    }

    async fn send_raw(&self, text: String) -> Result<()> {
        self.wait_until_open().await;

        let (written, outcome) = oneshot::channel();
        self.inner.write(OutboundFrame { text, written })?;

        outcome.await.map_err(|_e| WsError::ConnectionClosed)?
    }

    /// Queue a message on the current socket without waiting for it to be
    /// open or written. Messages queued this way go out in order.
    pub(crate) fn enqueue<P: Serialize + ?Sized>(
        &self,
        channel: Channel,
        msg_type: &str,
        payload: &P,
    ) -> Result<()> {
        let text = frame::encode(channel, msg_type, payload)?;
        let (written, _) = oneshot::channel();
        self.inner.write(OutboundFrame { text, written })
    }

    /// Send in the background; failures are logged and otherwise ignored.
    pub(crate) fn spawn_send<P>(&self, channel: Channel, msg_type: &'static str, payload: P)
    where
        P: Serialize + Send + Sync + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.send(channel, msg_type, &payload).await {
                #[cfg(feature = "tracing")]
                tracing::debug!(msg_type, error = %e, "Background send failed");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        });
    }

    /// Ask the server to stop the live feeds of `transaction_id`.
    ///
    /// The request is repeated on the [`RetryConfig`] schedule until the server
    /// echoes it. If it never does, the connection is restarted and an
    /// [`WsError::UnsubscribeTimeout`] error is returned.
    ///
    /// [`RetryConfig`]: super::config::RetryConfig
    pub async fn unsubscribe(&self, transaction_id: &str) -> Result<()> {
        let control = self.control_messages();
        let expected = Value::String(transaction_id.to_owned());

        let acknowledged = retry::confirm(
            self.inner.config.retry,
            control,
            |envelope| envelope.is(UNSUBSCRIBE) && envelope.payload == expected,
            |attempt| {
                #[cfg(feature = "tracing")]
                tracing::debug!(transaction_id, attempt, "Sending unsubscribe");
                #[cfg(not(feature = "tracing"))]
                let _ = attempt;
                self.spawn_send(Channel::Control, UNSUBSCRIBE, expected.clone());
            },
        )
        .await;

        if acknowledged {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::warn!(transaction_id, "Unsubscribe was never acknowledged, restarting connection");
        self.inner.force_reconnect();

        Err(WsError::UnsubscribeTimeout {
            transaction_id: transaction_id.to_owned(),
        }
        .into())
    }

    /// Stream of open-state changes: `true` on open, `false` when an open or
    /// connecting socket goes away.
    #[must_use]
    pub fn open_states(&self) -> Listener<bool> {
        self.inner.open.subscribe()
    }

    /// Every envelope received on the data channel.
    #[must_use]
    pub fn data_messages(&self) -> Listener<Envelope> {
        self.inner.data.subscribe()
    }

    /// Every envelope received on the control channel.
    #[must_use]
    pub fn control_messages(&self) -> Listener<Envelope> {
        self.inner.control.subscribe()
    }

    /// Every token issued by the server.
    #[must_use]
    pub fn tokens(&self) -> Listener<Token> {
        self.inner.tokens.subscribe()
    }

    /// Payloads of data messages of type `msg_type`.
    pub fn data(&self, msg_type: &str) -> impl Stream<Item = Value> + Send + 'static {
        payloads(self.data_messages(), msg_type)
    }

    /// Payloads of control messages of type `msg_type`.
    pub fn control(&self, msg_type: &str) -> impl Stream<Item = Value> + Send + 'static {
        payloads(self.control_messages(), msg_type)
    }

    /// Data payloads of type `msg_type` deserialized into `T`.
    ///
    /// Payloads that do not deserialize are skipped.
    pub fn data_as<T>(&self, msg_type: &str) -> impl Stream<Item = T> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        typed(self.data(msg_type))
    }

    /// Control payloads of type `msg_type` deserialized into `T`.
    ///
    /// Payloads that do not deserialize are skipped.
    pub fn control_as<T>(&self, msg_type: &str) -> impl Stream<Item = T> + Send + 'static
    where
        T: DeserializeOwned + Send + 'static,
    {
        typed(self.control(msg_type))
    }

    /// Number of live listeners on one of the message channels.
    #[must_use]
    pub fn listener_count(&self, channel: Channel) -> usize {
        match channel {
            Channel::Data => self.inner.data.listener_count(),
            Channel::Control => self.inner.control.listener_count(),
        }
    }

    pub(crate) fn socket_events(&self) -> Listener<SocketEvent> {
        self.inner.events.subscribe()
    }

    /// Replace the socket now; used by the extensions that detect a dead
    /// connection.
    pub(crate) fn force_reconnect(&self) {
        self.inner.force_reconnect();
    }

    /// Replace the socket of `generation`, unless it has already been replaced.
    pub(crate) fn restart_socket(&self, generation: u64) {
        self.inner.replace_socket(Some(generation));
    }
}

fn payloads(listener: Listener<Envelope>, msg_type: &str) -> impl Stream<Item = Value> + Send + 'static {
    let msg_type = msg_type.to_owned();
    listener.filter_map(move |envelope| {
        let matches = envelope.is(&msg_type);
        future::ready(matches.then(|| envelope.payload))
    })
}

fn typed<T, S>(payloads: S) -> impl Stream<Item = T> + Send + 'static
where
    T: DeserializeOwned + Send + 'static,
    S: Stream<Item = Value> + Send + 'static,
{
    payloads.filter_map(|payload| {
        future::ready(
            serde_json::from_value(payload)
                .inspect_err(|e| {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(error = %e, "Skipping payload of unexpected shape");
                    #[cfg(not(feature = "tracing"))]
                    let _: &serde_json::Error = e;
                })
                .ok(),
        )
    })
}

impl Inner {
    fn lock_socket(&self) -> MutexGuard<'_, Option<Socket>> {
        // The slot is only ever swapped wholesale, so a poisoned lock still
        // holds a consistent value.
        self.socket.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(slot: &Option<Socket>, generation: u64) -> bool {
        slot.as_ref()
            .is_some_and(|socket| socket.generation == generation)
    }

    fn reconnect_delay(&self) -> Duration {
        self.reconnect
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_backoff()
            .unwrap_or(self.config.reconnect.delay)
    }

    fn write(&self, outgoing: OutboundFrame) -> Result<()> {
        self.lock_socket()
            .as_ref()
            .ok_or(WsError::ConnectionClosed)?
            .writer
            .send(outgoing)
            .map_err(|_e| WsError::ConnectionClosed)?;
        Ok(())
    }

    fn client_request(&self) -> Result<ClientRequest> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        if let Some(protocol) = &self.config.protocol {
            let value = HeaderValue::from_str(protocol)
                .map_err(|e| Error::with_source(Kind::Validation, e))?;
            request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
        Ok(request)
    }

    fn lock_pending_retry(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.pending_retry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Close the current socket (if any) and start a new one.
    fn force_reconnect(self: &Arc<Self>) {
        self.replace_socket(None);
    }

    /// Start a new socket in place of the socket of `expected`, or of whatever
    /// socket is current when `None`.
    fn replace_socket(self: &Arc<Self>, expected: Option<u64>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        if let Some(expected) = expected
            && !Self::is_current(&self.lock_socket(), expected)
        {
            return;
        }
        if let Some(pending) = self.lock_pending_retry().take() {
            pending.cancel();
        }

        let request = match self.client_request() {
            Ok(request) => request,
            Err(e) => {
                let delay = self.reconnect_delay();
                #[cfg(feature = "tracing")]
                tracing::warn!(endpoint = %self.endpoint, error = %e, ?delay, "Unable to create socket, retrying");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;

                let retry = self.shutdown.child_token();
                if let Some(superseded) = self.lock_pending_retry().replace(retry.clone()) {
                    superseded.cancel();
                }
                self.after(retry, delay, Self::force_reconnect);
                return;
            }
        };

        let cancel = self.shutdown.child_token();
        let (writer, outbound) = mpsc::unbounded_channel();

        let generation = {
            let mut slot = self.lock_socket();
            if let Some(expected) = expected
                && !Self::is_current(&slot, expected)
            {
                return;
            }

            let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
            if let Some(old) = slot.take() {
                old.cancel.cancel();
                self.events.send(&SocketEvent::Closed(old.generation));
            }
            *slot = Some(Socket {
                generation,
                writer,
                cancel: cancel.clone(),
            });
            *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;

            let previous = self.state_tx.send_replace(ConnectionState::Connecting);
            if previous.is_open() {
                self.open.send(&false);
            }
            generation
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, generation, "Connecting");

        tokio::spawn(drive(
            Arc::downgrade(self),
            generation,
            request,
            outbound,
            cancel,
        ));
    }

    /// Reconnect only if nothing else already did.
    fn reconnect(self: &Arc<Self>) {
        if *self.state_tx.borrow() == ConnectionState::Closed {
            self.force_reconnect();
        }
    }

    /// Run `action` after `delay` unless `cancel` fires first.
    fn after(self: &Arc<Self>, cancel: CancellationToken, delay: Duration, action: fn(&Arc<Self>)) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    if let Some(inner) = weak.upgrade() {
                        action(&inner);
                    }
                }
            }
        });
    }

    fn on_open(&self, generation: u64) {
        let slot = self.lock_socket();
        if !Self::is_current(&slot, generation) {
            return;
        }
        self.state_tx.send_replace(ConnectionState::Open);
        self.open.send(&true);
        self.events.send(&SocketEvent::Opened(generation));

        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, generation, "Connection open");
    }

    fn on_closed(self: &Arc<Self>, generation: u64) {
        {
            let slot = self.lock_socket();
            if !Self::is_current(&slot, generation) {
                return;
            }
            self.state_tx.send_replace(ConnectionState::Closed);
            self.open.send(&false);
            self.events.send(&SocketEvent::Closed(generation));
        }

        let delay = self.reconnect_delay();
        #[cfg(feature = "tracing")]
        tracing::debug!(endpoint = %self.endpoint, generation, ?delay, "Connection closed, scheduling reconnect");
        self.after(self.shutdown.clone(), delay, Self::reconnect);
    }

    /// Store the token issued to the socket of `generation`. Only called from
    /// [`Inner::dispatch`], with the socket slot locked.
    fn accept_token(&self, generation: u64, payload: &Value) {
        let Value::String(token) = payload else {
            #[cfg(feature = "tracing")]
            tracing::warn!(%payload, "Ignoring client-token without a string payload");
            return;
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(generation, "Received session token");

        let token = Token::new(token.as_str());
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        self.tokens.send(&token);
        self.events.send(&SocketEvent::Authenticated(generation));
    }

    fn dispatch(&self, generation: u64, text: &str) {
        let slot = self.lock_socket();
        if !Self::is_current(&slot, generation) {
            return;
        }

        match frame::decode(text) {
            Some((Channel::Data, envelope)) => {
                self.data.send(&envelope);
            }
            Some((Channel::Control, envelope)) => {
                if envelope.is(CLIENT_TOKEN) {
                    self.accept_token(generation, &envelope.payload);
                }
                self.control.send(&envelope);
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, "Dropping malformed frame");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Drive one socket from handshake to close.
///
/// Every event is reported with `generation`, so events of a socket that has
/// since been replaced are ignored.
async fn drive(
    inner: Weak<Inner>,
    generation: u64,
    request: ClientRequest,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        () = cancel.cancelled() => return,
        result = connect_async(request) => result,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            let error = Error::with_source(Kind::WebSocket, WsError::Connection(e));
            #[cfg(feature = "tracing")]
            tracing::warn!("Unable to connect: {error:?}");
            #[cfg(not(feature = "tracing"))]
            let _ = &error;
            if let Some(manager) = inner.upgrade() {
                manager.on_closed(generation);
            }
            return;
        }
    };

    match inner.upgrade() {
        Some(manager) => manager.on_open(generation),
        None => return,
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                _ = write.send(Message::Close(None)).await;
                return;
            }

            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!(text = %text.as_str(), "Received WebSocket text message");

                        let Some(manager) = inner.upgrade() else { return };
                        manager.dispatch(generation, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!("Error handling connection: {e:?}");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                        break;
                    }
                    Some(Ok(_)) => {
                        // Binary frames are not part of the protocol; PING/PONG
                        // frames are answered by tungstenite itself.
                    }
                }
            }

            Some(outgoing) = outbound.recv() => {
                #[cfg(feature = "tracing")]
                tracing::trace!(text = %outgoing.text, "Sending WebSocket text message");

                match write.send(Message::Text(outgoing.text.into())).await {
                    Ok(()) => {
                        _ = outgoing.written.send(Ok(()));
                    }
                    Err(e) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!("Error writing to connection: {e:?}");
                        _ = outgoing.written.send(Err(e.into()));
                        break;
                    }
                }
            }
        }
    }

    if let Some(manager) = inner.upgrade() {
        manager.on_closed(generation);
    }
}

#[cfg(test)]
mod tests {
    use futures::{FutureExt as _, StreamExt as _};
    use serde_json::json;
    use tokio::net::TcpListener;

    use super::*;

    /// Accepts TCP connections but never answers the WebSocket handshake, so
    /// sockets only open when a test says so.
    async fn silent_endpoint() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    fn generations(connection: &ConnectionManager) -> u64 {
        connection.inner.next_generation.load(Ordering::Relaxed)
    }

    #[tokio::test(start_paused = true)]
    async fn token_of_replaced_socket_does_not_count_for_the_next() {
        let (_listener, url) = silent_endpoint().await;
        let mut config = Config::default();
        config.token_timeout = Duration::from_secs(1);
        let connection = ConnectionManager::new(&url, config).unwrap();
        let mut tokens = connection.tokens();
        let inner = &connection.inner;

        inner.on_open(0);
        inner.dispatch(0, r#"c:{"type":"client-token","payload":"token-of-socket-0"}"#);
        inner.force_reconnect();
        inner.on_open(1);

        let token = tokens.next().await.unwrap();
        assert_eq!(&token, "token-of-socket-0");
        assert_eq!(connection.token(), None, "socket 1 has no token of its own");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(generations(&connection), 3, "socket 1 is restarted for lack of a token");
        assert_eq!(connection.state(), ConnectionState::Connecting);
        assert!(tokens.next().now_or_never().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_socket_is_ignored() {
        let (_listener, url) = silent_endpoint().await;
        let mut config = Config::default();
        config.reconnect.delay = Duration::from_secs(1);
        let connection = ConnectionManager::new(&url, config).unwrap();
        let mut updates = Box::pin(connection.data("update"));
        let inner = &connection.inner;

        inner.on_open(0);
        inner.force_reconnect();
        inner.on_open(1);
        let mut open_states = connection.open_states();

        inner.dispatch(0, r#"m:{"type":"update","payload":"stale"}"#);
        inner.dispatch(0, r#"c:{"type":"client-token","payload":"stale"}"#);
        inner.on_closed(0);
        inner.dispatch(1, r#"m:{"type":"update","payload":"fresh"}"#);

        assert_eq!(updates.next().await, Some(json!("fresh")));
        assert!(open_states.next().now_or_never().is_none());
        assert!(connection.is_open());
        assert_eq!(connection.token(), None);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(generations(&connection), 2, "no reconnect was scheduled for socket 0");
        assert!(connection.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_socket_creation_keeps_a_single_retry() {
        let mut config = Config::default();
        config.reconnect.delay = Duration::from_millis(100);
        let connection = ConnectionManager::new("not a websocket url", config).unwrap();
        let metrics = tokio::runtime::Handle::current().metrics();

        tokio::time::sleep(Duration::from_millis(250)).await;
        let baseline = metrics.num_alive_tasks();

        for _ in 0..5 {
            drop(connection.restart());
        }
        tokio::time::sleep(Duration::from_millis(1050)).await;

        assert_eq!(metrics.num_alive_tasks(), baseline);
        assert_eq!(generations(&connection), 0);
    }
}
