//! Public entry point: [`Client`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot, watch};

use crate::config::ClientConfig;
use crate::connection::{Command, Connection};
use crate::events::{EventBus, EventStream, ListenerId};
use crate::token::{CredentialStore, MemoryStore, TokenStore, is_valid_token};
use crate::types::{AuthErrorKind, ConnectionState, Error, Event, EventKind, Frame};

struct ClientInner {
    config: Arc<ClientConfig>,
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    tokens: Arc<TokenStore>,
    events: Arc<EventBus>,
}

/// Messaging client for the application server.
///
/// Owns one background connection task that handles reconnection, heartbeats,
/// buffering while offline, and request/response correlation. Cheap to clone;
/// the task stops (closing the socket cleanly) once every clone is dropped.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Create a client whose token lives only in memory.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        Self::with_store(config, MemoryStore::new())
    }

    /// Create a client backed by `store` for the bearer token.
    pub fn with_store(
        config: ClientConfig,
        store: impl CredentialStore + 'static,
    ) -> Result<Self, Error> {
        config.validate()?;
        let url = config.resolve_url()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("a Tokio runtime is required: {e}")))?;

        let config = Arc::new(config);
        let tokens = Arc::new(TokenStore::new(Box::new(store)));
        let events = Arc::new(EventBus::new());
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (commands, command_rx) = mpsc::unbounded_channel();

        let connection = Connection::new(
            url.to_string(),
            Arc::clone(&config),
            Arc::clone(&tokens),
            Arc::clone(&events),
            state_tx,
        );
        drop(runtime.spawn(connection.run(command_rx)));

        let client = Self {
            inner: Arc::new(ClientInner {
                config,
                commands,
                state_rx,
                tokens,
                events,
            }),
        };
        if client.inner.config.auto_connect {
            client.connect()?;
        }
        Ok(client)
    }

    fn dispatch(&self, command: Command) -> Result<(), Error> {
        self.inner
            .commands
            .send(command)
            .map_err(|_| Error::Shutdown)
    }

    fn is_login(&self, frame: &Frame) -> bool {
        frame.is_kind(&self.inner.config.login_type)
    }

    fn auth_error(&self, message: impl Into<String>) {
        self.inner.events.emit(&Event::AuthError {
            kind: AuthErrorKind::Other,
            message: message.into(),
        });
    }

    // --- Lifecycle ---

    /// Open the connection. No-op while connecting or connected.
    pub fn connect(&self) -> Result<(), Error> {
        self.dispatch(Command::Connect)
    }

    /// Close the connection and cancel any pending reconnection.
    ///
    /// Pending requests are left to resolve or time out.
    pub fn disconnect(&self, code: u16, reason: impl Into<String>) -> Result<(), Error> {
        self.dispatch(Command::Disconnect {
            code,
            reason: reason.into(),
        })
    }

    /// Close cleanly, then open again immediately.
    pub fn reconnect(&self) -> Result<(), Error> {
        self.dispatch(Command::Reconnect)
    }

    // --- Messaging ---

    /// Fire-and-forget send. Buffered while the connection is down.
    ///
    /// A malformed `token` is stripped from the outgoing copy; unless the frame
    /// is the login call, an `auth_error` event is also emitted.
    pub fn send(&self, message: &Frame) -> Result<(), Error> {
        let mut frame = message.clone();
        if let Some(token) = &frame.token
            && !is_valid_token(token)
        {
            frame.token = None;
            if !self.is_login(&frame) {
                tracing::warn!(kind = ?frame.kind, "Stripped malformed token from frame");
                self.auth_error("malformed token");
            }
        }
        self.dispatch(Command::Send(frame))
    }

    /// Send `message` and wait for the response carrying the same `requestId`.
    ///
    /// The frame is handed to the connection task before this returns; the
    /// future only waits for the outcome. A `requestId` is generated if absent.
    /// Non-login calls without a well-formed token fail with
    /// [`Error::AuthRequired`] and an `auth_error` event, without touching the
    /// network. `timeout` defaults to the configured `requestTimeout`.
    pub fn request(
        &self,
        message: &Frame,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, Result<Frame, Error>> {
        let dispatched = self.dispatch_request(message, timeout);
        async move {
            let reply = dispatched?;
            reply.await.map_err(|_| Error::Shutdown)?
        }
        .boxed()
    }

    fn dispatch_request(
        &self,
        message: &Frame,
        timeout: Option<Duration>,
    ) -> Result<oneshot::Receiver<Result<Frame, Error>>, Error> {
        let mut frame = message.clone();
        let request_id = frame
            .request_id
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();

        if self.is_login(&frame) {
            frame.token = None;
        } else {
            let token = frame.token.take().or_else(|| self.inner.tokens.get());
            match token {
                Some(token) if is_valid_token(&token) => frame.token = Some(token),
                _ => {
                    tracing::warn!(request_id = %request_id, "Request rejected: not authenticated");
                    self.auth_error("authentication required");
                    return Err(Error::AuthRequired);
                }
            }
        }

        let (reply, rx) = oneshot::channel();
        self.dispatch(Command::Request {
            request_id,
            frame,
            timeout: timeout.unwrap_or(self.inner.config.request_timeout),
            reply,
        })?;
        Ok(rx)
    }

    /// Ids of requests still waiting for a response.
    pub async fn pending_request_ids(&self) -> Result<Vec<String>, Error> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(Command::PendingIds(tx))?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    // --- Events ---

    /// Register `handler` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.inner.events.on(kind, handler)
    }

    /// Remove one handler, or every handler for `kind` when `id` is `None`.
    pub fn off(&self, kind: EventKind, id: Option<ListenerId>) -> usize {
        self.inner.events.off(kind, id)
    }

    /// Stream of all events from now on.
    pub fn events(&self) -> EventStream {
        EventStream::new(
            Arc::clone(&self.inner.events),
            self.inner.config.event_channel_capacity,
        )
    }

    // --- State ---

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    /// Wait until the connection reaches `target`.
    pub async fn wait_for_state(&self, target: ConnectionState) -> Result<(), Error> {
        let mut rx = self.inner.state_rx.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| Error::Shutdown)
    }

    // --- Credentials ---

    /// Store a bearer token. A malformed value clears the credential instead.
    pub fn set_auth_token(&self, token: &str) {
        self.inner.tokens.set(token);
    }

    /// Forget the token, including any persisted copy.
    pub fn clear_auth_token(&self) {
        self.inner.tokens.clear();
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.tokens.is_authenticated()
    }

    pub fn auth_token(&self) -> Option<String> {
        self.inner.tokens.get()
    }
}
