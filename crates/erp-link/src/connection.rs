//! Connection management: event loop, reconnection, heartbeat, and request
//! correlation.
//!
//! All transport state is owned by a single task ([`Connection::run`]). The
//! public [`Client`](crate::Client) talks to it over an unbounded command
//! channel, so commands are applied in submission order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use crate::Error;
use crate::backoff::Backoff;
use crate::classify;
use crate::config::ClientConfig;
use crate::correlator::{Correlator, Reply};
use crate::events::EventBus;
use crate::protocol::{close_code, decode_ws_message, encode_frame, heartbeat_probe, is_heartbeat_ack};
use crate::queue::{FrameSink, OutboundQueue};
use crate::token::TokenStore;
use crate::types::{ConnectionState, Event, Frame};

/// Upper bound on waiting for our close frame to be written.
const CLOSE_SEND_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Type aliases for WebSocket split halves
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) type WsRead = futures_util::stream::SplitStream<WsStream>;
pub(crate) type WsWrite = futures_util::stream::SplitSink<WsStream, tungstenite::Message>;

type WsFrame = Result<tungstenite::Message, tungstenite::Error>;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub(crate) enum Command {
    Connect,
    Disconnect { code: u16, reason: String },
    Reconnect,
    Send(Frame),
    Request {
        request_id: String,
        frame: Frame,
        timeout: Duration,
        reply: Reply,
    },
    PendingIds(oneshot::Sender<Vec<String>>),
}

// ---------------------------------------------------------------------------
// Transport helpers
// ---------------------------------------------------------------------------

async fn open(url: String, timeout: Duration) -> Result<WsStream, Error> {
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok((ws, _resp))) => Ok(ws),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(Error::ConnectTimeout(timeout)),
    }
}

async fn write_frame(ws: &mut WsWrite, frame: &Frame, debug: bool) -> Result<(), Error> {
    let text = encode_frame(frame)?;
    if debug {
        tracing::debug!(frame = %text, "Sending frame");
    }
    ws.send(tungstenite::Message::Text(text.into())).await?;
    Ok(())
}

struct Writer<'a> {
    ws: &'a mut WsWrite,
    debug: bool,
}

impl FrameSink for Writer<'_> {
    async fn send_frame(&mut self, frame: &Frame) -> Result<(), Error> {
        write_frame(self.ws, frame, self.debug).await
    }
}

async fn poll_opt<F: Future + Unpin>(fut: &mut Option<F>) -> F::Output {
    match fut {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_opt(read: &mut Option<WsRead>) -> Option<WsFrame> {
    match read {
        Some(read) => read.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

/// Probe schedule and outstanding acknowledgment deadline.
#[derive(Debug, Default)]
struct Heartbeat {
    next_probe_at: Option<Instant>,
    ack_deadline: Option<Instant>,
}

impl Heartbeat {
    fn start(&mut self, interval: Duration) {
        self.next_probe_at = Some(Instant::now() + interval);
        self.ack_deadline = None;
    }

    fn stop(&mut self) {
        self.next_probe_at = None;
        self.ack_deadline = None;
    }

    /// An unanswered earlier probe keeps its deadline.
    fn probe_sent(&mut self, interval: Duration, timeout: Duration) {
        let now = Instant::now();
        self.next_probe_at = Some(now + interval);
        let _ = self.ack_deadline.get_or_insert(now + timeout);
    }

    fn acknowledged(&mut self) {
        self.ack_deadline = None;
    }
}

// ---------------------------------------------------------------------------
// Background event loop
// ---------------------------------------------------------------------------

pub(crate) struct Connection {
    url: String,
    config: Arc<ClientConfig>,
    tokens: Arc<TokenStore>,
    events: Arc<EventBus>,
    state_tx: watch::Sender<ConnectionState>,
    queue: OutboundQueue,
    correlator: Correlator,
    backoff: Backoff,
    heartbeat: Heartbeat,
    opening: Option<BoxFuture<'static, Result<WsStream, Error>>>,
    ws_read: Option<WsRead>,
    ws_write: Option<WsWrite>,
    reconnect_at: Option<Instant>,
}

impl Connection {
    pub(crate) fn new(
        url: String,
        config: Arc<ClientConfig>,
        tokens: Arc<TokenStore>,
        events: Arc<EventBus>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let backoff = Backoff::new(
            config.reconnect_interval,
            config.max_reconnect_interval,
            config.reconnect_decay,
        );
        Self {
            url,
            config,
            tokens,
            events,
            state_tx,
            queue: OutboundQueue::new(),
            correlator: Correlator::new(),
            backoff,
            heartbeat: Heartbeat::default(),
            opening: None,
            ws_read: None,
            ws_write: None,
            reconnect_at: None,
        }
    }

    /// Drive the connection until every command sender is dropped.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::debug!("All client handles dropped, shutting down");
                        self.disconnect(close_code::NORMAL, "client dropped").await;
                        return;
                    }
                },

                result = poll_opt(&mut self.opening) => {
                    self.opening = None;
                    self.on_open_result(result).await;
                }

                frame = next_opt(&mut self.ws_read) => self.on_ws_frame(frame),

                () = sleep_opt(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.connect();
                }

                () = sleep_opt(self.heartbeat.next_probe_at) => self.send_heartbeat().await,

                () = sleep_opt(self.heartbeat.ack_deadline) => {
                    tracing::warn!("Heartbeat timeout");
                    self.reconnect("heartbeat timeout").await;
                }

                () = sleep_opt(self.correlator.next_deadline()) => {
                    let _ = self.correlator.expire(Instant::now());
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect(),
            Command::Disconnect { code, reason } => self.disconnect(code, &reason).await,
            Command::Reconnect => self.reconnect("reconnect requested").await,
            Command::Send(frame) => self.send(frame).await,
            Command::Request {
                request_id,
                frame,
                timeout,
                reply,
            } => self.request(request_id, frame, timeout, reply).await,
            Command::PendingIds(reply) => {
                let _ = reply.send(self.correlator.ids());
            }
        }
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn emit_error(&self, message: String) {
        self.events.emit(&Event::Error { message });
    }

    // --- Lifecycle ---

    fn connect(&mut self) {
        let state = self.state();
        if matches!(state, ConnectionState::Connected | ConnectionState::Connecting) {
            tracing::debug!(%state, "Connect ignored");
            return;
        }
        self.reconnect_at = None;
        self.set_state(ConnectionState::Connecting);
        tracing::info!(url = %self.url, "Connecting");
        self.opening = Some(open(self.url.clone(), self.config.connect_timeout).boxed());
    }

    async fn on_open_result(&mut self, result: Result<WsStream, Error>) {
        match result {
            Ok(ws) => {
                let (write, read) = ws.split();
                self.ws_write = Some(write);
                self.ws_read = Some(read);
                self.backoff.reset();
                self.reconnect_at = None;
                self.set_state(ConnectionState::Connected);
                self.heartbeat.start(self.config.heartbeat_interval);
                tracing::info!(url = %self.url, "Connected");
                self.flush_queue().await;
                self.events.emit(&Event::Connected);
            }
            Err(e) => {
                tracing::warn!("Connection attempt failed: {e}");
                self.emit_error(format!("connection failed: {e}"));
                self.on_unexpected_close(Some(close_code::ABNORMAL), None, false);
            }
        }
    }

    /// Tear down after a close we did not ask for, then schedule a retry.
    fn on_unexpected_close(&mut self, code: Option<u16>, reason: Option<String>, was_clean: bool) {
        self.heartbeat.stop();
        self.opening = None;
        self.ws_read = None;
        self.ws_write = None;
        self.set_state(ConnectionState::Disconnected);
        self.events.emit(&Event::Close {
            code,
            reason,
            was_clean,
        });
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if let Some(max) = self.config.max_reconnect_attempts
            && self.backoff.attempts() >= max
        {
            tracing::error!(attempts = max, "Giving up on reconnecting");
            self.emit_error(format!("reconnect abandoned after {max} attempts"));
            return;
        }
        let delay = self.backoff.next_delay();
        tracing::info!(
            attempt = self.backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    async fn disconnect(&mut self, code: u16, reason: &str) {
        match self.state() {
            ConnectionState::Closing => return,
            ConnectionState::Disconnected => {
                if self.reconnect_at.take().is_some() {
                    tracing::info!("Pending reconnect cancelled");
                }
                return;
            }
            ConnectionState::Connecting | ConnectionState::Connected => {}
        }
        self.set_state(ConnectionState::Closing);
        self.reconnect_at = None;
        self.heartbeat.stop();
        self.opening = None;
        self.ws_read = None;
        if let Some(mut ws) = self.ws_write.take() {
            let close = tungstenite::Message::Close(Some(CloseFrame {
                code: CloseCode::from(code),
                reason: reason.to_string().into(),
            }));
            match tokio::time::timeout(CLOSE_SEND_TIMEOUT, ws.send(close)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Close frame not delivered: {e}"),
                Err(_) => tracing::debug!("Close frame send timed out"),
            }
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::info!(code, reason, "Disconnected");
        self.events.emit(&Event::Close {
            code: Some(code),
            reason: Some(reason.to_string()),
            was_clean: true,
        });
    }

    async fn reconnect(&mut self, reason: &str) {
        self.disconnect(close_code::NORMAL, reason).await;
        self.connect();
    }

    // --- Inbound ---

    fn on_ws_frame(&mut self, frame: Option<WsFrame>) {
        match frame {
            Some(Ok(tungstenite::Message::Close(close))) => {
                let (code, reason) = match close {
                    Some(close) => (
                        Some(u16::from(close.code)),
                        Some(close.reason.as_str().to_string()),
                    ),
                    None => (None, None),
                };
                tracing::info!(?code, ?reason, "Server closed the connection");
                self.on_unexpected_close(code, reason, true);
            }
            Some(Ok(message)) => match decode_ws_message(&message) {
                Some(Ok(frame)) => self.on_frame(frame),
                Some(Err(e)) => {
                    tracing::warn!("Failed to decode frame: {e}");
                    self.emit_error(format!("failed to decode frame: {e}"));
                }
                None => {}
            },
            Some(Err(e)) => {
                tracing::warn!("WebSocket error: {e}");
                self.emit_error(format!("websocket error: {e}"));
                self.on_unexpected_close(Some(close_code::ABNORMAL), None, false);
            }
            None => {
                tracing::info!("WebSocket stream ended");
                self.on_unexpected_close(Some(close_code::ABNORMAL), None, false);
            }
        }
    }

    fn on_frame(&mut self, frame: Frame) {
        if self.config.debug {
            tracing::debug!(?frame, "Received frame");
        }
        if is_heartbeat_ack(&frame) {
            self.heartbeat.acknowledged();
            return;
        }
        if let Some(kind) = classify::auth_failure(&frame) {
            tracing::warn!(
                kind = kind.as_str(),
                request_id = ?frame.request_id,
                "Server rejected credentials"
            );
            self.events.emit(&Event::AuthError {
                kind,
                message: frame.message.unwrap_or_default(),
            });
            return;
        }
        if let Some(frame) = self.correlator.resolve_or_route(frame) {
            self.events.emit(&Event::Message(frame));
        }
    }

    // --- Outbound ---

    async fn transmit(&mut self, frame: &Frame) -> Result<(), Error> {
        let ws = self.ws_write.as_mut().ok_or(Error::NotConnected)?;
        write_frame(ws, frame, self.config.debug).await
    }

    async fn flush_queue(&mut self) {
        if self.queue.is_empty() {
            return;
        }
        let Some(ws) = self.ws_write.as_mut() else {
            return;
        };
        let mut writer = Writer {
            ws,
            debug: self.config.debug,
        };
        match self.queue.flush(&mut writer).await {
            Ok(sent) => tracing::debug!(sent, "Flushed outbound queue"),
            Err(e) => {
                tracing::warn!(remaining = self.queue.len(), "Queue flush stopped: {e}");
                self.emit_error(format!("send failed: {e}"));
            }
        }
    }

    async fn send(&mut self, frame: Frame) {
        match self.state() {
            ConnectionState::Connected if self.queue.is_empty() => {
                if let Err(e) = self.transmit(&frame).await {
                    tracing::warn!("Send failed, queueing frame: {e}");
                    self.emit_error(format!("send failed: {e}"));
                    self.queue.enqueue(frame);
                }
            }
            ConnectionState::Connected => {
                self.queue.enqueue(frame);
                self.flush_queue().await;
            }
            ConnectionState::Disconnected => {
                self.queue.enqueue(frame);
                self.connect();
            }
            ConnectionState::Connecting | ConnectionState::Closing => self.queue.enqueue(frame),
        }
    }

    async fn request(&mut self, request_id: String, frame: Frame, timeout: Duration, reply: Reply) {
        if let Err(reply) = self.correlator.register(request_id.clone(), reply, timeout) {
            tracing::warn!(request_id = %request_id, "Duplicate request id");
            let _ = reply.send(Err(Error::DuplicateRequestId(request_id)));
            return;
        }
        self.send(frame).await;
    }

    async fn send_heartbeat(&mut self) {
        self.heartbeat
            .probe_sent(self.config.heartbeat_interval, self.config.heartbeat_timeout);
        let probe = heartbeat_probe(self.tokens.get());
        if let Err(e) = self.transmit(&probe).await {
            tracing::warn!("Failed to send heartbeat: {e}");
            self.emit_error(format!("heartbeat send failed: {e}"));
        }
    }
}
