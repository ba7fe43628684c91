//! Public types for the erp-link crate.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tokio_tungstenite::tungstenite;

/// One discrete message exchanged with the application server.
///
/// Well-known envelope fields are typed; every other key lives in
/// [`payload`](Frame::payload) and is serialized alongside them, so frames
/// round-trip without losing fields this crate does not know about.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Logical channel discriminator (e.g. `"heartbeat"`, `"login"`).
    #[serde(
        rename = "type",
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<String>,
    /// Correlates a request with its response.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub request_id: Option<String>,
    /// Bearer credential presented with the frame.
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_bool",
        skip_serializing_if = "Option::is_none"
    )]
    pub success: Option<bool>,
    #[serde(
        default,
        deserialize_with = "lenient_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// Remaining application fields.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

/// Textual envelope fields accept any JSON value: non-string values keep
/// their JSON text and `null` reads as absent.
fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

fn lenient_bool<'de, D: Deserializer<'de>>(de: D) -> Result<Option<bool>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Bool(b) => Some(b),
        Value::String(s) => s.parse().ok(),
        _ => None,
    })
}

impl Frame {
    /// Create a frame with the given `type`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Default::default()
        }
    }

    /// Set an application field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Look up an application field.
    ///
    /// Envelope keys (`type`, `requestId`, `token`, `success`, `message`,
    /// `result`, `error`) live in their typed fields and are never found here.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn is_kind(&self, kind: &str) -> bool {
        self.kind.as_deref() == Some(kind)
    }
}

/// Lifecycle of the underlying connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Why an `auth_error` event fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// The server reported the token as expired.
    Expired,
    /// Missing, malformed, or otherwise rejected credentials.
    Other,
}

impl AuthErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthErrorKind::Expired => "expired",
            AuthErrorKind::Other => "other",
        }
    }
}

/// Notifications published by a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The connection opened and the outbound queue has been flushed.
    Connected,
    /// The connection closed. `was_clean` is always `true` for a local
    /// [`disconnect`](crate::Client::disconnect).
    Close {
        code: Option<u16>,
        reason: Option<String>,
        was_clean: bool,
    },
    /// A transport or decode failure. Never fatal to the client.
    Error { message: String },
    /// Authentication is missing, invalid, or was rejected by the server.
    AuthError { kind: AuthErrorKind, message: String },
    /// An inbound frame that no pending request claimed.
    Message(Frame),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected => EventKind::Connected,
            Event::Close { .. } => EventKind::Close,
            Event::Error { .. } => EventKind::Error,
            Event::AuthError { .. } => EventKind::AuthError,
            Event::Message(_) => EventKind::Message,
        }
    }
}

/// Event names listeners subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Close,
    Error,
    AuthError,
    Message,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Connected,
        EventKind::Close,
        EventKind::Error,
        EventKind::AuthError,
        EventKind::Message,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Close => "close",
            EventKind::Error => "error",
            EventKind::AuthError => "auth_error",
            EventKind::Message => "message",
        }
    }
}

/// Errors returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tungstenite::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("authentication required: no valid token")]
    AuthRequired,

    #[error("request {request_id} timed out after {}ms", timeout.as_millis())]
    Timeout {
        request_id: String,
        timeout: Duration,
    },

    #[error("request id {0} is already pending")]
    DuplicateRequestId(String),

    #[error("connect timed out after {}ms", .0.as_millis())]
    ConnectTimeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("client shut down")]
    Shutdown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}
