//! Client configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Environment variable consulted when no `url` is configured.
pub const URL_ENV_VAR: &str = "ERP_LINK_URL";

pub(crate) const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(1000);
pub(crate) const DEFAULT_MAX_RECONNECT_INTERVAL: Duration = Duration::from_millis(30_000);
pub(crate) const DEFAULT_RECONNECT_DECAY: f64 = 1.5;
pub(crate) const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);
pub(crate) const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub(crate) const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;
pub(crate) const DEFAULT_LOGIN_TYPE: &str = "login";

/// Options recognized by [`Client`](crate::Client).
///
/// Field names are camelCase on the wire and durations are milliseconds, so a
/// YAML file looks like:
///
/// ```yaml
/// url: wss://erp.example.com/ws
/// reconnectInterval: 1000
/// heartbeatInterval: 30000
/// autoConnect: true
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// WebSocket endpoint (`ws://` or `wss://`). Falls back to `ERP_LINK_URL`.
    pub url: Option<String>,
    #[serde(with = "millis")]
    pub reconnect_interval: Duration,
    #[serde(with = "millis")]
    pub max_reconnect_interval: Duration,
    /// Growth factor applied per reconnect attempt. Must be at least 1.0.
    pub reconnect_decay: f64,
    #[serde(with = "millis")]
    pub heartbeat_interval: Duration,
    #[serde(with = "millis")]
    pub heartbeat_timeout: Duration,
    /// Default deadline for [`Client::request`](crate::Client::request).
    #[serde(with = "millis")]
    pub request_timeout: Duration,
    pub auto_connect: bool,
    /// Log every frame sent and received at debug level.
    pub debug: bool,
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Give up after this many consecutive scheduled reconnects. `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    pub event_channel_capacity: usize,
    /// `type` of the login call, which is exempt from token checks.
    pub login_type: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_interval: DEFAULT_MAX_RECONNECT_INTERVAL,
            reconnect_decay: DEFAULT_RECONNECT_DECAY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            auto_connect: true,
            debug: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_reconnect_attempts: None,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            login_type: DEFAULT_LOGIN_TYPE.to_string(),
        }
    }
}

impl ClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Parse a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(content: &str) -> Result<Self, Error> {
        serde_yaml_ng::from_str(content).map_err(|e| Error::Config(format!("parse: {e}")))
    }

    /// Resolve the endpoint: explicit `url`, then `ERP_LINK_URL`.
    pub fn resolve_url(&self) -> Result<url::Url, Error> {
        let raw = match &self.url {
            Some(url) => url.clone(),
            None => std::env::var(URL_ENV_VAR).map_err(|_| {
                Error::Config(format!("no url configured and {URL_ENV_VAR} is not set"))
            })?,
        };
        let url = url::Url::parse(&raw)?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(Error::Config(format!(
                "unsupported url scheme {other:?}, expected ws or wss"
            ))),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        if !(self.reconnect_decay.is_finite() && self.reconnect_decay >= 1.0) {
            return Err(Error::Config(format!(
                "reconnectDecay must be >= 1.0, got {}",
                self.reconnect_decay
            )));
        }
        let intervals = [
            ("reconnectInterval", self.reconnect_interval),
            ("maxReconnectInterval", self.max_reconnect_interval),
            ("heartbeatInterval", self.heartbeat_interval),
            ("heartbeatTimeout", self.heartbeat_timeout),
            ("requestTimeout", self.request_timeout),
            ("connectTimeout", self.connect_timeout),
        ];
        for (name, value) in intervals {
            if value.is_zero() {
                return Err(Error::Config(format!("{name} must be greater than zero")));
            }
        }
        if self.max_reconnect_interval < self.reconnect_interval {
            return Err(Error::Config(
                "maxReconnectInterval must not be below reconnectInterval".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load a client config from a YAML file.
pub async fn load(path: &Path) -> Result<ClientConfig, Error> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
    serde_yaml_ng::from_str(&content)
        .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
