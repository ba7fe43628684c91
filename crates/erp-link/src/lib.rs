//! Resilient messaging client for the ERP application server.
//!
//! Keeps a single JSON-over-WebSocket connection alive and exposes it to UI
//! code as fire-and-forget [`Client::send`], awaitable [`Client::request`],
//! and a typed event feed.
//!
//! # Features
//! - Exponential-backoff reconnection after any unexpected close
//! - Heartbeat probes with an acknowledgment deadline
//! - FIFO buffering of outbound frames while offline
//! - Request/response correlation with per-request timeouts
//! - Local rejection of requests that lack a well-formed bearer token
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), erp_link::Error> {
//! use erp_link::{Client, ClientConfig, Event, EventKind, Frame};
//!
//! let client = Client::new(ClientConfig::new("wss://erp.example.com/ws"))?;
//! client.on(EventKind::AuthError, |event| {
//!     if let Event::AuthError { kind, .. } = event {
//!         eprintln!("login required ({})", kind.as_str());
//!     }
//! });
//!
//! let login = Frame::new("login")
//!     .with_field("username", "alice")
//!     .with_field("password", "secret");
//! let reply = client.request(&login, None).await?;
//! if let Some(token) = reply.token.as_deref() {
//!     client.set_auth_token(token);
//! }
//!
//! let menu = client.request(&Frame::new("menu.load"), None).await?;
//! println!("{:?}", menu.result);
//! # Ok(())
//! # }
//! ```

mod backoff;
pub mod classify;
mod client;
pub mod config;
mod connection;
mod correlator;
mod debounce;
pub mod events;
pub mod protocol;
mod queue;
pub mod token;
mod types;

pub use client::Client;
pub use config::{ClientConfig, load as load_config};
pub use debounce::Debouncer;
pub use events::{EventStream, ListenerId};
pub use token::{CredentialStore, FileStore, MemoryStore, is_valid_token};
pub use types::{AuthErrorKind, ConnectionState, Error, Event, EventKind, Frame};
