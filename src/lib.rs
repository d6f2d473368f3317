//! # wsbridge
//! Bridges an upgraded WebSocket connection to an application handler expressed as two
//! bounded message queues, one per direction, plus a one-shot completion signal and a
//! forced-disconnect handle.
//!
//! Every accepted connection runs two concurrent pumps: the read pump decodes frames into
//! the inbound queue and the write pump drains the outbound queue, drives keepalive pings
//! and enforces a deadline on every write. Both pumps start together, run independently
//! and stop together; the underlying connection is closed exactly once whichever side
//! ended the exchange.
//!
//! Framing, masking and control-frame replies are delegated to `tokio-tungstenite`; the
//! HTTP upgrade is performed on top of `hyper`.
//!
//! # Features
//! The crate provides several optional features that can be enabled in your `Cargo.toml`:
//!
//! - `json` (default): Enables the [`Json`](codec::Json) codec, so handlers exchange any
//!   `serde` type as text frames.
//!
//! - `axum`: Enables the [`IncomingUpgrade`] extractor for the axum web framework, so a route
//!   handler can pass the upgrade request straight to a [`Socket`].
//!
//! ## Usage Example
//! ```toml
//! [dependencies]
//! wsbridge = { version = "0.1", features = ["axum"] }
//! ```
//!
//! # Server Example
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use hyper::{body::Incoming, Request, StatusCode};
//! use wsbridge::{codec::Text, Done, Handler, HttpResponse, Inbound, Options, Socket};
//!
//! let socket = Socket::text(Handler::receiver(
//!     |_ctx, mut inbound: Inbound<String>, done: Done| async move {
//!         loop {
//!             tokio::select! {
//!                 msg = inbound.recv() => match msg {
//!                     Some(msg) => println!("received {msg}"),
//!                     None => break,
//!                 },
//!                 _ = done.wait() => break,
//!             }
//!         }
//!         StatusCode::OK
//!     },
//! ))
//! .with_options(Options::default().with_write_wait(Duration::from_secs(15)));
//!
//! fn route(socket: &Socket<Text>, req: Request<Incoming>) -> HttpResponse {
//!     socket.handle(req)
//! }
//! ```
//!
//! # Termination
//! A connection stops on the first of:
//! - the peer closing the stream or the stream failing to read,
//! - a write failing or overrunning its deadline,
//! - the handler submitting a close code through [`Disconnect`],
//! - the handler returning,
//! - the hosting server cancelling the [`Socket`]'s shutdown token.
//!
//! The handler's [`Done`] fires once, the connection is closed once, and the handler's status
//! is reported together with the [`CloseReason`].

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Emits a log record only if `$level` passes the connection's configured `log_level`.
macro_rules! log_at {
    ($config:expr, $level:expr, $($arg:tt)+) => {{
        let level: log::Level = $level;
        if level <= $config.log_level {
            log::log!(level, $($arg)+);
        }
    }};
}

pub mod channel;
pub mod close;
pub mod codec;
pub mod frame;
pub mod guard;
pub mod options;
pub mod session;

mod connection;
mod handler;
mod upgrade;

use thiserror::Error;
use tokio_tungstenite::tungstenite;

pub use channel::{Disconnect, Done, Errors, Inbound, Outbound};
pub use connection::{Connection, Transport};
pub use handler::{Exchange, Handler, RequestContext, Socket};
pub use options::{Config, Options};
pub use session::{CloseReason, SessionReport, State};
#[cfg(feature = "axum")]
pub use upgrade::IncomingUpgrade;
pub use upgrade::HttpResponse;

/// A result type for connection operations, using `WebSocketError` as the error type.
pub type Result<T> = std::result::Result<T, WebSocketError>;

/// Errors raised by the handshake and by the connection transport.
///
/// Handshake variants are mapped to `400 Bad Request` before any pump starts. Transport
/// variants are fatal for the connection they occur on and end it with the matching
/// [`CloseReason`].
#[derive(Error, Debug)]
pub enum WebSocketError {
    /// Returned when attempting to perform operations on a closed WebSocket connection.
    /// Once a connection is closed, no further communication is possible.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// No pong arrived within the configured pong wait.
    #[error("Read timed out")]
    ReadTimeout,

    /// A frame could not be written within the configured write wait.
    #[error("Write timed out")]
    WriteTimeout,

    /// Indicates that the HTTP "Upgrade" header is either missing or does not contain
    /// the required "websocket" value during connection handshake.
    #[error("Invalid upgrade header")]
    InvalidUpgradeHeader,

    /// Indicates that the HTTP "Connection" header is either missing or does not contain
    /// the required "upgrade" value during connection handshake.
    #[error("Invalid connection header")]
    InvalidConnectionHeader,

    /// Returned when the "Sec-WebSocket-Version" header is not set to 13 during handshake.
    /// RFC 6455 requires version 13 for modern WebSocket connections.
    #[error("Sec-Websocket-Version must be 13")]
    InvalidSecWebsocketVersion,

    /// Occurs during handshake when the required "Sec-WebSocket-Key" header is missing from
    /// the client request.
    #[error("Sec-WebSocket-Key header is missing")]
    MissingSecWebSocketKey,

    /// The request carries no upgrade handle, e.g. it was not served by a hyper connection
    /// with upgrades enabled.
    #[error("Request cannot be upgraded")]
    NotUpgradable,

    /// The upgrade response could not be built.
    #[error(transparent)]
    Http(#[from] hyper::http::Error),

    /// Wraps protocol errors from the WebSocket library: malformed frames, oversized
    /// messages, invalid UTF-8 in text frames.
    #[error(transparent)]
    Protocol(#[from] tungstenite::Error),

    /// Wraps standard I/O errors that may occur during WebSocket communication,
    /// such as connection resets or network timeouts.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Wraps errors from the hyper HTTP library that may occur during the WebSocket
    /// handshake process or connection upgrade.
    #[error(transparent)]
    HTTPError(#[from] hyper::Error),
}
