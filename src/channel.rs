//! # Channels
//!
//! The endpoints a handler receives for one connection.
//!
//! - [`Inbound`]: values decoded by the read pump, in the order the peer sent them.
//! - [`Outbound`]: values for the write pump to encode and send, in the order they were queued.
//! - [`Done`]: fires once when the exchange is over.
//! - [`Disconnect`]: asks for a graceful close carrying a specific close code.
//! - [`Errors`]: per-message decode failures.
//!
//! Both queues are bounded. A full queue makes the producer wait and never drops a value.
//! A capacity of `0` turns a queue into a synchronous hand-off: [`Outbound::send`] returns
//! only once the consumer has taken the value.
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::Stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{close::CloseCode, codec::CodecError, session::lifecycle::Lifecycle};

pub use tokio::sync::mpsc::error::SendError;

/// Creates a bounded queue holding up to `capacity` values.
///
/// `capacity == 0` creates a synchronous hand-off.
pub fn queue<T>(capacity: usize) -> (Outbound<T>, Inbound<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Outbound {
            tx,
            handoff: capacity == 0,
        },
        Inbound { rx },
    )
}

/// Sending side of a queue.
#[derive(Debug)]
pub struct Outbound<T> {
    tx: mpsc::Sender<T>,
    handoff: bool,
}

impl<T> Clone for Outbound<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            handoff: self.handoff,
        }
    }
}

impl<T> Outbound<T> {
    /// Queues a value, waiting while the queue is full.
    ///
    /// # Errors
    /// Returns the value back when the receiving side is gone, which happens once the
    /// connection is over.
    pub async fn send(&self, value: T) -> Result<(), SendError<T>> {
        self.tx.send(value).await?;
        if self.handoff {
            // the single slot frees up once the consumer took the value
            let _ = self.tx.reserve().await;
        }
        Ok(())
    }

    /// Returns `true` once the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving side of a queue.
#[derive(Debug)]
pub struct Inbound<T> {
    rx: mpsc::Receiver<T>,
}

impl<T> Inbound<T> {
    /// Receives the next value.
    ///
    /// Returns `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Closes the queue without dropping the values already in it.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl<T> Stream for Inbound<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.rx.poll_recv(cx)
    }
}

/// One-shot completion signal.
///
/// Every clone observes the same signal. Once fired it stays fired.
#[derive(Debug, Clone, Default)]
pub struct Done {
    token: CancellationToken,
}

impl Done {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fire(&self) {
        self.token.cancel();
    }

    /// Waits until the exchange is over. Returns immediately if it already is.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    /// Returns `true` once the exchange is over.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Handle to request a graceful close with a specific code.
#[derive(Clone)]
pub struct Disconnect {
    lifecycle: Arc<Lifecycle>,
}

impl std::fmt::Debug for Disconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disconnect")
            .field("state", &self.lifecycle.state())
            .finish()
    }
}

impl Disconnect {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Asks the write pump to send a close frame carrying `code` and end the connection.
    ///
    /// Returns `true` if the request was accepted. It is refused, with no effect, when the
    /// connection is already ending, when a previous request was accepted, or when `code`
    /// may not be sent on the wire (see [`CloseCode::is_allowed`]).
    pub fn disconnect(&self, code: CloseCode) -> bool {
        self.lifecycle.disconnect(code)
    }
}

/// Per-message decode failures observed by the read pump.
///
/// Errors are reported best effort: when nobody drains this channel and it fills up, newer
/// errors are only logged.
#[derive(Debug)]
pub struct Errors {
    rx: mpsc::Receiver<CodecError>,
}

pub(crate) const ERRORS_CAPACITY: usize = 16;

pub(crate) fn errors() -> (mpsc::Sender<CodecError>, Errors) {
    let (tx, rx) = mpsc::channel(ERRORS_CAPACITY);
    (tx, Errors { rx })
}

impl Errors {
    /// Receives the next decode error, or `None` once the connection is over.
    pub async fn recv(&mut self) -> Option<CodecError> {
        self.rx.recv().await
    }
}

impl Stream for Errors {
    type Item = CodecError;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<CodecError>> {
        self.rx.poll_recv(cx)
    }
}
