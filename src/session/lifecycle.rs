//! Shutdown state shared by the pumps, the handler's endpoints and the coordinator.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    OnceLock,
};

use tokio::sync::Notify;

use crate::{channel::Done, close::CloseCode};

/// Where a connection is in its shutdown sequence.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    /// Both pumps running, queues open.
    Active,
    /// A termination trigger fired; pumps are finishing their current operation.
    Closing,
    /// Both pumps returned and the connection was closed.
    Closed,
}

/// The trigger that ended a connection. Only the first trigger is recorded.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or the stream ended.
    PeerClosed,
    /// Reading from the connection failed.
    ReadFailed,
    /// No pong arrived within the pong wait.
    ReadTimeout,
    /// A write failed or overran the write wait.
    WriteFailed,
    /// The handler asked for a graceful close with this code.
    Disconnect(CloseCode),
    /// The handler returned on its own.
    HandlerReturned,
    /// The hosting server cancelled the connection.
    Cancelled,
}

impl CloseReason {
    /// Close code to send to the peer, or `None` when the stream is already unusable.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            CloseReason::PeerClosed
            | CloseReason::ReadFailed
            | CloseReason::ReadTimeout
            | CloseReason::WriteFailed => None,
            CloseReason::Disconnect(code) => Some(*code),
            CloseReason::HandlerReturned | CloseReason::Cancelled => Some(CloseCode::Normal),
        }
    }
}

pub(crate) struct Lifecycle {
    reason: OnceLock<CloseReason>,
    closed: AtomicBool,
    done: Done,
    disconnect: Notify,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            reason: OnceLock::new(),
            closed: AtomicBool::new(false),
            done: Done::new(),
            disconnect: Notify::new(),
        }
    }

    pub fn done(&self) -> Done {
        self.done.clone()
    }

    pub fn reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }

    pub fn state(&self) -> State {
        if self.closed.load(Ordering::Acquire) {
            State::Closed
        } else if self.reason.get().is_some() {
            State::Closing
        } else {
            State::Active
        }
    }

    /// Records `reason` if nothing ended the connection yet. Returns `true` if it won.
    ///
    /// A disconnect request wakes the write pump, which sends the close frame and then fires
    /// `done`. Every other trigger fires `done` right away.
    pub fn trigger(&self, reason: CloseReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }

        match reason {
            CloseReason::Disconnect(_) => self.disconnect.notify_one(),
            _ => self.done.fire(),
        }
        true
    }

    pub fn disconnect(&self, code: CloseCode) -> bool {
        if !code.is_allowed() || self.done.is_done() {
            return false;
        }
        self.trigger(CloseReason::Disconnect(code))
    }

    /// Resolves with the requested code once a disconnect request won.
    pub async fn disconnect_requested(&self) -> CloseCode {
        loop {
            self.disconnect.notified().await;
            if let Some(CloseReason::Disconnect(code)) = self.reason() {
                return code;
            }
        }
    }

    /// Fires `done` if it has not fired yet, without recording a reason.
    pub fn finish(&self) {
        self.done.fire();
    }

    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
        self.done.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_trigger_wins() {
        let lifecycle = Lifecycle::new();
        assert_eq!(lifecycle.state(), State::Active);

        assert!(lifecycle.trigger(CloseReason::PeerClosed));
        assert!(!lifecycle.trigger(CloseReason::WriteFailed));
        assert!(!lifecycle.trigger(CloseReason::HandlerReturned));

        assert_eq!(lifecycle.reason(), Some(CloseReason::PeerClosed));
        assert_eq!(lifecycle.state(), State::Closing);
        assert!(lifecycle.done().is_done());

        lifecycle.mark_closed();
        assert_eq!(lifecycle.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_disconnect_defers_done_to_writer() {
        let lifecycle = Lifecycle::new();

        assert!(lifecycle.disconnect(CloseCode::Away));
        assert!(!lifecycle.done().is_done());
        assert_eq!(lifecycle.state(), State::Closing);

        // a second request and a late trigger are no-ops
        assert!(!lifecycle.disconnect(CloseCode::Normal));
        assert!(!lifecycle.trigger(CloseReason::HandlerReturned));

        assert_eq!(lifecycle.disconnect_requested().await, CloseCode::Away);
        lifecycle.finish();
        assert!(lifecycle.done().is_done());
    }

    #[test]
    fn test_disconnect_after_done_is_noop() {
        let lifecycle = Lifecycle::new();
        lifecycle.trigger(CloseReason::Cancelled);
        assert!(!lifecycle.disconnect(CloseCode::Away));
        assert_eq!(lifecycle.reason(), Some(CloseReason::Cancelled));
    }

    #[test]
    fn test_disconnect_rejects_reserved_codes() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.disconnect(CloseCode::Abnormal));
        assert_eq!(lifecycle.state(), State::Active);
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseReason::PeerClosed.close_code(), None);
        assert_eq!(CloseReason::WriteFailed.close_code(), None);
        assert_eq!(
            CloseReason::Disconnect(CloseCode::Away).close_code(),
            Some(CloseCode::Away)
        );
        assert_eq!(
            CloseReason::HandlerReturned.close_code(),
            Some(CloseCode::Normal)
        );
    }
}
