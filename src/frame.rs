//! # Frame
//!
//! Frames as the engine sees them: one complete data message (text or binary) or one
//! control frame (close, ping, pong). Fragmentation, masking and the byte-level header
//! format are handled by the protocol library underneath, so a [`FrameView`] is always a
//! whole message.
//!
//! ```rust
//! use wsbridge::frame::FrameView;
//! use wsbridge::close::CloseCode;
//!
//! let text = FrameView::text("Hello, WebSocket!");
//! let ping = FrameView::ping(bytes::Bytes::new());
//! let close = FrameView::close(CloseCode::Away, "bye");
//! assert_eq!(close.close_code(), Some(CloseCode::Away));
//! ```
use bytes::Bytes;

use crate::close::CloseCode;

/// Kind of frame carried over the connection.
///
/// # Data frames
/// - `Text`: UTF-8 encoded text
/// - `Binary`: raw bytes
///
/// # Control frames
/// - `Close`: starts or confirms the closing handshake
/// - `Ping`: liveness probe, the peer answers with a `Pong`
/// - `Pong`: answer to a `Ping`
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OpCode {
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    /// Returns `true` if the `OpCode` represents a control frame (`Close`, `Ping`, or `Pong`).
    pub fn is_control(&self) -> bool {
        matches!(*self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

/// A lightweight, immutable view of one frame: its opcode and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameView {
    /// The operation code indicating the type of frame (Text, Binary, Close, etc.)
    pub opcode: OpCode,
    /// The frame's payload data.
    pub payload: Bytes,
}

impl FrameView {
    /// Extracts the close code from a Close frame's payload.
    ///
    /// # Returns
    /// - `Some(CloseCode)` if the payload starts with a two byte status code
    /// - `None` if the payload is empty or too short to contain one
    pub fn close_code(&self) -> Option<CloseCode> {
        let bytes: [u8; 2] = self.payload.get(..2)?.try_into().ok()?;
        Some(CloseCode::from(u16::from_be_bytes(bytes)))
    }

    /// Extracts the close reason from a Close frame's payload.
    ///
    /// Returns `None` if there is no reason string or it is not valid UTF-8.
    pub fn close_reason(&self) -> Option<&str> {
        std::str::from_utf8(self.payload.get(2..)?).ok()
    }

    /// Creates a text frame with the given payload.
    pub fn text(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Text,
            payload: payload.into(),
        }
    }

    /// Creates a binary frame with the given payload.
    pub fn binary(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Binary,
            payload: payload.into(),
        }
    }

    /// Creates a close frame from a close code and a reason.
    pub fn close(code: CloseCode, reason: impl AsRef<[u8]>) -> Self {
        let code16 = u16::from(code);
        let reason: &[u8] = reason.as_ref();
        let mut payload = Vec::with_capacity(2 + reason.len());
        payload.extend_from_slice(&code16.to_be_bytes());
        payload.extend_from_slice(reason);

        Self {
            opcode: OpCode::Close,
            payload: payload.into(),
        }
    }

    /// Creates a close frame without a status code.
    pub fn close_empty() -> Self {
        Self {
            opcode: OpCode::Close,
            payload: Bytes::new(),
        }
    }

    /// Creates a ping frame with the given payload.
    pub fn ping(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Ping,
            payload: payload.into(),
        }
    }

    /// Creates a pong frame with the given payload.
    pub fn pong(payload: impl Into<Bytes>) -> Self {
        Self {
            opcode: OpCode::Pong,
            payload: payload.into(),
        }
    }
}
