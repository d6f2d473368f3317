//! # Codec
//!
//! Stateless conversion between a frame and the typed value a handler works with.
//! Exactly one codec is chosen per [`Socket`](crate::Socket) and it drives both directions
//! of every connection accepted on it.
//!
//! | Codec | Item | Encodes to | Decodes from |
//! |-------|------|------------|--------------|
//! | [`Json<T>`] | `T` | text frame | text or binary frame |
//! | [`Text`] | `String` | text frame | text frame, binary frame holding UTF-8 |
//! | [`Binary`] | `Bytes` | binary frame | text or binary frame |
//!
//! A decode failure concerns a single frame only. The read side reports it and keeps
//! reading.
use bytes::Bytes;
use thiserror::Error;

use crate::frame::{FrameView, OpCode};

/// Errors produced while encoding or decoding a single message.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The frame is not a data frame this codec can decode.
    #[error("Unexpected {0:?} frame")]
    UnexpectedFrame(OpCode),

    /// A binary frame handed to the text codec does not contain valid UTF-8.
    #[error("Invalid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The payload could not be serialized or parsed as JSON.
    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Converts between frames and application values.
pub trait Codec: Send + Sync + 'static {
    /// The value exchanged with the handler.
    type Item: Send + 'static;

    /// Turns a value produced by the handler into the frame to put on the wire.
    fn encode(&self, item: Self::Item) -> Result<FrameView, CodecError>;

    /// Turns a data frame received from the peer into a value for the handler.
    fn decode(&self, frame: FrameView) -> Result<Self::Item, CodecError>;
}

/// JSON codec: values are serialized to UTF-8 text frames.
#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
pub struct Json<T> {
    _marker: std::marker::PhantomData<fn() -> T>,
}

#[cfg(feature = "json")]
impl<T> Json<T> {
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

#[cfg(feature = "json")]
impl<T> Default for Json<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "json")]
impl<T> Codec for Json<T>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
{
    type Item = T;

    fn encode(&self, item: T) -> Result<FrameView, CodecError> {
        let bytes = serde_json::to_vec(&item)?;
        Ok(FrameView::text(bytes))
    }

    fn decode(&self, frame: FrameView) -> Result<T, CodecError> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => Ok(serde_json::from_slice(&frame.payload)?),
            opcode => Err(CodecError::UnexpectedFrame(opcode)),
        }
    }
}

/// Text codec: identity between a text frame body and a `String`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Text;

impl Codec for Text {
    type Item = String;

    fn encode(&self, item: String) -> Result<FrameView, CodecError> {
        Ok(FrameView::text(item))
    }

    fn decode(&self, frame: FrameView) -> Result<String, CodecError> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => Ok(String::from_utf8(frame.payload.to_vec())?),
            opcode => Err(CodecError::UnexpectedFrame(opcode)),
        }
    }
}

/// Binary codec: identity between a binary frame body and a byte buffer.
#[derive(Debug, Default, Clone, Copy)]
pub struct Binary;

impl Codec for Binary {
    type Item = Bytes;

    fn encode(&self, item: Bytes) -> Result<FrameView, CodecError> {
        Ok(FrameView::binary(item))
    }

    fn decode(&self, frame: FrameView) -> Result<Bytes, CodecError> {
        match frame.opcode {
            OpCode::Text | OpCode::Binary => Ok(frame.payload),
            opcode => Err(CodecError::UnexpectedFrame(opcode)),
        }
    }
}
