//! Adapter between the protocol library's message stream and [`FrameView`]s.
use std::{
    pin::Pin,
    task::{ready, Context, Poll},
};

use futures::{Sink, Stream};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{
    tungstenite::{
        self,
        protocol::{CloseFrame, Role, WebSocketConfig},
        Message, Utf8Bytes,
    },
    WebSocketStream,
};

use crate::{
    close::CloseCode,
    frame::{FrameView, OpCode},
    options::Config,
    Result, WebSocketError,
};

/// A duplex frame transport the session engine can drive.
///
/// Implemented by [`Connection`]; any other type with the same shape works too, which
/// lets the engine run over in-memory pipes.
pub trait Transport:
    Stream<Item = Result<FrameView>>
    + Sink<FrameView, Error = WebSocketError>
    + Unpin
    + Send
    + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<FrameView>>
        + Sink<FrameView, Error = WebSocketError>
        + Unpin
        + Send
        + 'static
{
}

/// A server side WebSocket connection over `S`, exchanging whole [`FrameView`]s.
///
/// Pings from the peer are answered and close frames are echoed by the protocol library;
/// they are still surfaced so the caller can observe them.
pub struct Connection<S> {
    inner: WebSocketStream<S>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps an already upgraded stream. Inbound messages larger than
    /// `config.max_message_size` fail the read side.
    pub async fn server(io: S, config: &Config) -> Self {
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(config.max_message_size))
            .max_frame_size(Some(config.max_message_size));

        Self {
            inner: WebSocketStream::from_raw_socket(io, Role::Server, Some(ws_config)).await,
        }
    }

    /// Wraps a stream that already speaks WebSocket.
    pub fn from_stream(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> WebSocketStream<S> {
        self.inner
    }
}

fn into_frame(message: Message) -> Option<FrameView> {
    match message {
        Message::Text(text) => Some(FrameView::text(bytes::Bytes::from(text))),
        Message::Binary(payload) => Some(FrameView::binary(payload)),
        Message::Ping(payload) => Some(FrameView::ping(payload)),
        Message::Pong(payload) => Some(FrameView::pong(payload)),
        Message::Close(Some(frame)) => Some(FrameView::close(
            CloseCode::from(u16::from(frame.code)),
            frame.reason,
        )),
        Message::Close(None) => Some(FrameView::close_empty()),
        // raw frames are never produced while reading
        Message::Frame(_) => None,
    }
}

fn into_message(frame: FrameView) -> Result<Message> {
    Ok(match frame.opcode {
        OpCode::Text => Message::Text(text(frame.payload)?),
        OpCode::Binary => Message::Binary(frame.payload),
        OpCode::Ping => Message::Ping(frame.payload),
        OpCode::Pong => Message::Pong(frame.payload),
        OpCode::Close => match frame.close_code() {
            Some(code) => Message::Close(Some(CloseFrame {
                code: u16::from(code).into(),
                reason: text(frame.payload.slice(2..))?,
            })),
            None => Message::Close(None),
        },
    })
}

fn text(payload: bytes::Bytes) -> Result<Utf8Bytes> {
    Ok(Utf8Bytes::try_from(payload).map_err(tungstenite::Error::from)?)
}

impl<S> Stream for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<FrameView>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let message = match ready!(Pin::new(&mut self.inner).poll_next(cx)) {
                Some(Ok(message)) => message,
                Some(Err(err)) => return Poll::Ready(Some(Err(err.into()))),
                None => return Poll::Ready(None),
            };

            if let Some(frame) = into_frame(message) {
                return Poll::Ready(Some(Ok(frame)));
            }
        }
    }
}

impl<S> Sink<FrameView> for Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = WebSocketError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner).poll_ready(cx).map_err(Into::into)
    }

    fn start_send(mut self: Pin<&mut Self>, frame: FrameView) -> Result<()> {
        let message = into_message(frame)?;
        Pin::new(&mut self.inner)
            .start_send(message)
            .map_err(Into::into)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx).map_err(Into::into)
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.inner).poll_close(cx).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio::io::DuplexStream;

    async fn pair() -> (Connection<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let config = Config {
            max_message_size: 16,
            ..Config::default()
        };
        let server = Connection::server(server, &config).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (server, client)
    }

    #[tokio::test]
    async fn test_data_frames() {
        let (mut server, mut client) = pair().await;

        client.send(Message::text("Hello World")).await.unwrap();
        client.send(Message::binary(vec![1u8, 2, 3])).await.unwrap();

        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame, FrameView::text("Hello World"));
        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame, FrameView::binary(vec![1u8, 2, 3]));

        server.send(FrameView::text("pong?")).await.unwrap();
        assert_eq!(
            client.next().await.unwrap().unwrap(),
            Message::text("pong?")
        );
    }

    #[tokio::test]
    async fn test_close_frame_carries_code() {
        let (mut server, mut client) = pair().await;

        server
            .send(FrameView::close(CloseCode::Away, "bye"))
            .await
            .unwrap();

        match client.next().await.unwrap().unwrap() {
            Message::Close(Some(frame)) => {
                assert_eq!(u16::from(frame.code), 1001);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_peer_close_is_surfaced() {
        let (mut server, mut client) = pair().await;

        client.close(None).await.unwrap();

        let frame = server.next().await.unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Close);
        assert_eq!(frame.close_code(), None);
    }

    #[tokio::test]
    async fn test_oversized_message_fails_read() {
        let (mut server, mut client) = pair().await;

        client.send(Message::binary(vec![0u8; 64])).await.unwrap();
        assert!(server.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_invalid_utf8_text_is_rejected() {
        let (mut server, _client) = pair().await;
        let err = server
            .send(FrameView::text(vec![0xffu8, 0xfe]))
            .await
            .unwrap_err();
        assert!(matches!(err, WebSocketError::Protocol(_)));
    }
}
