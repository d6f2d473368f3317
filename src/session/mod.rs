//! # Session
//!
//! The per-connection engine. A session owns the connection for its whole lifetime:
//!
//! 1. the connection is split, the [read pump](read) and the [write pump](write) are spawned
//!    on their halves;
//! 2. the handler runs in the session's own task with its endpoints;
//! 3. the first termination trigger moves the [`State`] from `Active` to `Closing` and fires
//!    [`Done`](crate::Done);
//! 4. once both pumps returned, the halves are joined again, a close frame is sent if
//!    none went out yet and the stream can still take one, and the connection is closed;
//! 5. the state becomes `Closed` and the handler's status is reported.
//!
//! Only the session closes the connection, and only once.
use std::{future::Future, sync::Arc};

use futures::{SinkExt, StreamExt};
use hyper::StatusCode;
use log::Level;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{self, Disconnect},
    codec::Codec,
    connection::Transport,
    frame::FrameView,
    handler::{Exchange, Handler, RequestContext},
    options::Config,
};

pub(crate) mod lifecycle;
mod read;
mod write;

pub use lifecycle::{CloseReason, State};

use lifecycle::Lifecycle;
use read::ReadPump;
use write::{WritePump, Written};

/// Outcome of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// Status returned by the handler. Informational: the upgrade response went out long ago.
    pub status: StatusCode,
    /// The trigger that ended the connection.
    pub reason: CloseReason,
}

pub(crate) struct Session<C: Codec> {
    pub codec: Arc<C>,
    pub config: Arc<Config>,
    pub handler: Handler<C::Item>,
    pub context: RequestContext,
    pub shutdown: CancellationToken,
}

impl<C: Codec> Session<C> {
    pub async fn run<T: Transport>(self, conn: T) -> SessionReport {
        let lifecycle = Arc::new(Lifecycle::new());
        let config = self.config.clone();

        let (to_handler, inbound) = channel::queue(config.recv_queue_capacity);
        let (outbound, from_handler) = channel::queue(config.send_queue_capacity);
        let (errors_tx, errors) = channel::errors();

        let (sink, stream) = conn.split();

        log_at!(config, Level::Debug, "{} connected", self.context.uri);

        let reader = tokio::spawn(
            ReadPump {
                stream,
                codec: self.codec.clone(),
                inbound: to_handler,
                errors: errors_tx,
                lifecycle: lifecycle.clone(),
                config: config.clone(),
            }
            .run(),
        );

        let writer = tokio::spawn(
            WritePump {
                sink,
                codec: self.codec.clone(),
                outbound: from_handler,
                lifecycle: lifecycle.clone(),
                config: config.clone(),
            }
            .run(),
        );

        let exchange = Exchange {
            inbound,
            outbound,
            done: lifecycle.done(),
            disconnect: Disconnect::new(lifecycle.clone()),
            errors,
        };
        let mut handler = self.handler.call(self.context.clone(), exchange);

        let status = tokio::select! {
            status = &mut handler => status,
            _ = self.shutdown.cancelled() => {
                log_at!(config, Level::Debug, "{} cancelled by the server", self.context.uri);
                lifecycle.trigger(CloseReason::Cancelled);
                handler.await
            }
        };
        lifecycle.trigger(CloseReason::HandlerReturned);

        let reason = lifecycle.reason().unwrap_or(CloseReason::HandlerReturned);
        log_at!(
            config,
            Level::Debug,
            "{} closing ({reason:?})",
            self.context.uri
        );

        match (reader.await, writer.await) {
            (Ok(stream), Ok(Written { sink, close_sent })) => match stream.reunite(sink) {
                Ok(conn) => close(conn, reason, close_sent, &config).await,
                Err(err) => log_at!(config, Level::Error, "cannot rejoin connection: {err}"),
            },
            (Err(err), _) | (_, Err(err)) => {
                log_at!(config, Level::Error, "connection task failed: {err}")
            }
        }

        lifecycle.mark_closed();

        SessionReport { status, reason }
    }
}

/// Sends the close frame the reason calls for, unless one already went out, then closes
/// the connection.
async fn close<T: Transport>(mut conn: T, reason: CloseReason, close_sent: bool, config: &Config) {
    if !close_sent {
        if let Some(code) = reason.close_code() {
            let frame = FrameView::close(code, "");
            if let Err(err) = within(config, conn.send(frame)).await {
                log_at!(config, Level::Debug, "close frame not sent: {err}");
            }
        }
    }

    if let Err(err) = within(config, conn.close()).await {
        log_at!(config, Level::Debug, "close failed: {err}");
    }
}

async fn within<F>(config: &Config, fut: F) -> crate::Result<()>
where
    F: Future<Output = crate::Result<()>>,
{
    time::timeout(config.write_wait, fut)
        .await
        .unwrap_or(Err(crate::WebSocketError::WriteTimeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{close::CloseCode, codec::Text, connection::Connection, Done, Inbound};
    use futures::SinkExt;
    use std::time::Duration;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::{
        tungstenite::{protocol::Role, Message},
        WebSocketStream,
    };

    async fn connect(
        config: &Config,
    ) -> (Connection<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server, client) = tokio::io::duplex(64 * 1024);
        let server = Connection::server(server, config).await;
        let client = WebSocketStream::from_raw_socket(client, Role::Client, None).await;
        (server, client)
    }

    fn context() -> RequestContext {
        RequestContext {
            method: hyper::Method::GET,
            uri: hyper::Uri::from_static("/test"),
            headers: hyper::HeaderMap::new(),
        }
    }

    fn session(handler: Handler<String>, config: Config) -> Session<Text> {
        Session {
            codec: Arc::new(Text),
            config: Arc::new(config),
            handler,
            context: context(),
            shutdown: CancellationToken::new(),
        }
    }

    async fn collect(inbound: &mut Inbound<String>, done: &Done) -> Vec<String> {
        let mut received = Vec::new();
        loop {
            tokio::select! {
                biased;
                msg = inbound.recv() => match msg {
                    Some(msg) => received.push(msg),
                    None => break,
                },
                _ = done.wait() => break,
            }
        }
        received
    }

    #[tokio::test]
    async fn test_receive_until_peer_closes() {
        let config = Config::default();
        let (server, mut client) = connect(&config).await;

        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        let seen_tx = std::sync::Mutex::new(Some(seen_tx));
        let handler = Handler::receiver(move |_ctx, mut inbound: Inbound<String>, done| {
            let seen_tx = seen_tx.lock().unwrap().take();
            async move {
                let received = collect(&mut inbound, &done).await;
                if let Some(tx) = seen_tx {
                    let _ = tx.send(received);
                }
                StatusCode::OK
            }
        });

        let task = tokio::spawn(session(handler, config).run(server));

        for _ in 0..3 {
            client.send(Message::text("Hello World")).await.unwrap();
        }
        client.close(None).await.unwrap();

        let report = task.await.unwrap();
        assert_eq!(report.status, StatusCode::OK);
        assert_eq!(report.reason, CloseReason::PeerClosed);
        assert_eq!(seen_rx.await.unwrap(), vec!["Hello World"; 3]);
    }

    /// Sends "Hello World" every millisecond and disconnects with `Away` after 4ms.
    fn bomber(wait_for_done: bool) -> Handler<String> {
        Handler::sender(move |_ctx, outbound, done, disconnect| async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(1));
            let bomb = tokio::time::sleep(Duration::from_millis(4));
            tokio::pin!(bomb);
            loop {
                tokio::select! {
                    _ = done.wait() => break,
                    _ = &mut bomb => {
                        disconnect.disconnect(CloseCode::Away);
                        if wait_for_done {
                            done.wait().await;
                        }
                        break;
                    }
                    _ = ticker.tick() => {
                        let _ = outbound.send("Hello World".to_string()).await;
                    }
                }
            }
            StatusCode::OK
        })
    }

    /// Counts text messages until the close frame. Returns the count and the close code.
    async fn texts_until_close(
        client: &mut WebSocketStream<DuplexStream>,
    ) -> (usize, Option<u16>) {
        let mut texts = 0;
        while let Some(Ok(message)) = client.next().await {
            match message {
                Message::Text(text) => {
                    assert_eq!(text.as_str(), "Hello World");
                    texts += 1;
                }
                Message::Close(frame) => return (texts, frame.map(|f| u16::from(f.code))),
                _ => {}
            }
        }
        (texts, None)
    }

    #[tokio::test]
    async fn test_disconnect_sends_requested_code() {
        let config = Config::default();
        let (server, mut client) = connect(&config).await;

        let task = tokio::spawn(session(bomber(true), config).run(server));

        let (texts, close_code) = texts_until_close(&mut client).await;

        let report = task.await.unwrap();
        assert!(texts >= 3, "got {texts} messages");
        assert_eq!(close_code, Some(1001));
        assert_eq!(report.reason, CloseReason::Disconnect(CloseCode::Away));
    }

    #[tokio::test]
    async fn test_disconnect_then_return_keeps_requested_code() {
        let config = Config::default();
        let (server, mut client) = connect(&config).await;

        let task = tokio::spawn(session(bomber(false), config).run(server));

        let (texts, close_code) = texts_until_close(&mut client).await;

        let report = task.await.unwrap();
        assert!(texts >= 3, "got {texts} messages");
        assert_eq!(close_code, Some(1001));
        assert_eq!(report.status, StatusCode::OK);
        assert_eq!(report.reason, CloseReason::Disconnect(CloseCode::Away));
    }

    fn keepalive_config() -> Config {
        Config {
            ping_period: Duration::from_millis(20),
            pong_wait: Duration::from_millis(40),
            ..Config::default()
        }
    }

    fn idle() -> Handler<String> {
        Handler::receiver(|_ctx, _inbound: Inbound<String>, done: Done| async move {
            done.wait().await;
            StatusCode::OK
        })
    }

    #[tokio::test]
    async fn test_reading_peer_stays_connected() {
        let config = keepalive_config();
        let (server, mut client) = connect(&config).await;

        let shutdown = CancellationToken::new();
        let mut session = session(idle(), config);
        session.shutdown = shutdown.clone();
        let task = tokio::spawn(session.run(server));

        // reading lets the client answer every ping
        let reader = tokio::spawn(async move {
            while let Some(Ok(_)) = client.next().await {}
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!task.is_finished());

        shutdown.cancel();
        let report = task.await.unwrap();
        assert_eq!(report.reason, CloseReason::Cancelled);
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let config = keepalive_config();
        let (server, _client) = connect(&config).await;

        let report = session(idle(), config).run(server).await;
        assert_eq!(report.reason, CloseReason::ReadTimeout);
    }

    #[tokio::test]
    async fn test_handler_return_closes_normally() {
        let config = Config::default();
        let (server, mut client) = connect(&config).await;

        let handler: Handler<String> =
            Handler::sender(|_ctx, outbound, _done, _disconnect| async move {
                let _ = outbound.send("bye".to_string()).await;
                tokio::time::sleep(Duration::from_millis(10)).await;
                StatusCode::ACCEPTED
            });

        let report = session(handler, config).run(server).await;
        assert_eq!(report.status, StatusCode::ACCEPTED);
        assert_eq!(report.reason, CloseReason::HandlerReturned);

        assert_eq!(client.next().await.unwrap().unwrap(), Message::text("bye"));
        match client.next().await.unwrap().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1000),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_fires_done() {
        let config = Config::default();
        let (server, mut client) = connect(&config).await;

        let shutdown = CancellationToken::new();
        let handler = Handler::receiver(|_ctx, _inbound: Inbound<String>, done| async move {
            done.wait().await;
            StatusCode::OK
        });
        let mut session = session(handler, config);
        session.shutdown = shutdown.clone();

        let task = tokio::spawn(session.run(server));
        shutdown.cancel();

        let report = task.await.unwrap();
        assert_eq!(report.reason, CloseReason::Cancelled);
        match client.next().await.unwrap().unwrap() {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1000),
            other => panic!("expected close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_duplex_echo() {
        let config = Config::default();
        let (server, mut client) = connect(&config).await;

        let handler = Handler::duplex(|_ctx, mut exchange: Exchange<String>| async move {
            while let Some(msg) = exchange.inbound.recv().await {
                if exchange.outbound.send(msg).await.is_err() {
                    break;
                }
            }
            StatusCode::OK
        });

        let task = tokio::spawn(session(handler, config).run(server));

        client.send(Message::text("one")).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap(), Message::text("one"));
        client.send(Message::text("two")).await.unwrap();
        assert_eq!(client.next().await.unwrap().unwrap(), Message::text("two"));
        client.close(None).await.unwrap();

        let report = task.await.unwrap();
        assert_eq!(report.reason, CloseReason::PeerClosed);
    }
}
