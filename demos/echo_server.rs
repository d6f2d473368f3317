//! A WebSocket echo server built on wsbridge and hyper.
//! Every text message a client sends is echoed back until the client goes away.

use std::convert::Infallible;

use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request, StatusCode};
use tokio::net::TcpListener;
use wsbridge::{Exchange, Handler, Options, Socket};

/// Echoes inbound messages back to the peer until either side ends the exchange.
async fn echo(mut exchange: Exchange<String>) -> StatusCode {
    loop {
        tokio::select! {
            _ = exchange.done.wait() => break,
            msg = exchange.inbound.recv() => {
                let Some(msg) = msg else { break };
                if exchange.outbound.send(msg).await.is_err() {
                    break;
                }
            }
            Some(err) = exchange.errors.recv() => {
                log::warn!("Client sent a malformed message: {}", err);
            }
        }
    }

    StatusCode::OK
}

/// Main entry point for the WebSocket server.
///
/// Initializes logging and starts listening for WebSocket connections on port 8080.
/// Each HTTP connection is served on its own task; upgraded connections get their own
/// session task from [`Socket::handle`].
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    simple_logger::init_with_level(log::Level::Debug)?;

    let socket = Socket::text(Handler::duplex(|_ctx, exchange| echo(exchange)))
        .with_options(Options::default().with_max_message_size(1024 * 1024));

    let listener = TcpListener::bind("0.0.0.0:8080").await?;
    log::debug!("Listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        log::info!("Client connected from {peer}");

        let socket = socket.clone();
        tokio::spawn(async move {
            let io = hyper_util::rt::TokioIo::new(stream);
            let service = service_fn(move |req: Request<Incoming>| {
                let response = socket.handle(req);
                async move { Ok::<_, Infallible>(response) }
            });

            let conn_fut = http1::Builder::new()
                .serve_connection(io, service)
                .with_upgrades();
            if let Err(e) = conn_fut.await {
                log::error!("An error occurred: {:?}", e);
            }
        });
    }
}
