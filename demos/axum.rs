// A chat-like ticker served through axum: every client gets a JSON tick every second and
// the server logs whatever JSON the client sends back.
use std::{sync::Arc, time::Duration};

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use hyper::StatusCode;
use serde::{Deserialize, Serialize};
use wsbridge::{Exchange, Handler, IncomingUpgrade, Options, RequestContext, Socket};

#[derive(Debug, Serialize, Deserialize)]
struct Tick {
    seq: u64,
    text: String,
}

// Drives one connection: ticks out, anything the client sends is logged
async fn ticker(ctx: RequestContext, mut exchange: Exchange<Tick>) -> StatusCode {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    let mut seq = 0;

    loop {
        tokio::select! {
            _ = exchange.done.wait() => break,
            _ = interval.tick() => {
                seq += 1;
                let tick = Tick { seq, text: "Hello World".to_string() };
                if exchange.outbound.send(tick).await.is_err() {
                    break;
                }
            }
            Some(tick) = exchange.inbound.recv() => {
                println!("{} sent {:?}", ctx.uri, tick);
            }
            Some(err) = exchange.errors.recv() => {
                eprintln!("{} sent invalid JSON: {}", ctx.uri, err);
            }
        }
    }

    StatusCode::OK
}

// Handler for upgrading HTTP connections to websocket connections
async fn ws_handler(
    State(socket): State<Arc<Socket<wsbridge::codec::Json<Tick>>>>,
    ws: IncomingUpgrade,
) -> impl IntoResponse {
    socket.accept(ws)
}

// Main entry point using tokio async runtime
#[tokio::main]
async fn main() {
    let socket = Socket::json(Handler::duplex(ticker)).with_options(
        Options::default()
            .with_allowed_origin(r"^https?://(localhost|127\.0\.0\.1)(:\d+)?$")
            .with_ping_period(Duration::from_secs(20)),
    );

    // Create a new router that handles websocket connections at the root path
    let app = Router::new()
        .route("/", get(ws_handler))
        .with_state(Arc::new(socket));

    // Bind TCP listener to all interfaces on port 3000
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
