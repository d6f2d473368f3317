//! # Handler
//!
//! A [`Socket`] is one registered route: the codec, the configuration overrides and the
//! application handler. Each accepted request gets its own connection, queues and signals.
//!
//! The handler comes in three shapes, all driven by the same session engine:
//!
//! | Shape | Receives |
//! |-------|----------|
//! | [`Handler::receiver`] | context, [`Inbound`], [`Done`] |
//! | [`Handler::sender`] | context, [`Outbound`], [`Done`], [`Disconnect`] |
//! | [`Handler::duplex`] | context, [`Exchange`] with every endpoint |
//!
//! Endpoints a shape does not take are dropped: inbound values are then discarded after
//! decoding, and the write pump only sends pings.
use std::{future::Future, sync::Arc};

use futures::{future::BoxFuture, FutureExt};
use hyper::{HeaderMap, Method, Request, StatusCode, Uri};
use log::Level;
use tokio_util::sync::CancellationToken;

use crate::{
    channel::{Disconnect, Done, Errors, Inbound, Outbound},
    codec::{self, Codec},
    connection::Transport,
    guard::{self, Rejection},
    options::{Config, ConfigError, Options},
    session::{Session, SessionReport},
    upgrade::{self, HttpResponse, UpgradeRequest},
};

/// The request as seen before the upgrade.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

/// Every endpoint of one connection.
#[derive(Debug)]
pub struct Exchange<T> {
    pub inbound: Inbound<T>,
    pub outbound: Outbound<T>,
    pub done: Done,
    pub disconnect: Disconnect,
    pub errors: Errors,
}

type HandlerFuture = BoxFuture<'static, StatusCode>;

type ReceiverFn<T> = dyn Fn(RequestContext, Inbound<T>, Done) -> HandlerFuture + Send + Sync;

type SenderFn<T> =
    dyn Fn(RequestContext, Outbound<T>, Done, Disconnect) -> HandlerFuture + Send + Sync;

type DuplexFn<T> = dyn Fn(RequestContext, Exchange<T>) -> HandlerFuture + Send + Sync;

/// The application side of a connection.
pub enum Handler<T> {
    /// Consumes inbound values until the exchange is over.
    Receiver(Arc<ReceiverFn<T>>),
    /// Produces outbound values and may ask for a disconnect.
    Sender(Arc<SenderFn<T>>),
    /// Gets every endpoint, including the decode error channel.
    Duplex(Arc<DuplexFn<T>>),
}

impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        match self {
            Handler::Receiver(f) => Handler::Receiver(f.clone()),
            Handler::Sender(f) => Handler::Sender(f.clone()),
            Handler::Duplex(f) => Handler::Duplex(f.clone()),
        }
    }
}

impl<T: Send + 'static> Handler<T> {
    pub fn receiver<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestContext, Inbound<T>, Done) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StatusCode> + Send + 'static,
    {
        Handler::Receiver(Arc::new(
            move |ctx: RequestContext, inbound: Inbound<T>, done: Done| {
                f(ctx, inbound, done).boxed()
            },
        ))
    }

    pub fn sender<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestContext, Outbound<T>, Done, Disconnect) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StatusCode> + Send + 'static,
    {
        Handler::Sender(Arc::new(
            move |ctx: RequestContext, outbound: Outbound<T>, done: Done, disconnect: Disconnect| {
                f(ctx, outbound, done, disconnect).boxed()
            },
        ))
    }

    pub fn duplex<F, Fut>(f: F) -> Self
    where
        F: Fn(RequestContext, Exchange<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StatusCode> + Send + 'static,
    {
        Handler::Duplex(Arc::new(move |ctx: RequestContext, exchange: Exchange<T>| {
            f(ctx, exchange).boxed()
        }))
    }

    pub(crate) fn call(&self, ctx: RequestContext, exchange: Exchange<T>) -> HandlerFuture {
        match self {
            Handler::Receiver(f) => f(ctx, exchange.inbound, exchange.done),
            Handler::Sender(f) => f(ctx, exchange.outbound, exchange.done, exchange.disconnect),
            Handler::Duplex(f) => f(ctx, exchange),
        }
    }
}

/// A route that upgrades requests and runs `handler` on every accepted connection.
///
/// Cloning is cheap; every clone shares the codec and the handler.
pub struct Socket<C: Codec> {
    codec: Arc<C>,
    handler: Handler<C::Item>,
    options: Vec<Options>,
    shutdown: CancellationToken,
}

impl<C: Codec> Clone for Socket<C> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            handler: self.handler.clone(),
            options: self.options.clone(),
            shutdown: self.shutdown.clone(),
        }
    }
}

#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
impl<T> Socket<codec::Json<T>>
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static,
{
    /// A route exchanging `T` as JSON text frames.
    pub fn json(handler: Handler<T>) -> Self {
        Self::new(codec::Json::new(), handler)
    }
}

impl Socket<codec::Text> {
    /// A route exchanging strings as text frames.
    pub fn text(handler: Handler<String>) -> Self {
        Self::new(codec::Text, handler)
    }
}

impl Socket<codec::Binary> {
    /// A route exchanging raw bytes as binary frames.
    pub fn binary(handler: Handler<bytes::Bytes>) -> Self {
        Self::new(codec::Binary, handler)
    }
}

impl<C: Codec> Socket<C> {
    pub fn new(codec: C, handler: Handler<C::Item>) -> Self {
        Self {
            codec: Arc::new(codec),
            handler,
            options: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Appends a configuration override. Later overrides win field by field.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options.push(options);
        self
    }

    /// Ties every connection to `shutdown`: cancelling it ends them all, each handler
    /// observing its [`Done`] fire.
    pub fn with_shutdown(self, shutdown: CancellationToken) -> Self {
        Self { shutdown, ..self }
    }

    /// The configuration a connection accepted now would run with.
    pub fn config(&self) -> Result<Config, ConfigError> {
        Config::resolve(&self.options)
    }

    /// Answers an upgrade request.
    ///
    /// - `500 Internal Server Error` if the overrides do not resolve to a valid configuration
    /// - `405 Method Not Allowed` for anything but `GET`
    /// - `403 Forbidden` if the `Origin` header fails the origin policy
    /// - `400 Bad Request` if the handshake headers are invalid
    /// - `101 Switching Protocols` otherwise; the connection then runs on a spawned task
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle<B>(&self, request: Request<B>) -> HttpResponse {
        self.respond(UpgradeRequest::from(request))
    }

    /// Answers an upgrade request extracted by axum, like [`Socket::handle`].
    #[cfg(feature = "axum")]
    #[cfg_attr(docsrs, doc(cfg(feature = "axum")))]
    pub fn accept(&self, upgrade: crate::IncomingUpgrade) -> HttpResponse {
        self.respond(upgrade.request)
    }

    /// Runs the handler over an already established transport and waits for the
    /// connection to end.
    pub async fn serve<T: Transport>(
        &self,
        conn: T,
        context: RequestContext,
    ) -> Result<SessionReport, ConfigError> {
        let config = Arc::new(self.config()?);
        Ok(self.session(config, context).run(conn).await)
    }

    fn respond(&self, request: UpgradeRequest) -> HttpResponse {
        let config = match self.config() {
            Ok(config) => Arc::new(config),
            Err(err) => {
                log::error!("invalid socket configuration: {err}");
                return upgrade::status_response(StatusCode::INTERNAL_SERVER_ERROR);
            }
        };

        let uri = request.uri.clone();
        match self.upgrade(request, config.clone()) {
            Ok(response) => response,
            Err(rejection) => {
                log_at!(config, Level::Debug, "{uri} rejected: {rejection}");
                upgrade::status_response(rejection.status())
            }
        }
    }

    fn upgrade(
        &self,
        request: UpgradeRequest,
        config: Arc<Config>,
    ) -> Result<HttpResponse, Rejection> {
        guard::check(
            &request.method,
            &request.uri,
            &request.headers,
            config.allowed_origin.as_ref(),
        )?;

        let context = RequestContext {
            method: request.method.clone(),
            uri: request.uri.clone(),
            headers: request.headers.clone(),
        };

        let (response, fut) = upgrade::upgrade(request, config.clone())?;
        let session = self.session(config.clone(), context);

        tokio::spawn(async move {
            let uri = session.context.uri.clone();
            let conn = match fut.await {
                Ok(conn) => conn,
                Err(err) => {
                    log_at!(config, Level::Warn, "{uri} upgrade failed: {err}");
                    return;
                }
            };

            let report = session.run(conn).await;
            log_at!(
                config,
                Level::Info,
                "{uri} finished with status {} ({:?})",
                report.status,
                report.reason
            );
        });

        Ok(response)
    }

    fn session(&self, config: Arc<Config>, context: RequestContext) -> Session<C> {
        Session {
            codec: self.codec.clone(),
            config,
            handler: self.handler.clone(),
            context,
            shutdown: self.shutdown.clone(),
        }
    }
}
