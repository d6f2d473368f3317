//! Server side of the HTTP/1.1 upgrade handshake.
use std::future::IntoFuture;

use bytes::Bytes;
use futures::{future::BoxFuture, FutureExt};
use http_body_util::Empty;
use hyper::{
    header::{self, HeaderMap, HeaderName},
    upgrade::{OnUpgrade, Upgraded},
    Method, Request, Response, StatusCode, Uri,
};
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};

use crate::{connection::Connection, options::Config, Result, WebSocketError};

/// Type alias for HTTP responses used during WebSocket upgrade.
///
/// This alias represents the HTTP response sent back to clients during a WebSocket upgrade,
/// or the bare status a rejected request gets instead.
pub type HttpResponse = Response<Empty<Bytes>>;

/// The parts of a request the upgrade path looks at.
pub(crate) struct UpgradeRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub on_upgrade: Option<OnUpgrade>,
}

impl<B> From<Request<B>> for UpgradeRequest {
    fn from(request: Request<B>) -> Self {
        let (mut parts, _body) = request.into_parts();
        Self {
            on_upgrade: parts.extensions.remove::<OnUpgrade>(),
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
        }
    }
}

/// An upgrade request extracted by axum.
///
/// Available when the `axum` feature is enabled. Extraction never fails: method, origin and
/// handshake headers are checked by [`Socket::accept`](crate::Socket::accept), which answers
/// with the matching status.
///
/// # Example
/// ```rust,no_run
/// use axum::{extract::State, response::IntoResponse, routing::get, Router};
/// use hyper::StatusCode;
/// use std::sync::Arc;
/// use wsbridge::{codec::Text, Handler, IncomingUpgrade, Socket};
///
/// async fn ws_handler(
///     State(socket): State<Arc<Socket<Text>>>,
///     ws: IncomingUpgrade,
/// ) -> impl IntoResponse {
///     socket.accept(ws)
/// }
///
/// let socket = Socket::text(Handler::receiver(|_ctx, _inbound, done: wsbridge::Done| async move {
///     done.wait().await;
///     StatusCode::OK
/// }));
/// let app: Router = Router::new()
///     .route("/ws", get(ws_handler))
///     .with_state(Arc::new(socket));
/// ```
#[cfg_attr(docsrs, doc(cfg(feature = "axum")))]
#[cfg(feature = "axum")]
pub struct IncomingUpgrade {
    pub(crate) request: UpgradeRequest,
}

#[cfg_attr(docsrs, doc(cfg(feature = "axum")))]
#[cfg(feature = "axum")]
impl<S> axum_core::extract::FromRequestParts<S> for IncomingUpgrade
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(
        parts: &mut http::request::Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(Self {
            request: UpgradeRequest {
                method: parts.method.clone(),
                uri: parts.uri.clone(),
                headers: parts.headers.clone(),
                on_upgrade: parts.extensions.remove::<OnUpgrade>(),
            },
        })
    }
}

/// Resolves to the server side connection once the `101` response went out.
pub(crate) struct UpgradeFut {
    on_upgrade: OnUpgrade,
    config: std::sync::Arc<Config>,
}

impl IntoFuture for UpgradeFut {
    type Output = Result<Connection<TokioIo<Upgraded>>>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        async move {
            let upgraded = self.on_upgrade.await?;
            Ok(Connection::server(TokioIo::new(upgraded), &self.config).await)
        }
        .boxed()
    }
}

/// Validates the handshake headers and builds the `101 Switching Protocols` response.
///
/// # Errors
/// - [`WebSocketError::InvalidConnectionHeader`] if `Connection` lacks the `upgrade` token
/// - [`WebSocketError::InvalidUpgradeHeader`] if `Upgrade` lacks the `websocket` token
/// - [`WebSocketError::InvalidSecWebsocketVersion`] if the version is not 13
/// - [`WebSocketError::MissingSecWebSocketKey`] if the key is absent
/// - [`WebSocketError::NotUpgradable`] if hyper gave the request no upgrade handle
pub(crate) fn upgrade(
    request: UpgradeRequest,
    config: std::sync::Arc<Config>,
) -> Result<(HttpResponse, UpgradeFut)> {
    let headers = &request.headers;

    if !has_token(headers, header::CONNECTION, "upgrade") {
        return Err(WebSocketError::InvalidConnectionHeader);
    }

    if !has_token(headers, header::UPGRADE, "websocket") {
        return Err(WebSocketError::InvalidUpgradeHeader);
    }

    if headers
        .get(header::SEC_WEBSOCKET_VERSION)
        .map(|v| v.as_bytes())
        != Some(b"13")
    {
        return Err(WebSocketError::InvalidSecWebsocketVersion);
    }

    let key = headers
        .get(header::SEC_WEBSOCKET_KEY)
        .ok_or(WebSocketError::MissingSecWebSocketKey)?;
    let accept = sec_websocket_accept(key.as_bytes());

    let on_upgrade = request.on_upgrade.ok_or(WebSocketError::NotUpgradable)?;

    let response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::CONNECTION, "upgrade")
        .header(header::UPGRADE, "websocket")
        .header(header::SEC_WEBSOCKET_ACCEPT, accept)
        .body(Empty::new())?;

    Ok((response, UpgradeFut { on_upgrade, config }))
}

/// A body-less response carrying only `status`.
pub(crate) fn status_response(status: StatusCode) -> HttpResponse {
    let mut response = Response::new(Empty::new());
    *response.status_mut() = status;
    response
}

/// Returns `true` if any comma separated value of `name` equals `token`, ignoring case.
fn has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|value| value.trim().eq_ignore_ascii_case(token))
}

fn sec_websocket_accept(key: &[u8]) -> String {
    use base64::prelude::*;
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11"); // magic string
    let result = sha1.finalize();
    BASE64_STANDARD.encode(&result[..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> hyper::http::request::Builder {
        Request::builder()
            .uri("/ws")
            .header(header::HOST, "localhost")
            .header(header::CONNECTION, "keep-alive, Upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
    }

    #[test]
    fn test_accept_key() {
        // RFC 6455 section 1.3
        assert_eq!(
            sec_websocket_accept(b"dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_header_tokens() {
        let req = request().body(()).unwrap();
        assert!(has_token(req.headers(), header::CONNECTION, "upgrade"));
        assert!(!has_token(req.headers(), header::CONNECTION, "close"));
    }

    #[test]
    fn test_missing_headers() {
        let config = std::sync::Arc::new(Config::default());

        let req = Request::builder().uri("/ws").body(()).unwrap();
        let err = upgrade(req.into(), config.clone()).err().unwrap();
        assert!(matches!(err, WebSocketError::InvalidConnectionHeader));

        let mut req = UpgradeRequest::from(request().body(()).unwrap());
        req.headers
            .insert(header::SEC_WEBSOCKET_VERSION, "8".parse().unwrap());
        let err = upgrade(req, config.clone()).err().unwrap();
        assert!(matches!(err, WebSocketError::InvalidSecWebsocketVersion));

        let mut req = UpgradeRequest::from(request().body(()).unwrap());
        req.headers.remove(header::SEC_WEBSOCKET_KEY);
        let err = upgrade(req, config.clone()).err().unwrap();
        assert!(matches!(err, WebSocketError::MissingSecWebSocketKey));
    }

    #[test]
    fn test_valid_handshake_needs_upgrade_handle() {
        let config = std::sync::Arc::new(Config::default());
        let req = UpgradeRequest::from(request().body(()).unwrap());
        assert!(req.on_upgrade.is_none());

        let err = upgrade(req, config).err().unwrap();
        assert!(matches!(err, WebSocketError::NotUpgradable));
    }

    #[test]
    fn test_status_response() {
        let response = status_response(StatusCode::FORBIDDEN);
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
