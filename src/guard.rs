//! Pre-handshake request checks.
//!
//! Runs before any upgrade is attempted: a rejected request never reaches the handshake
//! and never starts a connection.
use hyper::{header, HeaderMap, Method, StatusCode, Uri};
use regex::Regex;
use thiserror::Error;

use crate::WebSocketError;

/// Reason a request was refused before the connection started.
#[derive(Error, Debug)]
pub enum Rejection {
    /// Only `GET` requests can be upgraded.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// The `Origin` header failed the configured origin policy.
    #[error("forbidden")]
    Forbidden,

    /// The request passed the guard but is not a valid upgrade request.
    #[error("bad request: {0}")]
    BadRequest(#[from] WebSocketError),
}

impl Rejection {
    /// HTTP status reported to the client for this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Rejection::Forbidden => StatusCode::FORBIDDEN,
            Rejection::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// Checks the request method and its `Origin` header.
///
/// - Anything but `GET` is rejected with [`Rejection::MethodNotAllowed`].
/// - A request without `Origin` is accepted, it does not come from a browser.
/// - With an `allowed_origin` pattern, the origin is accepted iff the pattern matches it.
/// - Without a pattern, the origin is accepted iff its host equals the request's host.
pub fn check(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    allowed_origin: Option<&Regex>,
) -> Result<(), Rejection> {
    if *method != Method::GET {
        return Err(Rejection::MethodNotAllowed);
    }

    let Some(origin) = headers.get(header::ORIGIN) else {
        return Ok(());
    };
    let origin = origin.to_str().map_err(|_| Rejection::Forbidden)?;

    let allowed = match allowed_origin {
        Some(pattern) => pattern.is_match(origin),
        None => match (origin_host(origin), request_host(uri, headers)) {
            (Some(origin), Some(host)) => origin.eq_ignore_ascii_case(host),
            _ => false,
        },
    };

    if allowed {
        Ok(())
    } else {
        Err(Rejection::Forbidden)
    }
}

/// `host[:port]` of an origin such as `http://localhost:4000`, the port kept as written.
fn origin_host(origin: &str) -> Option<String> {
    let uri = origin.parse::<Uri>().ok()?;
    uri.scheme()?;
    let authority = uri.authority()?;
    Some(match authority.port() {
        Some(port) => format!("{}:{}", authority.host(), port.as_str()),
        None => authority.host().to_string(),
    })
}

fn request_host<'a>(uri: &'a Uri, headers: &'a HeaderMap) -> Option<&'a str> {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_rejects_non_get() {
        let uri = Uri::from_static("/test");
        let err = check(&Method::POST, &uri, &HeaderMap::new(), None).unwrap_err();
        assert!(matches!(err, Rejection::MethodNotAllowed));
        assert_eq!(err.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[test]
    fn test_accepts_missing_origin() {
        let uri = Uri::from_static("/test");
        assert!(check(&Method::GET, &uri, &HeaderMap::new(), None).is_ok());
    }

    #[test]
    fn test_same_host_origin() {
        let uri = Uri::from_static("/test");
        let map = headers(&[
            (header::HOST, "localhost:4000"),
            (header::ORIGIN, "http://localhost:4000"),
        ]);
        assert!(check(&Method::GET, &uri, &map, None).is_ok());
    }

    #[test]
    fn test_foreign_origin_is_forbidden() {
        let uri = Uri::from_static("/test");
        let map = headers(&[
            (header::HOST, "localhost:4000"),
            (header::ORIGIN, "http://somewhere.com"),
        ]);
        let err = check(&Method::GET, &uri, &map, None).unwrap_err();
        assert!(matches!(err, Rejection::Forbidden));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);

        // no host to compare against
        let map = headers(&[(header::ORIGIN, "http://somewhere.com")]);
        assert!(check(&Method::GET, &uri, &map, None).is_err());
    }

    #[test]
    fn test_same_host_origin_with_explicit_default_port() {
        let uri = Uri::from_static("/test");
        let map = headers(&[
            (header::HOST, "example.com:80"),
            (header::ORIGIN, "http://example.com:80"),
        ]);
        assert!(check(&Method::GET, &uri, &map, None).is_ok());

        // ports are compared as written
        let map = headers(&[
            (header::HOST, "example.com"),
            (header::ORIGIN, "http://example.com:80"),
        ]);
        assert!(matches!(
            check(&Method::GET, &uri, &map, None),
            Err(Rejection::Forbidden)
        ));
    }

    #[test]
    fn test_origin_with_credentials_compares_host_only() {
        let uri = Uri::from_static("/test");
        let map = headers(&[
            (header::HOST, "localhost:4000"),
            (header::ORIGIN, "http://user@localhost:4000"),
        ]);
        assert!(check(&Method::GET, &uri, &map, None).is_ok());
    }

    #[test]
    fn test_origin_host_falls_back_to_uri_authority() {
        let uri = Uri::from_static("http://example.com:8080/ws");
        let map = headers(&[(header::ORIGIN, "https://example.com:8080")]);
        assert!(check(&Method::GET, &uri, &map, None).is_ok());
    }

    #[test]
    fn test_allowed_origin_pattern() {
        let uri = Uri::from_static("/test");
        let pattern = Regex::new(r"https?://allowed\.com$").unwrap();

        let map = headers(&[(header::ORIGIN, "http://allowed.com")]);
        assert!(check(&Method::GET, &uri, &map, Some(&pattern)).is_ok());

        let map = headers(&[(header::ORIGIN, "http://allowed.com.evil.net")]);
        assert!(matches!(
            check(&Method::GET, &uri, &map, Some(&pattern)),
            Err(Rejection::Forbidden)
        ));
    }

    #[test]
    fn test_bad_request_status() {
        let err = Rejection::from(WebSocketError::MissingSecWebSocketKey);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
