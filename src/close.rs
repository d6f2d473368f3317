//! # Close codes
//!
//! Status codes carried in the first two bytes of a close frame, as registered in
//! [RFC 6455 Section 7.4](https://datatracker.ietf.org/doc/html/rfc6455#section-7.4).
//!
//! A handler picks one of these when it asks for a graceful disconnect; every other
//! termination path of a connection uses [`CloseCode::Normal`].

/// Status code indicating why a WebSocket connection was closed.
///
/// Codes 1000-2999 are reserved for the protocol itself, 3000-3999 are registered with
/// IANA for libraries and frameworks, and 4000-4999 are free for private use by
/// applications.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: the purpose for which the connection was established has been fulfilled.
    Normal,
    /// 1001: an endpoint is going away, e.g. a server shutting down or a browser
    /// navigating away from a page.
    Away,
    /// 1002: the endpoint is terminating the connection due to a protocol error.
    Protocol,
    /// 1003: the endpoint received a type of data it cannot accept.
    Unsupported,
    /// 1005: no status code was present in the close frame. Never sent on the wire.
    Status,
    /// 1006: the connection was closed without a close frame. Never sent on the wire.
    Abnormal,
    /// 1007: the endpoint received data inconsistent with the message type.
    Invalid,
    /// 1008: the endpoint received a message that violates its policy.
    Policy,
    /// 1009: the endpoint received a message too big to process.
    Size,
    /// 1010: the client expected the server to negotiate an extension it did not.
    Extension,
    /// 1011: the server encountered an unexpected condition.
    Error,
    /// 1012: the service is restarting.
    Restart,
    /// 1013: the service is overloaded, the client should try again later.
    Again,
    /// 1015: the TLS handshake failed. Never sent on the wire.
    Tls,
    /// 1016-2999: reserved for future revisions of the protocol.
    Reserved(u16),
    /// 3000-3999: registered with IANA for use by libraries, frameworks and applications.
    Iana(u16),
    /// 4000-4999: available for private use.
    Library(u16),
    /// Any other value, which is invalid on the wire.
    Bad(u16),
}

impl CloseCode {
    /// Returns `true` if this code may legally appear in a close frame sent to a peer.
    pub fn is_allowed(self) -> bool {
        !matches!(
            self,
            CloseCode::Status
                | CloseCode::Abnormal
                | CloseCode::Tls
                | CloseCode::Reserved(_)
                | CloseCode::Bad(_)
        )
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseCode::Normal,
            1001 => CloseCode::Away,
            1002 => CloseCode::Protocol,
            1003 => CloseCode::Unsupported,
            1005 => CloseCode::Status,
            1006 => CloseCode::Abnormal,
            1007 => CloseCode::Invalid,
            1008 => CloseCode::Policy,
            1009 => CloseCode::Size,
            1010 => CloseCode::Extension,
            1011 => CloseCode::Error,
            1012 => CloseCode::Restart,
            1013 => CloseCode::Again,
            1015 => CloseCode::Tls,
            1016..=2999 => CloseCode::Reserved(code),
            3000..=3999 => CloseCode::Iana(code),
            4000..=4999 => CloseCode::Library(code),
            _ => CloseCode::Bad(code),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::Away => 1001,
            CloseCode::Protocol => 1002,
            CloseCode::Unsupported => 1003,
            CloseCode::Status => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::Invalid => 1007,
            CloseCode::Policy => 1008,
            CloseCode::Size => 1009,
            CloseCode::Extension => 1010,
            CloseCode::Error => 1011,
            CloseCode::Restart => 1012,
            CloseCode::Again => 1013,
            CloseCode::Tls => 1015,
            CloseCode::Reserved(code)
            | CloseCode::Iana(code)
            | CloseCode::Library(code)
            | CloseCode::Bad(code) => code,
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}
