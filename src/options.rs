//! # Options
//!
//! Per-connection configuration. A [`Socket`](crate::Socket) carries zero or more partial
//! [`Options`] records; when a connection is accepted they are folded left-to-right onto
//! the built-in defaults and validated into one immutable [`Config`].
//!
//! ```rust
//! use std::time::Duration;
//! use wsbridge::{Config, Options};
//!
//! let config = Config::resolve(&[
//!     Options::default().with_write_wait(Duration::from_secs(15)),
//!     Options::default().with_ping_period(Duration::from_secs(10)),
//! ])
//! .unwrap();
//!
//! assert_eq!(config.write_wait, Duration::from_secs(15));
//! assert!(config.pong_wait > config.ping_period);
//! ```
use std::time::Duration;

use log::LevelFilter;
use regex::Regex;
use thiserror::Error;

/// Default verbosity of the records emitted for a connection.
pub const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// Default time allowed to write one frame to the peer.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Default interval between keepalive pings. The derived pong wait is 60 seconds.
pub const DEFAULT_PING_PERIOD: Duration = Duration::from_secs(54);

/// Default maximum size of one inbound message, set to 64 KiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default capacity of the outbound queue.
pub const DEFAULT_SEND_QUEUE_CAPACITY: usize = 10;

/// Default capacity of the inbound queue.
pub const DEFAULT_RECV_QUEUE_CAPACITY: usize = 10;

/// Invariant violations found while resolving [`Options`] into a [`Config`].
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("write wait must be greater than zero")]
    NonPositiveWriteWait,

    #[error("ping period must be greater than zero")]
    NonPositivePingPeriod,

    /// The read deadline would expire before the next ping gets a chance to refresh it.
    #[error("pong wait ({pong_wait:?}) must be greater than the ping period ({ping_period:?})")]
    PongWaitTooShort {
        pong_wait: Duration,
        ping_period: Duration,
    },

    #[error("max message size must be greater than zero")]
    ZeroMaxMessageSize,

    #[error("invalid allowed origin pattern: {0}")]
    InvalidOriginPattern(#[from] regex::Error),
}

/// A partial configuration override.
///
/// Every field left as `None` falls through to the value accumulated so far, starting
/// from the built-in defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    /// Verbosity of the records emitted for a connection.
    ///
    /// Default: [`DEFAULT_LOG_LEVEL`]
    pub log_level: Option<LevelFilter>,

    /// Deadline for writing a single frame (data, ping or close). Overrunning it is fatal
    /// for the connection.
    ///
    /// Default: [`DEFAULT_WRITE_WAIT`]
    pub write_wait: Option<Duration>,

    /// Interval between keepalive pings.
    ///
    /// Default: [`DEFAULT_PING_PERIOD`]
    pub ping_period: Option<Duration>,

    /// How long the read side waits for a pong before giving up on the peer.
    ///
    /// Default: `ping_period * 10 / 9`
    pub pong_wait: Option<Duration>,

    /// Maximum size of one inbound message, in bytes. Larger messages terminate the
    /// connection.
    ///
    /// Default: [`DEFAULT_MAX_MESSAGE_SIZE`]
    pub max_message_size: Option<usize>,

    /// Capacity of the outbound queue. `0` makes every send a synchronous hand-off.
    ///
    /// Default: [`DEFAULT_SEND_QUEUE_CAPACITY`]
    pub send_queue_capacity: Option<usize>,

    /// Capacity of the inbound queue. `0` makes every delivery a synchronous hand-off.
    ///
    /// Default: [`DEFAULT_RECV_QUEUE_CAPACITY`]
    pub recv_queue_capacity: Option<usize>,

    /// Regular expression the `Origin` header must match. When unset, the origin's host
    /// must equal the request's own host.
    pub allowed_origin: Option<String>,
}

impl Options {
    /// Sets the verbosity of the records emitted for a connection.
    ///
    /// # Parameters
    /// - `level`: records above this level are skipped
    ///
    /// # Returns
    /// The updated `Options` instance.
    ///
    /// ```rust
    /// use wsbridge::Options;
    ///
    /// let options = Options::default().with_log_level(log::LevelFilter::Debug);
    /// ```
    pub fn with_log_level(self, level: LevelFilter) -> Self {
        Self {
            log_level: Some(level),
            ..self
        }
    }

    /// Sets the deadline for writing one frame to the peer.
    ///
    /// # Parameters
    /// - `wait`: must be greater than zero
    ///
    /// # Returns
    /// The updated `Options` instance.
    pub fn with_write_wait(self, wait: Duration) -> Self {
        Self {
            write_wait: Some(wait),
            ..self
        }
    }

    /// Sets the interval between keepalive pings.
    ///
    /// Unless [`Options::with_pong_wait`] is used too, the pong wait follows as
    /// `period * 10 / 9`.
    ///
    /// # Returns
    /// The updated `Options` instance.
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use wsbridge::Options;
    ///
    /// let options = Options::default().with_ping_period(Duration::from_secs(10));
    /// ```
    pub fn with_ping_period(self, period: Duration) -> Self {
        Self {
            ping_period: Some(period),
            ..self
        }
    }

    /// Sets the pong wait explicitly instead of deriving it from the ping period.
    pub fn with_pong_wait(self, wait: Duration) -> Self {
        Self {
            pong_wait: Some(wait),
            ..self
        }
    }

    /// Sets the maximum size of one inbound message, in bytes.
    ///
    /// A larger message is a read failure and ends the connection.
    ///
    /// # Returns
    /// The updated `Options` instance.
    pub fn with_max_message_size(self, size: usize) -> Self {
        Self {
            max_message_size: Some(size),
            ..self
        }
    }

    /// Sets how many outbound values may wait for the write pump.
    ///
    /// # Parameters
    /// - `capacity`: `0` makes every send wait until the write pump took the value
    ///
    /// # Returns
    /// The updated `Options` instance.
    pub fn with_send_queue_capacity(self, capacity: usize) -> Self {
        Self {
            send_queue_capacity: Some(capacity),
            ..self
        }
    }

    /// Sets how many decoded values may wait for the handler.
    ///
    /// # Parameters
    /// - `capacity`: `0` makes the read pump wait until the handler took each value
    ///
    /// # Returns
    /// The updated `Options` instance.
    pub fn with_recv_queue_capacity(self, capacity: usize) -> Self {
        Self {
            recv_queue_capacity: Some(capacity),
            ..self
        }
    }

    /// Restricts cross-origin requests to origins matching `pattern`.
    ///
    /// ```rust
    /// use wsbridge::Options;
    ///
    /// let options = Options::default().with_allowed_origin(r"https?://allowed\.com$");
    /// ```
    pub fn with_allowed_origin(self, pattern: impl Into<String>) -> Self {
        Self {
            allowed_origin: Some(pattern.into()),
            ..self
        }
    }

    /// Overlays `other` onto `self`: fields set in `other` win, the rest keep the value
    /// from `self`.
    pub fn merge(self, other: Options) -> Options {
        Options {
            log_level: other.log_level.or(self.log_level),
            write_wait: other.write_wait.or(self.write_wait),
            ping_period: other.ping_period.or(self.ping_period),
            pong_wait: other.pong_wait.or(self.pong_wait),
            max_message_size: other.max_message_size.or(self.max_message_size),
            send_queue_capacity: other.send_queue_capacity.or(self.send_queue_capacity),
            recv_queue_capacity: other.recv_queue_capacity.or(self.recv_queue_capacity),
            allowed_origin: other.allowed_origin.or(self.allowed_origin),
        }
    }
}

/// The effective configuration of one connection.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: LevelFilter,
    pub write_wait: Duration,
    pub ping_period: Duration,
    /// Always greater than `ping_period`.
    pub pong_wait: Duration,
    pub max_message_size: usize,
    pub send_queue_capacity: usize,
    pub recv_queue_capacity: usize,
    pub allowed_origin: Option<Regex>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL,
            write_wait: DEFAULT_WRITE_WAIT,
            ping_period: DEFAULT_PING_PERIOD,
            pong_wait: derive_pong_wait(DEFAULT_PING_PERIOD),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            send_queue_capacity: DEFAULT_SEND_QUEUE_CAPACITY,
            recv_queue_capacity: DEFAULT_RECV_QUEUE_CAPACITY,
            allowed_origin: None,
        }
    }
}

impl Config {
    /// Folds `overrides` left-to-right onto the defaults and validates the result.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] when the resolved values break an invariant. Values are
    /// never clamped.
    pub fn resolve(overrides: &[Options]) -> Result<Config, ConfigError> {
        let merged = overrides
            .iter()
            .cloned()
            .fold(Options::default(), Options::merge);

        Self::from_options(merged)
    }

    fn from_options(options: Options) -> Result<Config, ConfigError> {
        let defaults = Config::default();

        let ping_period = options.ping_period.unwrap_or(defaults.ping_period);
        let config = Config {
            log_level: options.log_level.unwrap_or(defaults.log_level),
            write_wait: options.write_wait.unwrap_or(defaults.write_wait),
            ping_period,
            pong_wait: options
                .pong_wait
                .unwrap_or_else(|| derive_pong_wait(ping_period)),
            max_message_size: options
                .max_message_size
                .unwrap_or(defaults.max_message_size),
            send_queue_capacity: options
                .send_queue_capacity
                .unwrap_or(defaults.send_queue_capacity),
            recv_queue_capacity: options
                .recv_queue_capacity
                .unwrap_or(defaults.recv_queue_capacity),
            allowed_origin: options
                .allowed_origin
                .as_deref()
                .map(Regex::new)
                .transpose()?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.write_wait.is_zero() {
            return Err(ConfigError::NonPositiveWriteWait);
        }
        if self.ping_period.is_zero() {
            return Err(ConfigError::NonPositivePingPeriod);
        }
        if self.pong_wait <= self.ping_period {
            return Err(ConfigError::PongWaitTooShort {
                pong_wait: self.pong_wait,
                ping_period: self.ping_period,
            });
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::ZeroMaxMessageSize);
        }
        Ok(())
    }
}

fn derive_pong_wait(ping_period: Duration) -> Duration {
    ping_period * 10 / 9
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::resolve(&[]).unwrap();

        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.write_wait, DEFAULT_WRITE_WAIT);
        assert_eq!(config.ping_period, DEFAULT_PING_PERIOD);
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.send_queue_capacity, DEFAULT_SEND_QUEUE_CAPACITY);
        assert_eq!(config.recv_queue_capacity, DEFAULT_RECV_QUEUE_CAPACITY);
        assert!(config.allowed_origin.is_none());
    }

    #[test]
    fn test_partial_override_keeps_defaults() {
        let config = Config::resolve(&[Options::default()
            .with_log_level(LevelFilter::Debug)
            .with_write_wait(Duration::from_secs(15))
            .with_ping_period(Duration::from_secs(10))])
        .unwrap();

        assert_eq!(config.log_level, LevelFilter::Debug);
        assert_eq!(config.ping_period, Duration::from_secs(10));
        assert_eq!(config.write_wait, Duration::from_secs(15));
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.send_queue_capacity, DEFAULT_SEND_QUEUE_CAPACITY);
        assert_eq!(config.recv_queue_capacity, DEFAULT_RECV_QUEUE_CAPACITY);
    }

    #[test]
    fn test_later_overrides_win() {
        let config = Config::resolve(&[
            Options::default()
                .with_send_queue_capacity(1)
                .with_recv_queue_capacity(2),
            Options::default().with_send_queue_capacity(0),
        ])
        .unwrap();

        assert_eq!(config.send_queue_capacity, 0);
        assert_eq!(config.recv_queue_capacity, 2);
    }

    #[test]
    fn test_merge_is_associative() {
        let a = Options::default()
            .with_write_wait(Duration::from_secs(1))
            .with_max_message_size(10);
        let b = Options::default()
            .with_write_wait(Duration::from_secs(2))
            .with_allowed_origin("x");
        let c = Options::default().with_max_message_size(30);

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.merge(b.merge(c));

        assert_eq!(left, right);
        assert_eq!(left.write_wait, Some(Duration::from_secs(2)));
        assert_eq!(left.max_message_size, Some(30));
        assert_eq!(left.allowed_origin.as_deref(), Some("x"));
    }

    #[test]
    fn test_pong_wait_follows_ping_period() {
        let config =
            Config::resolve(&[Options::default().with_ping_period(Duration::from_millis(900))])
                .unwrap();
        assert_eq!(config.pong_wait, Duration::from_millis(1000));
    }

    #[test]
    fn test_invariant_violations_are_reported() {
        let err = Config::resolve(&[Options::default().with_write_wait(Duration::ZERO)])
            .unwrap_err();
        assert!(matches!(err, ConfigError::NonPositiveWriteWait));

        let err = Config::resolve(&[Options::default()
            .with_ping_period(Duration::from_secs(10))
            .with_pong_wait(Duration::from_secs(10))])
        .unwrap_err();
        assert!(matches!(err, ConfigError::PongWaitTooShort { .. }));

        let err = Config::resolve(&[Options::default().with_ping_period(Duration::ZERO)])
            .unwrap_err();
        assert!(matches!(err, ConfigError::NonPositivePingPeriod));

        let err =
            Config::resolve(&[Options::default().with_max_message_size(0)]).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroMaxMessageSize));

        let err = Config::resolve(&[Options::default().with_allowed_origin("(")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOriginPattern(_)));
    }
}
