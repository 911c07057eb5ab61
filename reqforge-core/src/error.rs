//! Error types for the request engine.
//!
//! Every fallible operation in `reqforge-core` returns [`Result<T>`], an alias
//! over [`Error`]. Registration failures and arena integrity failures have
//! their own enums ([`RouteError`] and [`ArenaError`]) so callers can match on
//! them precisely; both convert into [`Error`] through `?`.
//!
//! Errors never cross a connection boundary. The pipeline turns handler and
//! middleware errors into a `500` response, and the server turns I/O errors on
//! one socket into a closed connection without touching any other state.
//!
//! # Examples
//!
//! ```
//! use reqforge_core::{Error, Result};
//!
//! fn parse_port(raw: &str) -> Result<u16> {
//!     raw.parse::<u16>()
//!         .map_err(|e| Error::custom(format!("invalid port {raw}: {e}")))
//! }
//!
//! assert!(parse_port("8081").is_ok());
//! assert!(parse_port("http").is_err());
//! ```

use std::fmt;
use thiserror::Error;

pub use crate::ipc::ArenaError;
pub use crate::router::RouteError;

/// The main error type for the request engine.
#[derive(Debug, Error)]
pub enum Error {
    /// Socket or filesystem failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Route registration was rejected.
    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    /// The message arena rejected an allocation or a read.
    #[error("Arena error: {0}")]
    Arena(#[from] ArenaError),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A payload exceeded what the wire format can carry.
    #[error("Payload too large: {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Largest size accepted.
        limit: usize,
    },

    /// The WebSocket stream failed or the peer broke the protocol.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No live connection has the given id.
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// A handler, middleware or plugin hook failed.
    #[error("Handler error: {0}")]
    Handler(String),

    /// Anything else.
    #[error("Custom error: {0}")]
    Custom(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates an [`Error::Custom`] from any displayable message.
    pub fn custom<T: fmt::Display>(msg: T) -> Self {
        Error::Custom(msg.to_string())
    }

    /// Creates an [`Error::Handler`] from any displayable message.
    pub fn handler<T: fmt::Display>(msg: T) -> Self {
        Error::Handler(msg.to_string())
    }

    /// Creates an [`Error::Config`] from any displayable message.
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_error() {
        let err = Error::custom("test error");
        assert!(matches!(err, Error::Custom(_)));
        assert_eq!(err.to_string(), "Custom error: test error");
    }

    #[test]
    fn test_handler_error() {
        let err = Error::handler("handler failed");
        assert!(matches!(err, Error::Handler(_)));
        assert_eq!(err.to_string(), "Handler error: handler failed");
    }

    #[test]
    fn test_payload_too_large_display() {
        let err = Error::PayloadTooLarge {
            size: 70_000,
            limit: 65_535,
        };
        assert_eq!(
            err.to_string(),
            "Payload too large: 70000 bytes exceeds the 65535 byte limit"
        );
    }

    #[test]
    fn test_error_from_route_error() {
        let err: Error = RouteError::CapacityExhausted { capacity: 4 }.into();
        assert!(matches!(
            err,
            Error::Route(RouteError::CapacityExhausted { capacity: 4 })
        ));
    }

    #[test]
    fn test_error_from_arena_error() {
        let err: Error = ArenaError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(matches!(err, Error::Arena(_)));
    }

    #[test]
    fn test_error_from_websocket() {
        let err: Error = tokio_tungstenite::tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(err, Error::WebSocket(_)));
        assert_eq!(err.to_string(), "WebSocket error: Connection closed normally");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err = Error::from(json_err);
        assert!(matches!(err, Error::Json(_)));
    }
}
