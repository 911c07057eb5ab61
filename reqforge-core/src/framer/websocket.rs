//! WebSocket (RFC 6455) pieces owned by the server side of a connection.
//!
//! Frame parsing, unmasking, fragment reassembly and control frames are left
//! to `tokio-tungstenite`. This module covers what happens around it: the
//! `101` handshake written by the HTTP loop, the stream configuration that
//! caps inbound messages, and the outbound size gate.
//!
//! Outbound messages are never fragmented. Their payload is capped at
//! [`MAX_TEXT_PAYLOAD`] bytes, the largest size expressible with the 16-bit
//! extended length; anything bigger is rejected rather than split.

use crate::error::{Error, Result};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};

/// Largest payload an outbound frame may carry.
pub const MAX_TEXT_PAYLOAD: usize = 65_535;

/// Builds a text message, refusing payloads over [`MAX_TEXT_PAYLOAD`].
///
/// # Examples
///
/// ```
/// use reqforge_core::framer::websocket::text_message;
///
/// assert!(text_message("hi").unwrap().is_text());
/// assert!(text_message(&"x".repeat(70_000)).is_err());
/// ```
pub fn text_message(text: &str) -> Result<Message> {
    if text.len() > MAX_TEXT_PAYLOAD {
        return Err(Error::PayloadTooLarge {
            size: text.len(),
            limit: MAX_TEXT_PAYLOAD,
        });
    }
    Ok(Message::Text(text.to_string()))
}

/// A close message carrying `code` and no reason.
pub fn close_message(code: CloseCode) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: "".into(),
    }))
}

/// Stream settings for an upgraded connection. Frames and reassembled
/// messages over `max_message` bytes are refused by the reader.
pub fn stream_config(max_message: usize) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message);
    config.max_frame_size = Some(max_message);
    config
}

/// Computes `Sec-WebSocket-Accept` for a client key.
pub fn accept_key(client_key: &str) -> String {
    tungstenite::handshake::derive_accept_key(client_key.trim().as_bytes())
}

/// The `101 Switching Protocols` response completing an upgrade.
pub fn handshake_response(client_key: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        accept_key(client_key)
    )
    .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_message_limit() {
        assert_eq!(
            text_message(&"c".repeat(MAX_TEXT_PAYLOAD)).unwrap().len(),
            MAX_TEXT_PAYLOAD
        );
        let err = text_message(&"c".repeat(70_000)).unwrap_err();
        assert!(matches!(
            err,
            Error::PayloadTooLarge {
                size: 70_000,
                limit: MAX_TEXT_PAYLOAD
            }
        ));
    }

    #[test]
    fn test_close_message_code() {
        match close_message(CloseCode::Size) {
            Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1009),
            other => panic!("expected close, got {other:?}"),
        }
    }

    #[test]
    fn test_stream_config_caps_messages() {
        let config = stream_config(4096);
        assert_eq!(config.max_message_size, Some(4096));
        assert_eq!(config.max_frame_size, Some(4096));
    }

    #[test]
    fn test_accept_key_rfc_sample() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
        let response = String::from_utf8(handshake_response("dGhlIHNhbXBsZSBub25jZQ==")).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.ends_with("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n"));
    }
}
