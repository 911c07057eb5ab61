//! Wire encoding of finished responses.
//!
//! The framer turns a [`Response`] into the exact bytes written to the
//! socket. HTTP responses get a status line, the headers in the order they
//! were set, a computed `Content-Length` and the body:
//!
//! ```text
//! HTTP/1.1 404 Not Found\r\n
//! Content-Type: application/json\r\n
//! Content-Length: 45\r\n
//! \r\n
//! {"error":{"code":404,"message":"Not Found"}}
//! ```
//!
//! Responses produced on a WebSocket connection are sent as a single text
//! message built by [`websocket::text_message`] instead.

pub mod compression;
pub mod websocket;

use crate::response::Response;
use std::fmt::Write as _;

pub use compression::Compression;

/// Per-write framing options chosen by the connection loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameOptions {
    /// Adds `Connection: close`.
    pub close: bool,
    /// Omits the body but keeps its `Content-Length` (HEAD requests).
    pub omit_body: bool,
}

/// Reason phrase for `status`, or `Unknown`.
pub fn reason_phrase(status: u16) -> &'static str {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

/// Serializes `res` as an HTTP/1.1 response.
///
/// A user-supplied `Content-Length` is dropped in favor of the computed one.
/// When compression is selected and succeeds, the compressed body is sent
/// with a matching `Content-Encoding`; on failure the body goes out as-is.
pub fn encode_http(res: &Response, opts: FrameOptions) -> Vec<u8> {
    let compressed = res.compression().compress(res.body());
    let (body, encoding) = match &compressed {
        Some(bytes) => (bytes.as_slice(), res.compression().token()),
        None => (res.body(), None),
    };

    let mut head = String::with_capacity(128);
    let _ = write!(
        head,
        "HTTP/1.1 {} {}\r\n",
        res.status(),
        reason_phrase(res.status())
    );
    for (name, value) in res.headers().iter() {
        if name.eq_ignore_ascii_case("content-length")
            || (encoding.is_some() && name.eq_ignore_ascii_case("content-encoding"))
        {
            continue;
        }
        let _ = write!(head, "{name}: {value}\r\n");
    }
    if let Some(token) = encoding {
        let _ = write!(head, "Content-Encoding: {token}\r\n");
    }
    if opts.close {
        head.push_str("Connection: close\r\n");
    }
    let _ = write!(head, "Content-Length: {}\r\n\r\n", body.len());

    let mut out = head.into_bytes();
    if !opts.omit_body {
        out.extend_from_slice(body);
    }
    out
}
