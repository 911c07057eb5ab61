//! The response a handler fills in.
//!
//! A [`Response`] accumulates status, headers and body until the pipeline
//! frames it. Calling [`Response::end`] latches `headers_sent`: from then on
//! every mutator is a no-op that returns `false`, and the pipeline skips all
//! remaining stages and transmits exactly what is there.
//!
//! # Examples
//!
//! ```
//! use reqforge_core::response::Response;
//!
//! let mut res = Response::new();
//! res.send_error(404, "No such user");
//! assert_eq!(res.status(), 404);
//! assert_eq!(res.header("content-type"), Some("application/json"));
//!
//! res.end();
//! assert!(!res.set_status(200));
//! assert_eq!(res.status(), 404);
//! ```

use crate::connection::ConnectionId;
use crate::error::Result;
use crate::framer::compression::Compression;
use crate::headers::Headers;
use crate::request::Protocol;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::Path;

/// Largest file [`Response::send_file`] will load, unless overridden.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// An outbound response.
#[derive(Debug, Clone)]
pub struct Response {
    status: u16,
    body: Vec<u8>,
    headers: Headers,
    protocol: Protocol,
    compression: Compression,
    headers_sent: bool,
    connection_id: Option<ConnectionId>,
    max_file_size: u64,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    /// An empty `200` response.
    pub fn new() -> Self {
        Self {
            status: 200,
            body: Vec::new(),
            headers: Headers::new(),
            protocol: Protocol::Http,
            compression: Compression::None,
            headers_sent: false,
            connection_id: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }

    pub(crate) fn for_protocol(protocol: Protocol) -> Self {
        Self {
            protocol,
            ..Self::new()
        }
    }

    pub(crate) fn with_connection_id(mut self, id: impl Into<ConnectionId>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    pub(crate) fn with_max_file_size(mut self, limit: u64) -> Self {
        self.max_file_size = limit;
        self
    }

    /// Status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Body bytes written so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// All headers in insertion order.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Transport the response will be framed for.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Selected body compression.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Id of the connection the response goes out on.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Returns `true` once [`end`](Self::end) was called.
    pub fn is_headers_sent(&self) -> bool {
        self.headers_sent
    }

    /// Sets the status code.
    pub fn set_status(&mut self, status: u16) -> bool {
        if self.headers_sent {
            return false;
        }
        self.status = status;
        true
    }

    /// Sets a header, replacing an existing value of the same name.
    ///
    /// Returns `false` without changing anything if the response ended or if
    /// `name` or `value` is not a valid HTTP header token (for example a
    /// value containing CR or LF).
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> bool {
        if self.headers_sent {
            return false;
        }
        let (name, value) = (name.into(), value.into());
        if http::HeaderName::from_bytes(name.as_bytes()).is_err()
            || http::HeaderValue::from_str(&value).is_err()
        {
            tracing::warn!("Rejected invalid response header {:?}", name);
            return false;
        }
        self.headers.set(name, value);
        true
    }

    /// Returns `true` if a header named `name` is set.
    pub fn has_header(&self, name: &str) -> bool {
        self.headers.contains(name)
    }

    /// Removes a header. Returns `false` if it was absent or the response ended.
    pub fn remove_header(&mut self, name: &str) -> bool {
        if self.headers_sent {
            return false;
        }
        self.headers.remove(name).is_some()
    }

    /// Appends bytes to the body.
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> bool {
        if self.headers_sent {
            return false;
        }
        self.body.extend_from_slice(data.as_ref());
        true
    }

    /// Replaces the body.
    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) -> bool {
        if self.headers_sent {
            return false;
        }
        self.body = body.into();
        true
    }

    /// Replaces the body with plain text. The status is left unchanged.
    pub fn send_text(&mut self, text: impl Into<String>) -> bool {
        if self.headers_sent {
            return false;
        }
        if !self.headers.contains("content-type") {
            self.headers.set("Content-Type", "text/plain; charset=utf-8");
        }
        self.body = text.into().into_bytes();
        true
    }

    /// Sends a pre-serialized JSON document with status `200`.
    pub fn send_json(&mut self, json: impl Into<String>) -> bool {
        self.send_json_with_status(200, json.into().into_bytes())
    }

    /// Serializes `value` and sends it with status `200`.
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let body = serde_json::to_vec(value)?;
        self.send_json_with_status(200, body);
        Ok(())
    }

    /// Sends `{"error":{"code":..,"message":..}}` with status `code`.
    pub fn send_error(&mut self, code: u16, message: &str) -> bool {
        let body = serde_json::json!({
            "error": {
                "code": code,
                "message": message,
            }
        });
        self.send_json_with_status(code, body.to_string().into_bytes())
    }

    fn send_json_with_status(&mut self, status: u16, body: Vec<u8>) -> bool {
        if self.headers_sent {
            return false;
        }
        self.status = status;
        self.headers.set("Content-Type", "application/json");
        self.body = body;
        true
    }

    /// Loads the file at `path` into the body.
    ///
    /// Returns `true` on success. Otherwise the response already carries the
    /// matching error: `404` when the file is missing or not a regular file,
    /// `413` when it exceeds the size limit (nothing is read), and `500` on
    /// any other I/O failure.
    pub async fn send_file(&mut self, path: impl AsRef<Path>) -> bool {
        if self.headers_sent {
            return false;
        }
        let path = path.as_ref();

        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.send_error(404, "File not found");
                return false;
            }
            Err(e) => {
                tracing::warn!("Failed to stat {}: {}", path.display(), e);
                self.send_error(500, "Failed to read file");
                return false;
            }
        };

        if !metadata.is_file() {
            self.send_error(404, "File not found");
            return false;
        }

        if metadata.len() > self.max_file_size {
            tracing::debug!(
                "Refusing {} ({} bytes > {} byte limit)",
                path.display(),
                metadata.len(),
                self.max_file_size
            );
            self.send_error(413, "File too large");
            return false;
        }

        match tokio::fs::read(path).await {
            Ok(contents) => {
                self.status = 200;
                self.headers.set("Content-Type", content_type_for(path));
                self.body = contents;
                true
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", path.display(), e);
                self.send_error(500, "Failed to read file");
                false
            }
        }
    }

    /// Selects the body compression applied when the response is framed.
    pub fn set_compression(&mut self, compression: Compression) -> bool {
        if self.headers_sent {
            return false;
        }
        self.compression = compression;
        true
    }

    /// Latches `headers_sent`, freezing the response.
    ///
    /// Returns `false` if the response had already ended.
    pub fn end(&mut self) -> bool {
        !std::mem::replace(&mut self.headers_sent, true)
    }
}

/// Content type for a file, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}
