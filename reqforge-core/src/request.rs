//! The request handed to middleware, plugins and handlers.
//!
//! A [`Request`] is built by the server from a parsed HTTP head (or from an
//! inbound WebSocket message) and is owned by the pipeline for the duration
//! of one dispatch. Path parameters are empty until the router matched.
//!
//! # Examples
//!
//! ```
//! use reqforge_core::request::Request;
//! use http::Method;
//!
//! let req = Request::new(Method::GET, "/search?q=rust+web&page=2")
//!     .with_header("Accept", "application/json");
//!
//! assert_eq!(req.path(), "/search");
//! assert_eq!(req.query_param("q").as_deref(), Some("rust web"));
//! assert_eq!(req.header("accept"), Some("application/json"));
//! ```

use crate::connection::ConnectionId;
use crate::error::Result;
use crate::headers::Headers;
use crate::router::PathParams;
use crate::state::AppState;
use bytes::Bytes;
use http::Method;
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// Plain HTTP/1.1 request.
    #[default]
    Http,
    /// Message received on an upgraded WebSocket connection.
    WebSocket,
}

/// Timing data recorded for one request.
#[derive(Debug, Clone, Copy)]
pub struct RequestMetrics {
    /// When the request entered the pipeline.
    pub started_at: Instant,
    /// Server-wide sequence number, starting at 1.
    pub sequence: u64,
}

impl Default for RequestMetrics {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            sequence: 0,
        }
    }
}

/// An inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    body: Bytes,
    headers: Headers,
    params: PathParams,
    protocol: Protocol,
    trace_id: String,
    metrics: RequestMetrics,
    peer_addr: Option<SocketAddr>,
    connection_id: Option<ConnectionId>,
    route: Option<String>,
    state: AppState,
}

impl Request {
    /// Creates a request for `target`, which may carry a `?query` suffix.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        Self {
            method,
            path: path.to_string(),
            query,
            body: Bytes::new(),
            headers: Headers::new(),
            params: PathParams::new(),
            protocol: Protocol::Http,
            trace_id: String::new(),
            metrics: RequestMetrics::default(),
            peer_addr: None,
            connection_id: None,
            route: None,
            state: AppState::new(),
        }
    }

    /// Sets a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Replaces all headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Sets the transport tag.
    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// Sets the peer address.
    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Sets the id of the connection the request arrived on.
    pub fn with_connection_id(mut self, id: impl Into<ConnectionId>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    /// Sets the shared application state.
    pub fn with_state(mut self, state: AppState) -> Self {
        self.state = state;
        self
    }

    /// Request method. WebSocket messages use the custom `WS` method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the first value of query parameter `name`, percent-decoded.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query.as_deref()?.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(key) == name).then(|| decode_component(value))
        })
    }

    /// Looks up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// All request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the value captured for path parameter `name`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// All captured path parameters.
    pub fn params(&self) -> &PathParams {
        &self.params
    }

    /// Raw body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body as UTF-8, if valid.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Transport the request arrived on.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Trace id, empty when tracing is disabled.
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Timing data.
    pub fn metrics(&self) -> &RequestMetrics {
        &self.metrics
    }

    /// Peer socket address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Id of the connection the request arrived on.
    pub fn connection_id(&self) -> Option<&str> {
        self.connection_id.as_deref()
    }

    /// Pattern of the matched route, e.g. `/users/:id`.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Returns the shared value of type `T`, if the server holds one.
    pub fn state<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.state.get::<T>()
    }

    pub(crate) fn set_trace_id(&mut self, trace_id: String) {
        self.trace_id = trace_id;
    }

    pub(crate) fn set_metrics(&mut self, metrics: RequestMetrics) {
        self.metrics = metrics;
    }

    pub(crate) fn set_route(&mut self, pattern: String, params: PathParams) {
        self.route = Some(pattern);
        self.params = params;
    }
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode_str(&spaced).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_target_split() {
        let req = Request::new(Method::GET, "/items?sort=asc");
        assert_eq!(req.path(), "/items");
        assert_eq!(req.query(), Some("sort=asc"));

        let req = Request::new(Method::GET, "/items");
        assert_eq!(req.query(), None);
        assert_eq!(req.query_param("sort"), None);
    }

    #[test]
    fn test_query_param_decoding() {
        let req = Request::new(Method::GET, "/s?name=J%C3%BCrgen&tag=a+b&flag&tag=c");
        assert_eq!(req.query_param("name").as_deref(), Some("Jürgen"));
        assert_eq!(req.query_param("tag").as_deref(), Some("a b"));
        assert_eq!(req.query_param("flag").as_deref(), Some(""));
        assert_eq!(req.query_param("missing"), None);
    }

    #[test]
    fn test_body_helpers() {
        #[derive(Deserialize)]
        struct Login {
            user: String,
        }

        let req = Request::new(Method::POST, "/login").with_body(r#"{"user":"ada"}"#);
        assert_eq!(req.body_str(), Some(r#"{"user":"ada"}"#));
        let login: Login = req.json().unwrap();
        assert_eq!(login.user, "ada");

        let bad = Request::new(Method::POST, "/login").with_body("not json");
        assert!(bad.json::<Login>().is_err());
    }

    #[test]
    fn test_params_set_by_router() {
        let mut params = PathParams::new();
        params.push("id", "7");

        let mut req = Request::new(Method::GET, "/users/7");
        assert_eq!(req.param("id"), None);
        req.set_route("/users/:id".to_string(), params);
        assert_eq!(req.param("id"), Some("7"));
        assert_eq!(req.route(), Some("/users/:id"));
    }

    #[test]
    fn test_state_lookup() {
        let state = AppState::new();
        state.insert(Arc::new(5_i32));
        let req = Request::new(Method::GET, "/").with_state(state);
        assert_eq!(*req.state::<i32>().unwrap(), 5);
    }
}
