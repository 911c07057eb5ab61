//! Server builder and connection loop.
//!
//! [`Server`] collects routes, middleware and plugins, then hands them to a
//! Tokio accept loop. Each accepted socket runs on its own task: requests on
//! one connection are parsed, dispatched and answered strictly in order,
//! and a connection that asks to upgrade switches to the WebSocket loop.
//!
//! # Examples
//!
//! ```no_run
//! use reqforge_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     Server::new()
//!         .get("/", handler(|_req: &Request, res: &mut Response| {
//!             res.send_text("Hello, world!");
//!         }))
//!         .get("/users/:id", handler(|req: &Request, res: &mut Response| {
//!             let id = req.param("id").unwrap_or_default();
//!             res.send_json(format!(r#"{{"id":"{id}"}}"#));
//!         }))
//!         .ws("/echo", handler(|req: &Request, res: &mut Response| {
//!             res.write(req.body());
//!         }))
//!         .listen()
//!         .await
//! }
//! ```
//!
//! Registration mistakes do not panic. They are collected while the builder is
//! chained and [`Server::listen`] refuses to start if there were any.

use crate::config::ServerConfig;
use crate::connection::{Upgrade, handle_websocket};
use crate::context::{Protocols, ServerContext};
use crate::error::{Error, Result};
use crate::framer::websocket::handshake_response;
use crate::framer::{FrameOptions, encode_http};
use crate::handler::Handler;
use crate::headers::Headers;
use crate::middleware::Middleware;
use crate::pipeline;
use crate::plugin::{Plugin, RateLimitPlugin};
use crate::request::Request;
use crate::response::Response;
use crate::router::RateLimitConfig;
use crate::static_files::StaticFileHandler;
use bytes::{Buf, Bytes, BytesMut};
use http::Method;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Largest request head (request line plus headers) accepted.
const MAX_HEAD_SIZE: usize = 16 * 1024;
/// Most headers a request may carry.
const MAX_HEADERS: usize = 64;

/// Builder and entry point of a server.
pub struct Server {
    ctx: ServerContext,
    errors: Vec<Error>,
    rate_limiter: bool,
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl Server {
    /// A server with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// A server using `config`.
    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            ctx: ServerContext::new(config),
            errors: Vec::new(),
            rate_limiter: false,
        }
    }

    /// Registers `handler` for `method` at `path`.
    pub fn route(mut self, method: &str, path: &str, handler: Arc<dyn Handler>) -> Self {
        if let Err(e) = self.ctx.register(method, path, handler) {
            warn!("Route {} {} rejected: {}", method, path, e);
            self.errors.push(e.into());
        }
        self
    }

    /// Registers a `GET` route.
    pub fn get(self, path: &str, handler: Arc<dyn Handler>) -> Self {
        self.route("GET", path, handler)
    }

    /// Registers a `POST` route.
    pub fn post(self, path: &str, handler: Arc<dyn Handler>) -> Self {
        self.route("POST", path, handler)
    }

    /// Registers a `PUT` route.
    pub fn put(self, path: &str, handler: Arc<dyn Handler>) -> Self {
        self.route("PUT", path, handler)
    }

    /// Registers a `DELETE` route.
    pub fn delete(self, path: &str, handler: Arc<dyn Handler>) -> Self {
        self.route("DELETE", path, handler)
    }

    /// Registers a handler for WebSocket messages received on connections
    /// upgraded at `path`.
    pub fn ws(self, path: &str, handler: Arc<dyn Handler>) -> Self {
        self.route("WS", path, handler)
    }

    /// Rate-limits a registered route.
    ///
    /// The first call also installs the [`RateLimitPlugin`].
    pub fn rate_limit(mut self, path: &str, config: RateLimitConfig) -> Self {
        if !self.ctx.set_rate_limit(path, config) {
            warn!("Rate limit for unregistered route {}", path);
            self.errors
                .push(Error::custom(format!("no route registered at {path}")));
            return self;
        }
        if !self.rate_limiter {
            self.rate_limiter = true;
            return self.plugin(RateLimitPlugin::new());
        }
        self
    }

    /// Appends a middleware.
    pub fn layer(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.ctx.use_middleware(middleware);
        self
    }

    /// Registers a plugin.
    pub fn plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        if let Err(e) = self.ctx.register_plugin(plugin) {
            warn!("Plugin rejected: {}", e);
            self.errors.push(e);
        }
        self
    }

    /// Restricts the protocols the server accepts.
    pub fn protocols(mut self, protocols: Protocols) -> Self {
        self.ctx.enable_protocols(protocols);
        self
    }

    /// Serves unmatched GET and HEAD requests from `dir`.
    pub fn serve_static(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        self.ctx.set_static_files(StaticFileHandler::new(dir.clone()));
        self.ctx.config_mut().static_dir = Some(dir);
        self
    }

    /// Shares `value` with every handler through [`Request::state`].
    pub fn with_state<T: Send + Sync + 'static>(self, value: Arc<T>) -> Self {
        self.ctx.state().insert(value);
        self
    }

    /// The context being built.
    pub fn context(&self) -> &ServerContext {
        &self.ctx
    }

    /// Registration errors collected so far.
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    /// Binds the configured address and serves until the process exits.
    pub async fn listen(self) -> Result<()> {
        let addr: SocketAddr = self
            .ctx
            .config()
            .bind_address
            .parse()
            .map_err(|e| Error::config(format!("Invalid address: {}", e)))?;
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serves on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.serve_with_shutdown(listener, std::future::pending())
            .await
    }

    /// Serves on `listener` until `signal` completes.
    ///
    /// Connections already accepted keep running on their own tasks.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let ctx = self.start().await?;
        if let Ok(addr) = listener.local_addr() {
            info!("Server listening on {}", addr);
        }

        tokio::pin!(signal);
        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = ctx.clone();
                        tokio::spawn(handle_connection(ctx, stream, peer));
                    }
                    Err(e) => error!("Accept failed: {}", e),
                },
            }
        }
        Ok(())
    }

    async fn start(mut self) -> Result<Arc<ServerContext>> {
        if !self.errors.is_empty() {
            for e in &self.errors {
                error!("Registration failed: {}", e);
            }
            return Err(self.errors.swap_remove(0));
        }
        self.ctx.plugins().init_all(&self.ctx).await?;
        info!(
            "Starting with {} routes, {} middleware, plugins {:?}",
            self.ctx.routes().len(),
            self.ctx.middleware().len(),
            self.ctx.plugins().names()
        );
        Ok(Arc::new(self.ctx))
    }
}

struct Head {
    method: String,
    target: String,
    minor_version: u8,
    headers: Headers,
    len: usize,
}

enum Parsed {
    Complete(Head),
    Partial,
    Invalid(u16, &'static str),
}

fn parse_head(buf: &[u8]) -> Parsed {
    let mut raw = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut raw);
    match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => Parsed::Complete(Head {
            method: req.method.unwrap_or_default().to_string(),
            target: req.path.unwrap_or("/").to_string(),
            minor_version: req.version.unwrap_or(1),
            headers: req
                .headers
                .iter()
                .map(|h| (h.name, String::from_utf8_lossy(h.value).into_owned()))
                .collect(),
            len,
        }),
        Ok(httparse::Status::Partial) => Parsed::Partial,
        Err(httparse::Error::TooManyHeaders) => {
            Parsed::Invalid(431, "Request Header Fields Too Large")
        }
        Err(_) => Parsed::Invalid(400, "Bad Request"),
    }
}

fn header_has_token(headers: &Headers, name: &str, token: &str) -> bool {
    headers
        .get(name)
        .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
}

/// Whether a `WS` route matches the path part of `target`.
fn has_ws_route(ctx: &ServerContext, target: &str) -> bool {
    let path = target.split_once('?').map_or(target, |(path, _)| path);
    Method::from_bytes(b"WS")
        .is_ok_and(|ws| ctx.routes().lookup(&ws, path).is_found())
}

async fn handle_connection(ctx: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    let id = ctx.connections().accept(peer);
    if let Err(e) = serve_connection(&ctx, stream, peer, &id).await {
        debug!("Connection {} ended: {}", id, e);
    }
    ctx.connections().remove(&id);
}

async fn reject(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    let mut res = Response::new();
    res.send_error(status, message);
    let bytes = encode_http(
        &res,
        FrameOptions {
            close: true,
            omit_body: false,
        },
    );
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Reads into `buf`. Returns `false` on EOF or when the peer stays idle past
/// the read timeout.
async fn fill(ctx: &ServerContext, stream: &mut TcpStream, buf: &mut BytesMut) -> Result<bool> {
    match tokio::time::timeout(ctx.config().read_timeout(), stream.read_buf(buf)).await {
        Ok(Ok(0)) | Err(_) => Ok(false),
        Ok(Ok(_)) => Ok(true),
        Ok(Err(e)) => Err(e.into()),
    }
}

async fn serve_connection(
    ctx: &Arc<ServerContext>,
    mut stream: TcpStream,
    peer: SocketAddr,
    id: &str,
) -> Result<()> {
    let config = ctx.config();
    let mut buf = BytesMut::with_capacity(4096);

    loop {
        let head = loop {
            match parse_head(&buf) {
                Parsed::Complete(head) => break head,
                Parsed::Invalid(status, message) => return reject(&mut stream, status, message).await,
                Parsed::Partial if buf.len() >= MAX_HEAD_SIZE => {
                    return reject(&mut stream, 431, "Request Header Fields Too Large").await;
                }
                Parsed::Partial => {
                    if !fill(ctx, &mut stream, &mut buf).await? {
                        return Ok(());
                    }
                }
            }
        };
        buf.advance(head.len);

        if header_has_token(&head.headers, "transfer-encoding", "chunked") {
            return reject(&mut stream, 501, "Chunked request bodies are not supported").await;
        }
        let content_length = match head.headers.get("content-length") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) => n,
                Err(_) => return reject(&mut stream, 400, "Invalid Content-Length").await,
            },
            None => 0,
        };
        if content_length > config.max_body_size {
            return reject(&mut stream, 413, "Payload Too Large").await;
        }
        while buf.len() < content_length {
            if !fill(ctx, &mut stream, &mut buf).await? {
                return Ok(());
            }
        }
        let body: Bytes = buf.split_to(content_length).freeze();

        let Ok(method) = Method::from_bytes(head.method.as_bytes()) else {
            return reject(&mut stream, 400, "Bad Request").await;
        };

        let is_upgrade = method == Method::GET
            && header_has_token(&head.headers, "upgrade", "websocket")
            && header_has_token(&head.headers, "connection", "upgrade");

        if is_upgrade {
            if !ctx.protocols().contains(Protocols::WEBSOCKET) {
                return reject(&mut stream, 400, "WebSocket is disabled").await;
            }
            let Some(key) = head.headers.get("sec-websocket-key").map(str::to_string) else {
                return reject(&mut stream, 400, "Missing Sec-WebSocket-Key").await;
            };
            if !has_ws_route(ctx, &head.target) {
                return reject(&mut stream, 404, "Not Found").await;
            }
            ctx.connections().mark_websocket(id, &head.target);
            stream.write_all(&handshake_response(&key)).await?;

            let upgrade = Upgrade {
                id: id.to_string(),
                peer,
                target: head.target,
                headers: head.headers,
            };
            handle_websocket(ctx.clone(), stream, upgrade, buf.to_vec()).await;
            return Ok(());
        }

        if !ctx.protocols().contains(Protocols::HTTP) {
            return reject(&mut stream, 503, "HTTP is disabled").await;
        }

        let close = !config.keep_alive
            || head.minor_version == 0
            || header_has_token(&head.headers, "connection", "close");
        let omit_body = method == Method::HEAD;

        let mut req = Request::new(method, &head.target)
            .with_headers(head.headers)
            .with_body(body)
            .with_peer_addr(peer)
            .with_connection_id(id)
            .with_state(ctx.state().clone());
        let mut res = Response::new()
            .with_connection_id(id)
            .with_max_file_size(config.max_file_size);
        pipeline::dispatch(ctx, &mut req, &mut res).await;

        let bytes = encode_http(&res, FrameOptions { close, omit_body });
        stream.write_all(&bytes).await?;

        if close {
            stream.shutdown().await?;
            return Ok(());
        }
    }
}
