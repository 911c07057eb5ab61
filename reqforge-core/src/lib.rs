//! # ReqForge Core - Trie-Routed HTTP and WebSocket Request Engine
//!
//! `reqforge-core` is the engine behind the ReqForge framework. It accepts
//! HTTP/1.1 and WebSocket traffic on one port, routes every request through a
//! segment trie, runs it through a fixed middleware and plugin pipeline, and
//! frames the response back onto the wire.
//!
//! ## Key Features
//!
//! - 🌲 **Trie Routing**: Static segments beat `:param` captures, no backtracking
//! - 🔗 **One Pipeline**: Middleware → pre-hooks → handler → post-hooks for HTTP and WebSocket alike
//! - 🛑 **Short-Circuit**: Any stage that ends the response stops the ones after it
//! - 🗜️ **Compression**: Gzip, deflate and brotli negotiated from `Accept-Encoding`
//! - 📡 **Broadcasting**: Text frames to one, all, or all-but-one WebSocket client
//! - 🚦 **Rate Limiting**: Per-route token buckets as a plugin
//! - 📦 **Message Arena**: Lock-free, checksummed, zero-copy message passing for an embedding host
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Application                          │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────────────────┐  │
//! │  │  Handlers  │  │ Middleware │  │  Plugins & App State   │  │
//! │  └────────────┘  └────────────┘  └────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ReqForge Core                         │
//! │  ┌────────────┐  ┌────────────┐  ┌────────────┐  ┌────────┐  │
//! │  │   Server   │→ │  Pipeline  │→ │ RouteTable │  │ Framer │  │
//! │  └────────────┘  └────────────┘  └────────────┘  └────────┘  │
//! │  ┌────────────────────┐  ┌────────────────────────────────┐  │
//! │  │ ConnectionManager  │  │  MessageArena / SharedChannel  │  │
//! │  └────────────────────┘  └────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!                               │
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 tokio (TCP, timers, tasks)                   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! - [`server`]: Builder and accept loop
//! - [`router`]: Route trie and route table
//! - [`request`] / [`response`]: The request model handlers see
//! - [`pipeline`]: Stage ordering and short-circuiting
//! - [`middleware`] / [`plugin`]: Extension points around the handler
//! - [`framer`]: HTTP and WebSocket wire encoding, compression
//! - [`connection`]: Live connections and broadcasting
//! - [`static_files`]: Directory fallback for unmatched GET/HEAD requests
//! - [`ipc`]: Message arena and shared request/response channel
//! - [`config`] / [`logging`]: Server configuration and tracing setup
//!
//! ## Quick Start
//!
//! ```no_run
//! use reqforge_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ServerConfig::default().with_bind_address("127.0.0.1:8080");
//!     logging::init(&config.log);
//!
//!     Server::with_config(config)
//!         .layer(LoggerMiddleware::new())
//!         .get("/hello/:name", handler(|req: &Request, res: &mut Response| {
//!             let name = req.param("name").unwrap_or("world");
//!             res.send_text(format!("Hello, {name}!"));
//!         }))
//!         .listen()
//!         .await
//! }
//! ```
//!
//! ## Rate Limiting
//!
//! ```
//! use reqforge_core::prelude::*;
//!
//! let server = Server::new()
//!     .post("/login", handler(|_req: &Request, res: &mut Response| {
//!         res.send_json(r#"{"ok":true}"#);
//!     }))
//!     .rate_limit("/login", RateLimitConfig::new(10, 5));
//! assert!(server.errors().is_empty());
//! ```
//!
//! ## Graceful Shutdown
//!
//! ```no_run
//! use reqforge_core::prelude::*;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await?;
//!     Server::new()
//!         .serve_with_shutdown(listener, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

// Enable documentation features for docs.rs
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod framer;
pub mod handler;
pub mod headers;
pub mod ipc;
pub mod logging;
pub mod middleware;
pub mod pipeline;
pub mod plugin;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;
pub mod static_files;

pub use config::{LogConfig, ServerConfig};
pub use connection::{ConnectionId, ConnectionInfo, ConnectionManager};
pub use context::{Protocols, ServerContext};
pub use error::{Error, Result};
pub use framer::Compression;
pub use handler::{Handler, IntoOutcome, handler};
pub use headers::Headers;
pub use http::Method;
pub use ipc::{ArenaError, MessageArena, SharedChannel};
pub use middleware::{Flow, Middleware, from_fn};
pub use plugin::{Plugin, RateLimitPlugin};
pub use request::{Protocol, Request};
pub use response::Response;
pub use router::{Lookup, RateLimitConfig, RouteError, RouteTable};
pub use server::Server;
pub use state::AppState;
pub use static_files::StaticFileHandler;

/// Commonly used types and traits for ReqForge applications.
///
/// # Examples
///
/// ```
/// use reqforge_core::prelude::*;
///
/// let server = Server::new()
///     .layer(LoggerMiddleware::new())
///     .get("/", handler(|_req: &Request, res: &mut Response| {
///         res.send_text("Hello!");
///     }));
/// # let _ = server;
/// ```
///
/// # Included Types
///
/// - **Server**: [`Server`], [`ServerConfig`], [`ServerContext`], [`Protocols`]
/// - **Handlers**: [`handler()`], [`Handler`], [`Request`], [`Response`]
/// - **Pipeline**: [`Middleware`], [`from_fn`], [`Flow`], [`LoggerMiddleware`], [`Plugin`], [`RateLimitPlugin`]
/// - **Routing**: [`RouteTable`], [`Lookup`], [`RateLimitConfig`]
/// - **Connections**: [`ConnectionManager`], [`ConnectionId`]
/// - **IPC**: [`MessageArena`], [`SharedChannel`]
pub mod prelude {
    pub use crate::config::{LogConfig, ServerConfig};
    pub use crate::connection::{ConnectionId, ConnectionInfo, ConnectionManager};
    pub use crate::context::{Protocols, ServerContext};
    pub use crate::error::{Error, Result};
    pub use crate::framer::Compression;
    pub use crate::handler::{Handler, handler};
    pub use crate::ipc::{MessageArena, SharedChannel};
    pub use crate::logging;
    pub use crate::middleware::{Flow, LoggerMiddleware, Middleware, from_fn};
    pub use crate::plugin::{Plugin, RateLimitPlugin};
    pub use crate::request::{Protocol, Request};
    pub use crate::response::Response;
    pub use crate::router::{Lookup, RateLimitConfig, RouteTable};
    pub use crate::server::Server;
    pub use crate::state::AppState;
    pub use crate::static_files::StaticFileHandler;
    pub use http::Method;
}
