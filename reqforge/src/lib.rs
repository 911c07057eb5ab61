//! # ReqForge - Trie-Routed HTTP and WebSocket Request Engine
//!
//! ReqForge serves HTTP/1.1 and WebSocket clients from a single port. Routes
//! live in a segment trie, every request goes through the same middleware,
//! plugin and handler pipeline, and an embedding host can exchange messages
//! with the engine through a checksummed, zero-copy arena.
//!
//! This crate is the public facade. It re-exports [`reqforge_core`].
//!
//! ## 🌟 Key Features
//!
//! - **🌲 Trie Routing**: `/users/:id` style parameters, static routes first
//! - **🔗 Pipeline**: Middleware → pre-hooks → handler → post-hooks, with short-circuiting
//! - **🗜️ Compression**: Gzip, deflate and brotli
//! - **📡 WebSocket**: Text messages routed like HTTP requests, plus broadcasting
//! - **🚦 Rate Limiting**: Per-route token buckets
//! - **📂 Static Files**: Directory fallback with traversal protection
//! - **📦 IPC**: Lock-free message arena and a shared request/response channel
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! reqforge = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! ```no_run
//! use reqforge::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     Server::new()
//!         .get("/", handler(|_req: &Request, res: &mut Response| {
//!             res.send_text("Hello from ReqForge");
//!         }))
//!         .ws("/echo", handler(|req: &Request, res: &mut Response| {
//!             res.write(req.body());
//!         }))
//!         .listen()
//!         .await
//! }
//! ```

// Enable documentation features for docs.rs
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export everything from reqforge-core
pub use reqforge_core::*;

/// Prelude module for convenient imports.
///
/// ```
/// use reqforge::prelude::*;
///
/// let server = Server::new().get("/ping", handler(|_req: &Request, res: &mut Response| {
///     res.send_text("pong");
/// }));
/// # let _ = server;
/// ```
pub mod prelude {
    pub use reqforge_core::prelude::*;
}
