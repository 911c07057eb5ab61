//! Middleware run before routing.
//!
//! Middleware form an ordered list. Each one sees the request and the response
//! before any plugin hook or handler, and returns a [`Flow`] telling the
//! pipeline whether to continue. Returning [`Flow::Halt`] (or ending the
//! response) short-circuits everything after it: later middleware, plugin
//! hooks and the route handler are all skipped, and whatever the middleware
//! wrote is sent as-is.
//!
//! ```text
//! request ─→ [mw 1] ─→ [mw 2] ─→ pre-hooks ─→ handler ─→ post-hooks ─→ flush
//!               │          │
//!               └── Halt ──┴──────────────────────────────────────────→ flush
//! ```
//!
//! # Examples
//!
//! ## Closure Middleware
//!
//! ```
//! use reqforge_core::prelude::*;
//!
//! let auth = from_fn(|req: &mut Request, res: &mut Response| {
//!     if req.header("authorization").is_none() {
//!         res.send_error(401, "Unauthorized");
//!         return Flow::Halt;
//!     }
//!     Flow::Continue
//! });
//!
//! let server = Server::new().layer(auth);
//! # let _ = server;
//! ```
//!
//! ## Custom Middleware
//!
//! ```
//! use reqforge_core::prelude::*;
//! use async_trait::async_trait;
//!
//! struct PoweredBy;
//!
//! #[async_trait]
//! impl Middleware for PoweredBy {
//!     async fn handle(&self, _req: &mut Request, res: &mut Response) -> Result<Flow> {
//!         res.set_header("X-Powered-By", "reqforge");
//!         Ok(Flow::Continue)
//!     }
//! }
//! ```

pub mod logger;

pub use logger::LoggerMiddleware;

use crate::error::Result;
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::sync::Arc;

/// What the pipeline does after a middleware returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Run the next stage.
    Continue,
    /// End the response and skip straight to flushing it.
    Halt,
}

/// A stage run on every request before routing.
#[async_trait]
pub trait Middleware: Send + Sync + 'static {
    /// Inspects or rewrites the request and response.
    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<Flow>;
}

/// The ordered middleware list.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware.
    pub fn layer(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Number of middleware in the chain.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Returns `true` if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs every middleware in order.
    ///
    /// Stops at the first [`Flow::Halt`], at the first error, or as soon as
    /// the response has ended. A halt latches the response.
    pub async fn run(&self, req: &mut Request, res: &mut Response) -> Result<Flow> {
        for middleware in &self.middlewares {
            if res.is_headers_sent() {
                return Ok(Flow::Halt);
            }
            if middleware.handle(req, res).await? == Flow::Halt {
                res.end();
                return Ok(Flow::Halt);
            }
        }
        if res.is_headers_sent() {
            return Ok(Flow::Halt);
        }
        Ok(Flow::Continue)
    }
}

/// Middleware built from a closure.
///
/// You typically don't construct this directly; use [`from_fn`].
pub struct FnMiddleware<F> {
    func: F,
}

#[async_trait]
impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&mut Request, &mut Response) -> Flow + Send + Sync + 'static,
{
    async fn handle(&self, req: &mut Request, res: &mut Response) -> Result<Flow> {
        Ok((self.func)(req, res))
    }
}

/// Wraps a closure as middleware.
pub fn from_fn<F>(f: F) -> Arc<FnMiddleware<F>>
where
    F: Fn(&mut Request, &mut Response) -> Flow + Send + Sync + 'static,
{
    Arc::new(FnMiddleware { func: f })
}
