//! Request logging middleware.
//!
//! Logs one line per incoming request at a configurable level. Completion
//! (status and latency) is logged by the pipeline itself once the response is
//! flushed, so this middleware only reports arrivals.
//!
//! # Examples
//!
//! ```
//! use reqforge_core::prelude::*;
//! use reqforge_core::middleware::logger::LogLevel;
//!
//! let server = Server::new()
//!     .layer(LoggerMiddleware::with_level(LogLevel::Debug));
//! # let _ = server;
//! ```

use crate::error::Result;
use crate::middleware::{Flow, Middleware};
use crate::request::{Protocol, Request};
use crate::response::Response;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Level arrivals are logged at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// `tracing::debug!`
    Debug,
    /// `tracing::info!`
    #[default]
    Info,
    /// `tracing::warn!`
    Warn,
}

/// Logs every request that enters the pipeline.
#[derive(Debug, Default)]
pub struct LoggerMiddleware {
    log_level: LogLevel,
}

impl LoggerMiddleware {
    /// Logs at `info`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Logs at `level`.
    pub fn with_level(level: LogLevel) -> Arc<Self> {
        Arc::new(Self { log_level: level })
    }

    /// The configured level.
    pub fn level(&self) -> LogLevel {
        self.log_level
    }
}

#[async_trait]
impl Middleware for LoggerMiddleware {
    async fn handle(&self, req: &mut Request, _res: &mut Response) -> Result<Flow> {
        let peer = req
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        let kind = match req.protocol() {
            Protocol::Http => "HTTP",
            Protocol::WebSocket => "WS",
        };

        match self.log_level {
            LogLevel::Debug => debug!("📨 [{}] {} {} {}", peer, kind, req.method(), req.path()),
            LogLevel::Info => info!("📨 [{}] {} {} {}", peer, kind, req.method(), req.path()),
            LogLevel::Warn => warn!("📨 [{}] {} {} {}", peer, kind, req.method(), req.path()),
        }

        Ok(Flow::Continue)
    }
}
