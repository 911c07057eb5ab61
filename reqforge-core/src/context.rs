//! The server context: everything a dispatch needs, in one place.
//!
//! A [`ServerContext`] owns the route table, middleware chain, plugins,
//! connection manager and configuration. It is built through the
//! [`Server`](crate::server::Server) builder, then frozen behind an `Arc` when
//! the server starts. The route table stays writable after that through
//! [`ServerContext::register`], which takes `&self`.

use crate::config::ServerConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::handler::Handler;
use crate::middleware::{Middleware, MiddlewareChain};
use crate::plugin::{Plugin, PluginRegistry};
use crate::request::RequestMetrics;
use crate::router::{RateLimitConfig, RouteError, RouteTable};
use crate::state::AppState;
use crate::static_files::StaticFileHandler;
use std::ops::BitOr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Set of protocols the server accepts.
///
/// # Examples
///
/// ```
/// use reqforge_core::context::Protocols;
///
/// let both = Protocols::HTTP | Protocols::WEBSOCKET;
/// assert_eq!(both, Protocols::ALL);
/// assert!(!Protocols::HTTP.contains(Protocols::WEBSOCKET));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocols(u8);

impl Protocols {
    /// Plain HTTP requests.
    pub const HTTP: Protocols = Protocols(0b01);
    /// WebSocket upgrades.
    pub const WEBSOCKET: Protocols = Protocols(0b10);
    /// Both.
    pub const ALL: Protocols = Protocols(0b11);

    /// Returns `true` if every protocol in `other` is enabled.
    pub fn contains(self, other: Protocols) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for Protocols {
    fn default() -> Self {
        Protocols::ALL
    }
}

impl BitOr for Protocols {
    type Output = Protocols;

    fn bitor(self, rhs: Protocols) -> Protocols {
        Protocols(self.0 | rhs.0)
    }
}

/// Shared state of a running server.
pub struct ServerContext {
    config: ServerConfig,
    routes: Arc<RouteTable>,
    middleware: MiddlewareChain,
    plugins: PluginRegistry,
    protocols: Protocols,
    connections: Arc<ConnectionManager>,
    static_files: Option<StaticFileHandler>,
    state: AppState,
    requests: AtomicU64,
}

impl ServerContext {
    /// Builds an empty context sized by `config`.
    pub fn new(config: ServerConfig) -> Self {
        let static_files = config
            .static_dir
            .as_ref()
            .map(|dir| StaticFileHandler::new(dir.clone()));
        Self {
            routes: Arc::new(RouteTable::new(config.max_routes)),
            middleware: MiddlewareChain::new(),
            plugins: PluginRegistry::new(),
            protocols: Protocols::ALL,
            connections: Arc::new(ConnectionManager::new()),
            static_files,
            state: AppState::new(),
            requests: AtomicU64::new(0),
            config,
        }
    }

    /// Registers a route.
    pub fn register(
        &self,
        method: &str,
        path: &str,
        handler: Arc<dyn Handler>,
    ) -> std::result::Result<(), RouteError> {
        self.routes.register(method, path, handler)
    }

    /// Attaches a rate limit to a registered route.
    pub fn set_rate_limit(&self, path: &str, config: RateLimitConfig) -> bool {
        self.routes.set_rate_limit(path, config)
    }

    /// Appends a middleware.
    pub fn use_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middleware.layer(middleware);
    }

    /// Registers a plugin.
    pub fn register_plugin(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        self.plugins.register(plugin)
    }

    /// Replaces the enabled protocol set.
    pub fn enable_protocols(&mut self, protocols: Protocols) {
        self.protocols = protocols;
    }

    /// Serves unmatched GET and HEAD requests from `handler`.
    pub fn set_static_files(&mut self, handler: StaticFileHandler) {
        self.static_files = Some(handler);
    }

    /// Shared state handed to every request.
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn config_mut(&mut self) -> &mut ServerConfig {
        &mut self.config
    }

    /// The route table.
    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    /// The middleware chain.
    pub fn middleware(&self) -> &MiddlewareChain {
        &self.middleware
    }

    /// Registered plugins.
    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Enabled protocols.
    pub fn protocols(&self) -> Protocols {
        self.protocols
    }

    /// Live connections.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    /// Static file fallback, if configured.
    pub fn static_files(&self) -> Option<&StaticFileHandler> {
        self.static_files.as_ref()
    }

    /// Starts the clock for a new request and assigns its sequence number.
    pub fn next_metrics(&self) -> RequestMetrics {
        RequestMetrics {
            started_at: Instant::now(),
            sequence: self.requests.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    /// Number of requests dispatched so far.
    pub fn requests_handled(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}
