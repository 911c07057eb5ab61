//! Plugins: named hooks around the route handler.
//!
//! A plugin is initialized once when the server starts, then runs a
//! pre-handler hook before routing and a post-handler hook after the handler,
//! on every request. Hooks of different plugins run in registration order.
//! A hook that ends the response (see [`Response::end`]) short-circuits the
//! remaining hooks and, for pre-hooks, the handler itself.
//!
//! # Examples
//!
//! ```
//! use reqforge_core::prelude::*;
//! use async_trait::async_trait;
//!
//! struct RequestId;
//!
//! #[async_trait]
//! impl Plugin for RequestId {
//!     fn name(&self) -> &str {
//!         "request-id"
//!     }
//!
//!     async fn post_handler(&self, req: &Request, res: &mut Response) -> Result<()> {
//!         res.set_header("X-Request-Id", req.trace_id());
//!         Ok(())
//!     }
//! }
//!
//! let server = Server::new().plugin(std::sync::Arc::new(RequestId));
//! # let _ = server;
//! ```

pub mod rate_limit;

pub use rate_limit::RateLimitPlugin;

use crate::context::ServerContext;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::response::Response;
use async_trait::async_trait;
use std::sync::Arc;

/// A named set of hooks.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    /// Unique name, used in logs and to reject duplicate registration.
    fn name(&self) -> &str;

    /// Called once before the server accepts connections. An error aborts
    /// startup.
    async fn init(&self, _ctx: &ServerContext) -> Result<()> {
        Ok(())
    }

    /// Runs after middleware, before the route handler.
    async fn pre_handler(&self, _req: &mut Request, _res: &mut Response) -> Result<()> {
        Ok(())
    }

    /// Runs after the route handler.
    async fn post_handler(&self, _req: &Request, _res: &mut Response) -> Result<()> {
        Ok(())
    }
}

/// Registered plugins in registration order.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin. Fails if a plugin with the same name exists.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(Error::custom(format!(
                "plugin {:?} is already registered",
                plugin.name()
            )));
        }
        tracing::debug!("Registered plugin {}", plugin.name());
        self.plugins.push(plugin);
        Ok(())
    }

    /// Calls every plugin's `init`, stopping at the first failure.
    pub async fn init_all(&self, ctx: &ServerContext) -> Result<()> {
        for plugin in &self.plugins {
            plugin.init(ctx).await.map_err(|e| {
                tracing::error!("Plugin {} failed to initialize: {}", plugin.name(), e);
                e
            })?;
        }
        Ok(())
    }

    /// Runs pre-handler hooks until one fails or ends the response.
    pub async fn run_pre(&self, req: &mut Request, res: &mut Response) -> Result<()> {
        for plugin in &self.plugins {
            if res.is_headers_sent() {
                break;
            }
            plugin.pre_handler(req, res).await?;
        }
        Ok(())
    }

    /// Runs post-handler hooks until one fails or ends the response.
    pub async fn run_post(&self, req: &Request, res: &mut Response) -> Result<()> {
        for plugin in &self.plugins {
            if res.is_headers_sent() {
                break;
            }
            plugin.post_handler(req, res).await?;
        }
        Ok(())
    }

    /// Names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Number of plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Returns `true` when no plugin is registered.
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;
    use parking_lot::Mutex;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        end_in_pre: bool,
    }

    #[async_trait]
    impl Plugin for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        async fn pre_handler(&self, _req: &mut Request, res: &mut Response) -> Result<()> {
            self.log.lock().push(format!("pre:{}", self.name));
            if self.end_in_pre {
                res.send_error(418, "stop");
                res.end();
            }
            Ok(())
        }

        async fn post_handler(&self, _req: &Request, _res: &mut Response) -> Result<()> {
            self.log.lock().push(format!("post:{}", self.name));
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, end: bool) -> Arc<dyn Plugin> {
        Arc::new(Recorder {
            name,
            log: log.clone(),
            end_in_pre: end,
        })
    }

    #[tokio::test]
    async fn test_hooks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(recorder("a", &log, false)).unwrap();
        registry.register(recorder("b", &log, false)).unwrap();

        let mut req = Request::new(Method::GET, "/");
        let mut res = Response::new();
        registry.run_pre(&mut req, &mut res).await.unwrap();
        registry.run_post(&req, &mut res).await.unwrap();

        assert_eq!(*log.lock(), vec!["pre:a", "pre:b", "post:a", "post:b"]);
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_pre_hook_short_circuit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(recorder("gate", &log, true)).unwrap();
        registry.register(recorder("after", &log, false)).unwrap();

        let mut req = Request::new(Method::GET, "/");
        let mut res = Response::new();
        registry.run_pre(&mut req, &mut res).await.unwrap();

        assert_eq!(*log.lock(), vec!["pre:gate"]);
        assert_eq!(res.status(), 418);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = PluginRegistry::new();
        registry.register(recorder("a", &log, false)).unwrap();

        assert!(registry.register(recorder("a", &log, false)).is_err());
        assert_eq!(registry.len(), 1);
    }
}
