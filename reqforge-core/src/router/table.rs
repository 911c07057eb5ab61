//! Flat route list kept in lockstep with the trie.

use super::trie::{Lookup, TrieRouter};
use super::{RateLimitConfig, RouteError, normalize_path};
use crate::handler::Handler;
use http::Method;
use parking_lot::RwLock;
use std::sync::Arc;

/// Snapshot of one registered route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteInfo {
    /// Upper-case method name.
    pub method: String,
    /// Normalized pattern.
    pub path: String,
    /// Rate limit attached to the pattern, if any.
    pub rate_limit: Option<RateLimitConfig>,
}

struct RouteEntry {
    method: Method,
    path: String,
}

struct Inner {
    routes: Vec<RouteEntry>,
    trie: TrieRouter<Arc<dyn Handler>>,
}

/// Bounded registry of `(method, pattern)` routes.
///
/// Registration takes the write lock; lookups take the read lock and release
/// it before the caller runs the handler, so a slow handler never blocks a
/// concurrent registration.
pub struct RouteTable {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl RouteTable {
    /// Creates a table that accepts at most `capacity` routes.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                routes: Vec::with_capacity(capacity.min(1024)),
                trie: TrieRouter::new(),
            }),
            capacity,
        }
    }

    /// Registers `handler` for `method` at `path`.
    ///
    /// The method is case-insensitive and stored upper-case. Fails on a
    /// duplicate `(method, path)`, a full table, or a pattern the trie
    /// refuses; in every case nothing is changed.
    pub fn register(
        &self,
        method: &str,
        path: &str,
        handler: Arc<dyn Handler>,
    ) -> Result<(), RouteError> {
        let upper = method.to_ascii_uppercase();
        let method = Method::from_bytes(upper.as_bytes())
            .map_err(|_| RouteError::InvalidMethod(method.to_string()))?;
        if !path.starts_with('/') {
            return Err(RouteError::InvalidPattern(path.to_string()));
        }
        let path = normalize_path(path);

        let mut inner = self.inner.write();
        if inner
            .routes
            .iter()
            .any(|r| r.method == method && r.path == path)
        {
            return Err(RouteError::Duplicate {
                method: upper,
                path,
            });
        }
        if inner.routes.len() >= self.capacity {
            return Err(RouteError::CapacityExhausted {
                capacity: self.capacity,
            });
        }

        inner.trie.insert(method.clone(), &path, handler)?;
        tracing::debug!("Registered route {} {}", method, path);
        inner.routes.push(RouteEntry { method, path });
        Ok(())
    }

    /// Resolves `path` for `method`.
    ///
    /// A `HEAD` request with no `HEAD` route of its own is answered by the
    /// `GET` route at the same path.
    pub fn lookup(&self, method: &Method, path: &str) -> Lookup<Arc<dyn Handler>> {
        let inner = self.inner.read();
        let found = inner.trie.lookup(method, path);
        if *method == Method::HEAD && !found.is_found() {
            let get = inner.trie.lookup(&Method::GET, path);
            if get.is_found() {
                return get;
            }
        }
        found
    }

    /// Attaches a rate limit to a registered pattern.
    ///
    /// Returns `false` if no route uses `path`.
    pub fn set_rate_limit(&self, path: &str, config: RateLimitConfig) -> bool {
        let path = normalize_path(path);
        let applied = self.inner.write().trie.set_rate_limit(&path, config);
        if applied {
            tracing::debug!("Rate limit attached to {}", path);
        }
        applied
    }

    /// Lists registered routes in registration order.
    pub fn routes(&self) -> Vec<RouteInfo> {
        let inner = self.inner.read();
        inner
            .routes
            .iter()
            .map(|r| RouteInfo {
                method: r.method.to_string(),
                path: r.path.clone(),
                rate_limit: inner.trie.rate_limit(&r.path).cloned(),
            })
            .collect()
    }

    /// Returns `true` if `method` is registered at `path`.
    pub fn contains(&self, method: &str, path: &str) -> bool {
        let path = normalize_path(path);
        self.inner
            .read()
            .routes
            .iter()
            .any(|r| r.method.as_str().eq_ignore_ascii_case(method) && r.path == path)
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.inner.read().routes.len()
    }

    /// Returns `true` when no route is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of routes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}
