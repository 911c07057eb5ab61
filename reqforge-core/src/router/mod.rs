//! Path routing: a segment trie plus the flat route table that guards it.
//!
//! Routes are registered as `(method, pattern, handler)` triples. A pattern is
//! a `/`-separated list of segments; a segment starting with `:` binds the
//! literal text at that position to a named parameter.
//!
//! ```text
//! /users/:id/posts        root
//!                          └── users
//!                               ├── me          (static, tried first)
//!                               └── :id         (parameter child)
//!                                    └── posts
//! ```
//!
//! [`TrieRouter`] owns the tree and does the matching. [`RouteTable`] keeps the
//! flat list used for duplicate detection and capacity accounting, and keeps
//! both structures consistent behind a single reader-writer lock.
//!
//! # Examples
//!
//! ```
//! use reqforge_core::router::{Lookup, RouteTable};
//! use reqforge_core::handler::handler;
//! use http::Method;
//!
//! let table = RouteTable::new(16);
//! table
//!     .register("GET", "/users/:id", handler(|req, res| {
//!         let id = req.param("id").unwrap_or_default().to_string();
//!         res.send_text(id);
//!     }))
//!     .unwrap();
//!
//! match table.lookup(&Method::GET, "/users/42") {
//!     Lookup::Found(m) => assert_eq!(m.params.get("id"), Some("42")),
//!     _ => panic!("route should match"),
//! }
//! ```

pub mod table;
pub mod trie;

pub use table::{RouteInfo, RouteTable};
pub use trie::{Lookup, MAX_PARAMS, PathParams, RouteMatch, TrieRouter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a route registration was rejected.
///
/// A rejected registration leaves both the route table and the trie exactly
/// as they were.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The same method and pattern are already registered.
    #[error("duplicate route: {method} {path}")]
    Duplicate {
        /// Method of the rejected route.
        method: String,
        /// Normalized pattern of the rejected route.
        path: String,
    },

    /// The table already holds its maximum number of routes.
    #[error("route capacity exhausted ({capacity} routes)")]
    CapacityExhausted {
        /// Configured capacity.
        capacity: usize,
    },

    /// The method is not a valid HTTP token.
    #[error("invalid method: {0:?}")]
    InvalidMethod(String),

    /// The pattern is empty, relative, or has an unnamed parameter.
    #[error("invalid route pattern: {0:?}")]
    InvalidPattern(String),

    /// A different parameter name already occupies this depth.
    #[error("parameter :{requested} conflicts with existing :{existing} at the same depth")]
    ParamConflict {
        /// Name already registered at this depth.
        existing: String,
        /// Name the new pattern tried to use.
        requested: String,
    },

    /// The pattern binds more parameters than a match can capture.
    #[error("route {pattern} declares more than {max} parameters")]
    TooManyParams {
        /// Offending pattern.
        pattern: String,
        /// Maximum allowed.
        max: usize,
    },
}

/// Rate limit settings attached to a route's terminal trie node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained rate, refilled continuously.
    pub requests_per_minute: u32,
    /// Bucket size; the number of requests allowed back to back.
    pub burst_limit: u32,
    /// Disabled configs are stored but never enforced.
    pub enabled: bool,
}

impl RateLimitConfig {
    /// An enabled config with the given rate and burst.
    pub fn new(requests_per_minute: u32, burst_limit: u32) -> Self {
        Self {
            requests_per_minute,
            burst_limit,
            enabled: true,
        }
    }
}

/// Splits a path into its non-empty segments.
pub(crate) fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Canonical form of a pattern or path: leading slash, no empty segments.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in segments(path) {
        normalized.push('/');
        normalized.push_str(segment);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}
