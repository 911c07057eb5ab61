//! Application state shared with every handler.
//!
//! Values are stored by type. The server hands the same [`AppState`] to every
//! request it dispatches, so a database pool or a counter inserted before
//! `listen` is reachable from any handler through
//! [`Request::state`](crate::request::Request::state).
//!
//! # Examples
//!
//! ```
//! use reqforge_core::prelude::*;
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicU64, Ordering};
//!
//! struct Hits(AtomicU64);
//!
//! let server = Server::new()
//!     .with_state(Arc::new(Hits(AtomicU64::new(0))))
//!     .get("/hits", handler(|req: &Request, res: &mut Response| {
//!         if let Some(hits) = req.state::<Hits>() {
//!             let n = hits.0.fetch_add(1, Ordering::Relaxed) + 1;
//!             res.send_text(n.to_string());
//!         }
//!     }));
//! # let _ = server;
//! ```

use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::sync::Arc;

/// Type-keyed map of shared values.
///
/// Cloning is cheap: clones share the same storage.
#[derive(Clone, Default)]
pub struct AppState {
    values: Arc<DashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl AppState {
    /// Creates an empty state map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value`, replacing any previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.values.insert(TypeId::of::<T>(), value);
    }

    /// Returns the stored value of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    /// Returns `true` if a value of type `T` is stored.
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("values", &self.values.len())
            .finish()
    }
}
