//! Static file fallback.
//!
//! When a static directory is configured, GET and HEAD requests that match no
//! route are looked up on disk before the server answers `404`. Files go out
//! through [`Response::send_file`], so the size limit and the content type
//! table apply.
//!
//! ```text
//! GET /css/site.css
//!   ├──→ percent-decode the path
//!   ├──→ join onto the root and canonicalize
//!   ├──→ reject anything that escapes the root
//!   ├──→ directory → index file
//!   └──→ send_file
//! ```
//!
//! # Examples
//!
//! ```
//! use reqforge_core::prelude::*;
//!
//! let server = Server::new()
//!     .serve_static("public")
//!     .get("/api/health", handler(|_req: &Request, res: &mut Response| {
//!         res.send_json(r#"{"status":"ok"}"#);
//!     }));
//! # let _ = server;
//! ```

use crate::response::Response;
use percent_encoding::percent_decode_str;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Serves files below a root directory.
#[derive(Debug, Clone)]
pub struct StaticFileHandler {
    root: PathBuf,
    index_file: String,
}

impl StaticFileHandler {
    /// Serves files below `root`, with `index.html` for directories.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index_file: "index.html".to_string(),
        }
    }

    /// Uses `index` as the directory index file.
    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index_file = index.into();
        self
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a request path to a file below the root.
    ///
    /// Returns `None` for paths that do not exist, do not decode, or resolve
    /// outside the root.
    pub async fn resolve(&self, path: &str) -> Option<PathBuf> {
        let decoded = percent_decode_str(path.trim_start_matches('/'))
            .decode_utf8()
            .ok()?;
        if decoded.contains('\0') {
            return None;
        }

        let root = tokio::fs::canonicalize(&self.root).await.ok()?;
        let candidate = tokio::fs::canonicalize(self.root.join(decoded.as_ref()))
            .await
            .ok()?;

        if !candidate.starts_with(&root) {
            warn!("Path traversal attempt: {:?}", path);
            return None;
        }

        let is_dir = tokio::fs::metadata(&candidate)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if is_dir {
            let index = candidate.join(&self.index_file);
            return tokio::fs::try_exists(&index)
                .await
                .unwrap_or(false)
                .then_some(index);
        }
        Some(candidate)
    }

    /// Serves `path` into `res`.
    ///
    /// Returns `false` when no file maps to `path`, leaving `res` untouched.
    /// Otherwise the response holds the file or the error `send_file`
    /// produced for it.
    pub async fn serve(&self, path: &str, res: &mut Response) -> bool {
        let Some(file) = self.resolve(path).await else {
            return false;
        };
        debug!("Serving file: {:?}", file);
        res.send_file(&file).await;
        true
    }
}
