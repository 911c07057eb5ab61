//! Server configuration.
//!
//! Every field has a default, so an empty TOML file is a valid configuration.
//! [`ServerConfig::from_file`] parses and then validates, reporting every
//! problem at once instead of stopping at the first.
//!
//! ```toml
//! bind_address = "127.0.0.1:8081"
//! max_routes = 256
//! static_dir = "public"
//! compression = "gzip"
//!
//! [log]
//! level = "debug"
//! colored_output = false
//! ```

use crate::error::{Error, Result};
use crate::framer::compression::Compression;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Logging settings, consumed by [`logging::init`](crate::logging::init).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Assigns a trace id to every request.
    pub enable_tracing: bool,
    /// ANSI colors in log output.
    pub colored_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_tracing: true,
            colored_output: true,
        }
    }
}

/// Top-level server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub bind_address: String,
    /// Route table capacity.
    pub max_routes: usize,
    /// Largest accepted request body, in bytes.
    pub max_body_size: usize,
    /// Largest file `send_file` will load, in bytes.
    pub max_file_size: u64,
    /// Idle time allowed while waiting for a request head.
    pub read_timeout_secs: u64,
    /// Largest accepted inbound WebSocket frame payload.
    pub max_ws_frame_size: usize,
    /// Serve several requests per HTTP connection.
    pub keep_alive: bool,
    /// Directory served for unmatched GET and HEAD requests.
    pub static_dir: Option<PathBuf>,
    /// Encoding applied to responses when the client accepts it.
    pub compression: Option<Compression>,
    /// Logging settings.
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8081".to_string(),
            max_routes: 100,
            max_body_size: 1024 * 1024,
            max_file_size: 10 * 1024 * 1024,
            read_timeout_secs: 5,
            max_ws_frame_size: 64 * 1024,
            keep_alive: true,
            static_dir: None,
            compression: None,
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Loads and validates a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;

        config
            .validate()
            .map_err(|errors| Error::config(errors.join(", ")))?;
        Ok(config)
    }

    /// Checks value ranges. Returns every problem found.
    pub fn validate(&self) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(format!("bind_address {:?} is not a socket address", self.bind_address));
        }
        if self.max_routes == 0 {
            errors.push("max_routes must be greater than 0".to_string());
        }
        if self.max_body_size == 0 {
            errors.push("max_body_size must be greater than 0".to_string());
        }
        if self.max_file_size == 0 {
            errors.push("max_file_size must be greater than 0".to_string());
        }
        if self.read_timeout_secs == 0 {
            errors.push("read_timeout_secs must be greater than 0".to_string());
        }
        if self.max_ws_frame_size == 0 {
            errors.push("max_ws_frame_size must be greater than 0".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// Sets the bind address.
    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    /// Sets the route capacity.
    pub fn with_max_routes(mut self, max_routes: usize) -> Self {
        self.max_routes = max_routes;
        self
    }

    /// Sets the static directory.
    pub fn with_static_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.static_dir = Some(dir.into());
        self
    }

    /// [`read_timeout_secs`](Self::read_timeout_secs) as a duration.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:8081");
        assert_eq!(config.max_routes, 100);
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
bind_address = "127.0.0.1:9000"
compression = "br"

[log]
level = "debug"
"#
        )
        .unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bind_address, "127.0.0.1:9000");
        assert_eq!(config.compression, Some(Compression::Brotli));
        assert_eq!(config.log.level, "debug");
        assert!(config.log.enable_tracing);
        assert_eq!(config.max_routes, 100);
    }

    #[test]
    fn test_validation_reports_all_errors() {
        let config = ServerConfig {
            bind_address: "nowhere".to_string(),
            max_routes: 0,
            read_timeout_secs: 0,
            ..ServerConfig::default()
        };

        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("bind_address"));
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_routes = 0").unwrap();

        let err = ServerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("max_routes"));
    }

    #[test]
    fn test_from_file_missing() {
        assert!(matches!(
            ServerConfig::from_file("/definitely/not/here.toml"),
            Err(Error::Io(_))
        ));
    }
}
