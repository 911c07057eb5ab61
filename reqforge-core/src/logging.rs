//! Tracing subscriber setup.
//!
//! The library itself only emits `tracing` events; nothing is printed until a
//! subscriber is installed. [`init`] installs a formatted stdout subscriber
//! driven by [`LogConfig`]:
//!
//! ```bash
//! # RUST_LOG wins over the configured level
//! RUST_LOG=reqforge_core=debug cargo run -p hello
//! ```
//!
//! Each request is logged inside a `request` span carrying its trace id,
//! method and path, so every event a handler emits is attributable.

use crate::config::LogConfig;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber.
///
/// Returns `false` if a subscriber was already installed, in which case the
/// existing one is kept.
///
/// # Examples
///
/// ```
/// use reqforge_core::config::LogConfig;
///
/// let installed = reqforge_core::logging::init(&LogConfig::default());
/// // A second call keeps the first subscriber.
/// assert!(!reqforge_core::logging::init(&LogConfig::default()) || !installed);
/// ```
pub fn init(config: &LogConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(config.colored_output))
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = LogConfig {
            level: "not a valid directive [".to_string(),
            ..LogConfig::default()
        };
        init(&config);
        assert!(!init(&LogConfig::default()));
    }
}
