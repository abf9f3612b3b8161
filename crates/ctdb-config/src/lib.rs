//! Shared configuration for ctdb client tools.
//!
//! Values are layered by `ortho_config`: built-in defaults, then an optional
//! TOML file (`--config-path` or `CTDB_CONFIG_PATH`), then `CTDB_*`
//! environment variables, then command-line flags.

mod defaults;
mod logging;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_LOG_FILTER, DEFAULT_SOCKET_PATH, default_daemon_socket, default_log_filter,
    default_log_filter_string, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Resolved settings for talking to the local daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "CTDB")]
pub struct Config {
    /// Unix socket the daemon accepts clients on.
    #[ortho_config(default = default_daemon_socket())]
    pub daemon_socket: Utf8PathBuf,
    /// `tracing` filter directive applied by the binaries.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for log events.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Config {
    /// Unix socket the daemon accepts clients on.
    #[must_use]
    pub fn daemon_socket(&self) -> &Utf8Path {
        &self.daemon_socket
    }

    /// Configured log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Configured log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon_socket: default_daemon_socket(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}
