//! Severity-levelled logging sink injected into each connection.

use std::fmt;
use std::sync::Arc;

/// Syslog-style severities used by the client.
///
/// `Alert` marks misuse of the library by its embedder, `Critical` an
/// internal consistency failure, `Error` lost communication with the daemon,
/// `Warning` an unusual condition that is not reported as a failure, and
/// `Debug` tracing of individual requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Per-request tracing.
    Debug,
    /// Informational.
    Info,
    /// Normal but significant.
    Notice,
    /// Unusual but not a failure.
    Warning,
    /// Communication with the daemon failed.
    Error,
    /// Internal consistency check failed.
    Critical,
    /// The embedding program misused the library.
    Alert,
}

/// Receiver for the diagnostics a connection produces.
pub trait ClientLogger: Send + Sync {
    /// Records one diagnostic message.
    fn log(&self, severity: Severity, message: &fmt::Arguments<'_>);
}

impl<T> ClientLogger for Arc<T>
where
    T: ClientLogger + ?Sized,
{
    fn log(&self, severity: Severity, message: &fmt::Arguments<'_>) {
        (**self).log(severity, message);
    }
}

/// Default sink that forwards messages to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl TracingLogger {
    /// Builds a new logger.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

pub(crate) const LOG_TARGET: &str = env!("CARGO_CRATE_NAME");

impl ClientLogger for TracingLogger {
    fn log(&self, severity: Severity, message: &fmt::Arguments<'_>) {
        match severity {
            Severity::Debug => tracing::debug!(target: LOG_TARGET, "{message}"),
            Severity::Info | Severity::Notice => {
                tracing::info!(target: LOG_TARGET, severity = ?severity, "{message}");
            }
            Severity::Warning => tracing::warn!(target: LOG_TARGET, "{message}"),
            Severity::Error | Severity::Critical | Severity::Alert => {
                tracing::error!(target: LOG_TARGET, severity = ?severity, "{message}");
            }
        }
    }
}
