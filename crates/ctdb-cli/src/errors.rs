//! Error type for the CLI runtime.

use std::io;
use std::sync::Arc;

use ctdb_client::{ConnectError, SendError, SyncError};
use thiserror::Error;

use crate::telemetry::TelemetryError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load configuration: {0}")]
    LoadConfiguration(Arc<ortho_config::OrthoError>),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("failed to queue message: {0}")]
    Send(#[from] SendError),
    #[error("{operation} failed: {source}")]
    Request {
        operation: &'static str,
        #[source]
        source: SyncError,
    },
    #[error("failed to write output: {0}")]
    Output(#[source] io::Error),
}

impl AppError {
    /// Adapter for `map_err` naming the blocking operation that failed.
    pub(crate) fn request(operation: &'static str) -> impl FnOnce(SyncError) -> Self {
        move |source| Self::Request { operation, source }
    }
}
