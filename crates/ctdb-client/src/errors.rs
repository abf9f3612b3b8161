//! Error types surfaced by the client.

use std::io;

use camino::Utf8PathBuf;
use ctdb_protocol::{ControlOpcode, DecodeError, EncodeError, Operation};
use thiserror::Error;

use crate::store::DbId;

/// Failures while establishing the daemon connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The socket could not be created.
    #[error("failed to create socket for {path}: {source}")]
    Socket {
        /// Daemon socket path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The daemon refused or could not be reached.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        /// Daemon socket path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The socket could not be configured for non-blocking use.
    #[error("failed to configure socket for {path}: {source}")]
    Configure {
        /// Daemon socket path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A caller-supplied stream could not be made non-blocking.
    #[error("failed to configure connected stream: {0}")]
    Stream(#[source] io::Error),
    /// The bootstrap request could not be queued.
    #[error("failed to queue bootstrap request: {0}")]
    Bootstrap(#[from] SendError),
}

/// Fatal transport conditions reported by `service`.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// An earlier fatal condition left the connection unusable.
    #[error("connection is broken")]
    Broken,
    /// Writing a request failed.
    #[error("failed writing to daemon: {0}")]
    Write(#[source] io::Error),
    /// Reading a reply failed.
    #[error("failed reading from daemon: {0}")]
    Read(#[source] io::Error),
    /// The daemon closed the connection.
    #[error("daemon closed the connection")]
    Closed,
    /// Querying the pending byte count failed.
    #[error("failed querying pending bytes: {0}")]
    Ioctl(#[source] io::Error),
    /// The daemon sent a frame with an impossible length.
    #[error("malformed frame from daemon: {0}")]
    Frame(#[source] io::Error),
}

/// Failures while building and queueing a request.
#[derive(Debug, Error)]
pub enum SendError {
    /// The request does not fit in a frame.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Failures while unpacking a completed request.
#[derive(Debug, Error)]
pub enum ReplyError {
    /// The request has not received a reply.
    #[error("request has no reply")]
    NoReply,
    /// The request was not the kind this unpacker handles.
    #[error("request is a {found}, expected a {expected}")]
    WrongKind {
        /// Kind the unpacker handles.
        expected: &'static str,
        /// Kind of the request supplied.
        found: &'static str,
    },
    /// A control reply was unpacked by the wrong control's unpacker.
    #[error("request was control {found:?}, expected {expected:?}")]
    WrongOpcode {
        /// Opcode the unpacker handles.
        expected: ControlOpcode,
        /// Opcode of the request supplied.
        found: ControlOpcode,
    },
    /// The reply frame has an unexpected operation.
    #[error("reply has operation {found:?}, expected {expected:?}")]
    WrongReply {
        /// Operation that should answer the request.
        expected: Operation,
        /// Operation actually received.
        found: Operation,
    },
    /// The reply body could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// The daemon reported failure.
    #[error("daemon returned status {status}")]
    Status {
        /// Status value from the reply.
        status: i32,
    },
    /// The daemon returned a path that is not UTF-8.
    #[error("path in reply is not valid UTF-8")]
    PathEncoding,
    /// The reply carried fewer bytes than the operation requires.
    #[error("reply payload too short: expected {expected} bytes, got {actual}")]
    ShortPayload {
        /// Bytes required.
        expected: usize,
        /// Bytes received.
        actual: usize,
    },
}

/// Failures around record locks.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another lock is held or being acquired on this connection.
    #[error("a record lock is already held on this connection")]
    AlreadyHeld,
    /// The lock does not match the one this connection holds.
    #[error("lock is not held by this connection")]
    NotHeld,
    /// Read-only locks cannot be written through.
    #[error("cannot write through a read-only lock")]
    ReadOnly,
    /// Persistent databases are only written through transactions.
    #[error("cannot write a record of persistent database {0}")]
    Persistent(DbId),
    /// The database is not attached on this connection.
    #[error("database {0} is not attached")]
    UnknownDatabase(DbId),
    /// The local store failed.
    #[error("record store failed: {0}")]
    Store(#[source] io::Error),
    /// The migration request could not be queued.
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Failures while attaching a database.
#[derive(Debug, Error)]
pub enum AttachError {
    /// A control in the attach sequence failed.
    #[error(transparent)]
    Reply(#[from] ReplyError),
    /// A follow-up control could not be queued.
    #[error(transparent)]
    Send(#[from] SendError),
    /// The local store could not be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        /// Path reported by the daemon.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Failures from the blocking wrappers.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Waiting for readiness failed.
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),
    /// The connection failed before the request completed.
    #[error(transparent)]
    Service(#[from] ServiceError),
    /// The request could not be built.
    #[error(transparent)]
    Send(#[from] SendError),
    /// The reply could not be unpacked.
    #[error(transparent)]
    Reply(#[from] ReplyError),
    /// Lock acquisition was refused.
    #[error(transparent)]
    Lock(#[from] LockError),
    /// Attaching a database failed.
    #[error(transparent)]
    Attach(#[from] AttachError),
    /// The operation finished without producing a result.
    #[error("operation failed without a result")]
    Failed,
}
