//! Asynchronous client for the ctdb clustering daemon.
//!
//! A [`Connection`] talks to the local ctdbd over its unix socket. Requests
//! are queued with the `*_send` methods and complete through callbacks that
//! run inside [`Connection::service`], which the embedding event loop calls
//! whenever [`Connection::fd`] is ready for [`Connection::which_events`].
//! Replies are correlated by request id, so the daemon may answer in any
//! order.
//!
//! Every asynchronous operation also has a blocking wrapper of the same base
//! name, built on [`Connection::synchronous`]. Blocking while a record lock
//! is held risks a cluster-wide deadlock and is reported at
//! [`Severity::Alert`]. Programs without an event loop of their own can pump
//! the connection with [`Connection::run_until`].
//!
//! The connection is single-threaded: callbacks receive it mutably and may
//! queue further requests, but it must not be shared across threads.

mod connection;
mod control;
mod db;
mod errors;
mod frame;
mod lock;
mod log;
mod messages;
mod registry;
mod request;
mod service;
mod store;
mod sync;

pub use connection::{Connection, Events};
pub use db::AttachCallback;
pub use errors::{
    AttachError, ConnectError, LockError, ReplyError, SendError, ServiceError, SyncError,
};
pub use frame::FrameBuffer;
pub use lock::{Lock, LockCallback};
pub use log::{ClientLogger, Severity, TracingLogger};
pub use messages::{HandlerId, MessageHandler};
pub use request::{Callback, Membership, Request, RequestHandle};
pub use store::{DbId, RecordHeader, RecordStore, StoreOpener, StoredRecord};
pub use sync::Outcome;

#[cfg(test)]
mod tests;
