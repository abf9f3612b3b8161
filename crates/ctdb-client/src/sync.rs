//! Blocking wrappers built from the asynchronous primitives.
//!
//! Each wrapper queues its request, then polls the connection's descriptor
//! and calls [`Connection::service`] until the request's callback has run.
//! No timeout is applied.

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::rc::Rc;

use camino::Utf8PathBuf;
use ctdb_protocol::{ControlOpcode, PublicIp};

use crate::connection::{Connection, Events};
use crate::errors::{SendError, SyncError};
use crate::lock::Lock;
use crate::log::Severity;
use crate::messages::HandlerId;
use crate::request::{Callback, Request, RequestHandle};
use crate::store::{DbId, StoreOpener};

/// Slot filled by a completion callback and drained by
/// [`Connection::synchronous`].
pub struct Outcome<T> {
    slot: Rc<RefCell<Option<T>>>,
}

impl<T: 'static> Outcome<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: Rc::new(RefCell::new(None)),
        }
    }

    /// Returns a callback that stores its argument in the slot.
    pub fn callback(&self) -> impl FnOnce(&mut Connection, T) + 'static {
        let slot = Rc::clone(&self.slot);
        move |_, value| {
            *slot.borrow_mut() = Some(value);
        }
    }

    fn take(&self) -> Option<T> {
        self.slot.borrow_mut().take()
    }
}

impl<T: 'static> Default for Outcome<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Outcome<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Outcome")
            .field("filled", &self.slot.borrow().is_some())
            .finish()
    }
}

impl Connection {
    /// Services the connection until `outcome` is filled.
    ///
    /// `handle` names the request whose callback fills the slot; it is
    /// cancelled if waiting fails. A fatal transport error reported after
    /// the slot was filled does not discard the result.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Poll`] if `poll(2)` fails and
    /// [`SyncError::Service`] if the connection breaks first.
    pub fn synchronous<T: 'static>(
        &mut self,
        handle: Option<RequestHandle>,
        outcome: &Outcome<T>,
    ) -> Result<T, SyncError> {
        loop {
            if let Some(value) = outcome.take() {
                return Ok(value);
            }
            if let Err(error) = self.wait_once() {
                if let Some(value) = outcome.take() {
                    return Ok(value);
                }
                self.abandon_wait(handle);
                return Err(error);
            }
        }
    }

    /// Services the connection until `done` reports true.
    ///
    /// Used by embedders waiting for unsolicited messages or for queued
    /// messages to drain, where no single request completion marks the end.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Poll`] if `poll(2)` fails and
    /// [`SyncError::Service`] if the connection breaks.
    pub fn run_until(&mut self, mut done: impl FnMut(&Self) -> bool) -> Result<(), SyncError> {
        while !done(&*self) {
            self.wait_once()?;
        }
        Ok(())
    }

    /// Blocks in `poll(2)` once, then services whatever became ready.
    fn wait_once(&mut self) -> Result<(), SyncError> {
        let mut pollfd = libc::pollfd {
            fd: self.fd(),
            events: self.which_events().to_poll_flags(),
            revents: 0,
        };
        // SAFETY: `pollfd` is a live local and the count passed is one.
        let rc = unsafe { libc::poll(&raw mut pollfd, 1, -1) };
        if rc < 0 {
            let error = io::Error::last_os_error();
            if error.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(SyncError::Poll(error));
        }
        self.service(Events::from_poll_flags(pollfd.revents))?;
        Ok(())
    }

    /// Cancels `handle` if it is still queued.
    pub(crate) fn abandon_wait(&mut self, handle: Option<RequestHandle>) {
        let queued = handle.filter(|wanted| self.registry.iter().any(|req| req.handle == *wanted));
        if let Some(wanted) = queued {
            self.cancel(wanted);
        }
    }

    fn warn_if_locked(&self, operation: &str) {
        if self.holding_lock() {
            self.log(
                Severity::Alert,
                &format_args!("blocking {operation} while holding a record lock"),
            );
        }
    }

    fn round_trip(
        &mut self,
        operation: &str,
        send: impl FnOnce(&mut Self, Callback) -> Result<RequestHandle, SendError>,
    ) -> Result<Request, SyncError> {
        self.warn_if_locked(operation);
        let outcome = Outcome::new();
        let handle = send(self, Box::new(outcome.callback()))?;
        self.synchronous(Some(handle), &outcome)
    }

    /// Sends a control and waits for its reply.
    ///
    /// The completed request is returned for the caller to unpack and free.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the request cannot be sent or waiting fails.
    pub fn control(
        &mut self,
        destnode: u32,
        opcode: ControlOpcode,
        srvid: u64,
        data: &[u8],
    ) -> Result<Request, SyncError> {
        self.round_trip("control", |conn, done| {
            conn.control_send(destnode, opcode, srvid, data, done)
        })
    }

    /// Blocking [`Connection::getpnn_send`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if sending, waiting or unpacking fails.
    pub fn getpnn(&mut self, destnode: u32) -> Result<u32, SyncError> {
        let req = self.round_trip("getpnn", |conn, done| conn.getpnn_send(destnode, done))?;
        let pnn = self.getpnn_recv(&req);
        self.free_request(req);
        Ok(pnn?)
    }

    /// Blocking [`Connection::getpublicips_send`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if sending, waiting or unpacking fails.
    pub fn getpublicips(&mut self, destnode: u32) -> Result<Vec<PublicIp>, SyncError> {
        let req = self.round_trip("getpublicips", |conn, done| {
            conn.getpublicips_send(destnode, done)
        })?;
        let ips = self.getpublicips_recv(&req);
        self.free_request(req);
        Ok(ips?)
    }

    /// Blocking [`Connection::getdbpath_send`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if sending, waiting or unpacking fails.
    pub fn getdbpath(&mut self, destnode: u32, db: DbId) -> Result<Utf8PathBuf, SyncError> {
        let req = self.round_trip("getdbpath", |conn, done| {
            conn.getdbpath_send(destnode, db, done)
        })?;
        let path = self.getdbpath_recv(&req);
        self.free_request(req);
        Ok(path?)
    }

    /// Blocking [`Connection::set_message_handler_send`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the registration is refused or waiting
    /// fails; the handler is then dropped.
    pub fn set_message_handler(
        &mut self,
        srvid: u64,
        handler: impl FnMut(&mut Self, u64, &[u8]) + 'static,
    ) -> Result<HandlerId, SyncError> {
        let mut req = self.round_trip("set_message_handler", |conn, done| {
            conn.set_message_handler_send(srvid, handler, done)
        })?;
        let id = self.set_message_handler_recv(&mut req);
        self.free_request(req);
        Ok(id?)
    }

    /// Blocking [`Connection::remove_message_handler_send`].
    ///
    /// Returns how many local handlers were removed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the deregistration is refused or waiting
    /// fails.
    pub fn remove_message_handler(&mut self, srvid: u64) -> Result<usize, SyncError> {
        let mut req = self.round_trip("remove_message_handler", |conn, done| {
            conn.remove_message_handler_send(srvid, done)
        })?;
        let removed = self.remove_message_handler_recv(&mut req);
        self.free_request(req);
        Ok(removed?)
    }

    /// Blocking [`Connection::attach_db_send`].
    ///
    /// If waiting fails, whichever control of the sequence is still
    /// outstanding is cancelled and the store is never opened.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if any step of the attach fails.
    pub fn attach_db(
        &mut self,
        name: &str,
        persistent: bool,
        opener: StoreOpener,
    ) -> Result<DbId, SyncError> {
        self.warn_if_locked("attach_db");
        let outcome = Outcome::new();
        let (_, stage) =
            self.attach_db_staged(name, persistent, opener, Box::new(outcome.callback()))?;
        let waited = self.synchronous(None, &outcome);
        if waited.is_err() {
            self.abandon_wait(stage.get());
        }
        Ok(waited??)
    }

    /// Blocking [`Connection::readrecordlock_async`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Lock`] if the lock is refused and
    /// [`SyncError::Failed`] if the record could not be migrated here.
    pub fn readrecordlock(
        &mut self,
        db: DbId,
        key: &[u8],
        readonly: bool,
    ) -> Result<Lock, SyncError> {
        self.warn_if_locked("readrecordlock");
        let outcome = Outcome::new();
        let handle = self.readrecordlock_async(db, key, readonly, outcome.callback())?;
        self.synchronous(handle, &outcome)?
            .ok_or(SyncError::Failed)
    }
}
