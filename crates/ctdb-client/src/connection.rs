//! The daemon connection: socket, queues, handler table and lock state.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use camino::Utf8Path;
use ctdb_config::DEFAULT_SOCKET_PATH;
use ctdb_protocol::{CURRENT_NODE, Packet};
use socket2::{Domain, SockAddr, Socket, Type};

use crate::errors::ConnectError;
use crate::frame::FrameBuffer;
use crate::lock::LockTracker;
use crate::log::{ClientLogger, Severity};
use crate::messages::HandlerTable;
use crate::registry::Registry;
use crate::request::{Completion, Membership, Request, RequestExtra, RequestHandle, RequestKind};
use crate::store::{Database, DbId};

/// Readiness the embedding event loop should wait for, or has observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Events {
    /// The socket has data (or an error, or hang-up) to read.
    pub readable: bool,
    /// The socket can accept more outbound bytes.
    pub writable: bool,
}

impl Events {
    /// Read interest only.
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };

    /// Both read and write interest.
    pub const READ_WRITE: Self = Self {
        readable: true,
        writable: true,
    };

    /// Converts to a `poll(2)` event mask.
    #[must_use]
    pub const fn to_poll_flags(self) -> libc::c_short {
        let mut flags = 0;
        if self.readable {
            flags |= libc::POLLIN;
        }
        if self.writable {
            flags |= libc::POLLOUT;
        }
        flags
    }

    /// Interprets a `poll(2)` result mask.
    ///
    /// Hang-up and error conditions count as readable so the next read
    /// observes them.
    #[must_use]
    pub const fn from_poll_flags(revents: libc::c_short) -> Self {
        Self {
            readable: revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0,
            writable: revents & libc::POLLOUT != 0,
        }
    }
}

/// A client connection to the local ctdbd.
///
/// All I/O happens inside [`Connection::service`], which the embedder calls
/// whenever the descriptor reported by [`Connection::fd`] is ready for the
/// events named by [`Connection::which_events`]. Callbacks run synchronously
/// inside `service` and receive the connection mutably, so they may issue
/// further requests.
///
/// A connection is single-threaded by construction.
pub struct Connection {
    pub(crate) stream: UnixStream,
    pub(crate) broken: bool,
    pub(crate) registry: Registry,
    pub(crate) inbound: Option<FrameBuffer>,
    pub(crate) inbound_complete: VecDeque<Packet>,
    pub(crate) handlers: HandlerTable,
    pub(crate) locks: LockTracker,
    pub(crate) databases: BTreeMap<DbId, Database>,
    pub(crate) pnn: Option<u32>,
    logger: Arc<dyn ClientLogger>,
}

impl Connection {
    /// Connects to ctdbd at `path`, or at the well-known socket when `None`.
    ///
    /// The returned connection already has a request for this node's number
    /// queued; it is answered on the first few calls to `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the socket cannot be created, connected or
    /// configured. The socket is closed before returning.
    pub fn connect(
        path: Option<&Utf8Path>,
        logger: Arc<dyn ClientLogger>,
    ) -> Result<Self, ConnectError> {
        let socket_path = path.unwrap_or_else(|| Utf8Path::new(DEFAULT_SOCKET_PATH));
        let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(|source| {
            ConnectError::Socket {
                path: socket_path.to_owned(),
                source,
            }
        })?;
        let address = SockAddr::unix(socket_path.as_std_path()).map_err(|source| {
            ConnectError::Socket {
                path: socket_path.to_owned(),
                source,
            }
        })?;
        socket
            .set_cloexec(true)
            .map_err(|source| ConnectError::Configure {
                path: socket_path.to_owned(),
                source,
            })?;
        socket
            .connect(&address)
            .map_err(|source| ConnectError::Connect {
                path: socket_path.to_owned(),
                source,
            })?;
        let stream: UnixStream = socket.into();
        stream
            .set_nonblocking(true)
            .map_err(|source| ConnectError::Configure {
                path: socket_path.to_owned(),
                source,
            })?;
        Self::with_stream(stream, logger)
    }

    /// Wraps an already connected stream, for embedders that manage their own
    /// socket setup.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Stream`] if the stream cannot be made
    /// non-blocking.
    pub fn from_stream(
        stream: UnixStream,
        logger: Arc<dyn ClientLogger>,
    ) -> Result<Self, ConnectError> {
        stream.set_nonblocking(true).map_err(ConnectError::Stream)?;
        Self::with_stream(stream, logger)
    }

    fn with_stream(
        stream: UnixStream,
        logger: Arc<dyn ClientLogger>,
    ) -> Result<Self, ConnectError> {
        let mut connection = Self {
            stream,
            broken: false,
            registry: Registry::default(),
            inbound: None,
            inbound_complete: VecDeque::new(),
            handlers: HandlerTable::default(),
            locks: LockTracker::default(),
            databases: BTreeMap::new(),
            pnn: None,
            logger,
        };
        connection.getpnn_send(CURRENT_NODE, Self::record_pnn)?;
        Ok(connection)
    }

    fn record_pnn(&mut self, req: Request) {
        match self.getpnn_recv(&req) {
            Ok(pnn) => {
                self.log(Severity::Debug, &format_args!("local node is pnn {pnn}"));
                self.pnn = Some(pnn);
            }
            Err(error) => {
                self.log(
                    Severity::Critical,
                    &format_args!("failed to learn this node's pnn: {error}"),
                );
                self.broken = true;
            }
        }
        self.free_request(req);
    }

    /// Tears the connection down.
    ///
    /// Queued requests are freed without running their callbacks, handlers
    /// and attached databases are dropped, and the socket is closed.
    pub fn disconnect(mut self) {
        let abandoned = self.registry.drain();
        if !abandoned.is_empty() {
            self.log(
                Severity::Debug,
                &format_args!("disconnect abandons {} queued requests", abandoned.len()),
            );
        }
        drop(abandoned);
        self.inbound = None;
        self.inbound_complete.clear();
        self.handlers.clear();
        self.locks = LockTracker::default();
        self.databases.clear();
    }

    /// Descriptor to poll.
    #[must_use]
    pub fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Events to poll for: always readable, writable while requests wait to
    /// be written.
    #[must_use]
    pub fn which_events(&self) -> Events {
        Events {
            readable: true,
            writable: self.registry.has_outgoing(),
        }
    }

    /// This node's cluster number, once the bootstrap request has completed.
    #[must_use]
    pub const fn pnn(&self) -> Option<u32> {
        self.pnn
    }

    /// Whether a fatal transport error has been latched.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.broken
    }

    /// Requests still queued, written or not.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.registry.len()
    }

    /// Stops the caller being notified about a queued request.
    ///
    /// The request stays queued so a partially written frame is completed,
    /// and is freed silently when its reply arrives. Cancelling a handle
    /// that is no longer queued is a caller bug and is only logged.
    pub fn cancel(&mut self, handle: RequestHandle) {
        match self.registry.find_mut(handle) {
            Some(request) => {
                request.completion = Completion::Discard;
                let reqid = request.reqid;
                self.log(
                    Severity::Debug,
                    &format_args!("cancelled request {handle} (reqid {reqid})"),
                );
            }
            None => self.log(
                Severity::Alert,
                &format_args!("cancel of request {handle} which is not queued"),
            ),
        }
    }

    /// Frees a completed request together with any auxiliary state.
    ///
    /// A request that still claims a queue is put back there and cancelled
    /// instead.
    pub fn free_request(&mut self, mut request: Request) {
        if request.membership != Membership::Detached {
            self.log(
                Severity::Alert,
                &format_args!(
                    "free of request {} still on the {:?} queue; cancelling instead",
                    request.handle, request.membership
                ),
            );
            request.completion = Completion::Discard;
            self.registry.restore(request);
            return;
        }
        if let Some(extra) = request.extra.take() {
            self.release_extra(request.handle, extra);
        }
    }

    fn release_extra(&mut self, handle: RequestHandle, extra: RequestExtra) {
        match extra {
            RequestExtra::Lock(pending) => {
                self.locks.abandon(handle);
                drop(pending);
            }
            RequestExtra::Register(registration) => drop(registration),
            RequestExtra::Deregister { .. } => {}
        }
    }

    /// Routes a detached, replied request to its continuation.
    pub(crate) fn complete(&mut self, mut request: Request) {
        match std::mem::replace(&mut request.completion, Completion::Discard) {
            Completion::Notify(callback) => callback(self, request),
            Completion::Discard => self.free_request(request),
        }
    }

    /// Queues an encoded frame under a freshly allocated handle.
    pub(crate) fn push_request(
        &mut self,
        reqid: u32,
        kind: RequestKind,
        frame: Vec<u8>,
        completion: Completion,
        extra: Option<RequestExtra>,
    ) -> RequestHandle {
        let handle = self.registry.allocate_handle();
        let request = Request::new(handle, reqid, kind, frame, completion, extra);
        self.log(
            Severity::Debug,
            &format_args!("queued {} request {handle} (reqid {reqid})", kind.name()),
        );
        self.registry.push_outgoing(request);
        handle
    }

    /// Re-queues a detached request under its existing handle and reqid.
    pub(crate) fn requeue(&mut self, mut request: Request) {
        request.reply = None;
        request.io.reset();
        self.registry.push_outgoing(request);
    }

    pub(crate) fn log(&self, severity: Severity, message: &fmt::Arguments<'_>) {
        self.logger.log(severity, message);
    }
}

impl AsRawFd for Connection {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl AsFd for Connection {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.stream.as_fd()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("fd", &self.stream.as_raw_fd())
            .field("broken", &self.broken)
            .field("pnn", &self.pnn)
            .field("outstanding", &self.registry.len())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
