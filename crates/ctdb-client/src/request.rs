//! Request objects and their completion continuations.

use std::fmt;

use ctdb_protocol::{ControlOpcode, Operation, Packet};

use crate::connection::Connection;
use crate::frame::FrameBuffer;
use crate::lock::PendingLock;
use crate::messages::HandlerRegistration;

/// Stable identifier for a request, valid for as long as it is queued.
///
/// Handles are never reused on a connection, unlike correlation ids which
/// are recycled once no queued request carries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestHandle(pub(crate) u64);

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which container currently owns a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    /// Waiting to be written, or partially written.
    Outgoing,
    /// Fully written, waiting for a reply.
    Done,
    /// Owned by the caller; no queue refers to it.
    Detached,
}

/// What was sent, used by the unpackers to reject mismatched requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Control(ControlOpcode),
    Call { callid: u32 },
    Message,
}

impl RequestKind {
    pub(crate) const fn name(self) -> &'static str {
        match self {
            Self::Control(_) => "control",
            Self::Call { .. } => "call",
            Self::Message => "message",
        }
    }

    pub(crate) const fn operation(self) -> Operation {
        match self {
            Self::Control(_) => Operation::ReqControl,
            Self::Call { .. } => Operation::ReqCall,
            Self::Message => Operation::ReqMessage,
        }
    }
}

/// Continuation invoked, inside `service`, once a reply has been attached.
pub type Callback = Box<dyn FnOnce(&mut Connection, Request)>;

pub(crate) enum Completion {
    Notify(Callback),
    /// The caller lost interest; free the request on completion.
    Discard,
}

/// Auxiliary state whose release is tied to the request's lifetime.
pub(crate) enum RequestExtra {
    Register(HandlerRegistration),
    Deregister { srvid: u64 },
    Lock(PendingLock),
}

/// One round trip to the daemon.
pub struct Request {
    pub(crate) handle: RequestHandle,
    pub(crate) reqid: u32,
    pub(crate) membership: Membership,
    pub(crate) kind: RequestKind,
    pub(crate) io: FrameBuffer,
    pub(crate) reply: Option<Packet>,
    pub(crate) completion: Completion,
    pub(crate) extra: Option<RequestExtra>,
}

impl Request {
    pub(crate) fn new(
        handle: RequestHandle,
        reqid: u32,
        kind: RequestKind,
        frame: Vec<u8>,
        completion: Completion,
        extra: Option<RequestExtra>,
    ) -> Self {
        Self {
            handle,
            reqid,
            membership: Membership::Detached,
            kind,
            io: FrameBuffer::from_frame(&frame),
            reply: None,
            completion,
            extra,
        }
    }

    /// Handle the request was issued under.
    #[must_use]
    pub const fn handle(&self) -> RequestHandle {
        self.handle
    }

    /// Correlation id carried in the request header.
    #[must_use]
    pub const fn reqid(&self) -> u32 {
        self.reqid
    }

    /// Current owner of the request.
    #[must_use]
    pub const fn membership(&self) -> Membership {
        self.membership
    }

    /// Operation of the outbound frame.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.kind.operation()
    }

    /// Encoded outbound frame.
    #[must_use]
    pub fn outbound(&self) -> &[u8] {
        self.io.contents()
    }

    /// Reply frame, once one has arrived.
    #[must_use]
    pub const fn reply(&self) -> Option<&Packet> {
        self.reply.as_ref()
    }

    pub(crate) const fn is_discarded(&self) -> bool {
        matches!(self.completion, Completion::Discard)
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("handle", &self.handle)
            .field("reqid", &self.reqid)
            .field("membership", &self.membership)
            .field("kind", &self.kind)
            .field("written", &self.io.progress())
            .field("replied", &self.reply.is_some())
            .field("discarded", &self.is_discarded())
            .finish_non_exhaustive()
    }
}
