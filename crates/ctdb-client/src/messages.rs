//! Cluster message subscriptions and delivery.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use ctdb_protocol::{ControlOpcode, ControlRequest, Message, Packet};

use crate::connection::Connection;
use crate::errors::{ReplyError, SendError};
use crate::log::Severity;
use crate::request::{Completion, Request, RequestExtra, RequestHandle, RequestKind};

/// Receives every message published on a subscribed channel.
pub type MessageHandler = Box<dyn FnMut(&mut Connection, u64, &[u8])>;

/// Identifies one installed handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

pub(crate) struct HandlerRegistration {
    id: HandlerId,
    srvid: u64,
    handler: Rc<RefCell<MessageHandler>>,
}

impl fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("id", &self.id)
            .field("srvid", &self.srvid)
            .finish_non_exhaustive()
    }
}

/// Installed handlers; several may share a srvid.
#[derive(Debug, Default)]
pub(crate) struct HandlerTable {
    entries: Vec<HandlerRegistration>,
    next_id: u64,
    /// Set while handlers run; messages read by a nested `service` call wait
    /// in `backlog` until the outermost delivery returns.
    delivering: bool,
    backlog: VecDeque<(u64, Vec<u8>)>,
}

impl HandlerTable {
    pub(crate) fn prepare(&mut self, srvid: u64, handler: MessageHandler) -> HandlerRegistration {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        HandlerRegistration {
            id,
            srvid,
            handler: Rc::new(RefCell::new(handler)),
        }
    }

    pub(crate) fn install(&mut self, registration: HandlerRegistration) -> HandlerId {
        let id = registration.id;
        self.entries.push(registration);
        id
    }

    pub(crate) fn remove_srvid(&mut self, srvid: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.srvid != srvid);
        before - self.entries.len()
    }

    pub(crate) fn remove(&mut self, id: HandlerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        before != self.entries.len()
    }

    pub(crate) fn matching(&self, srvid: u64) -> Vec<Rc<RefCell<MessageHandler>>> {
        self.entries
            .iter()
            .filter(|entry| entry.srvid == srvid)
            .map(|entry| Rc::clone(&entry.handler))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.backlog.clear();
    }
}

impl Connection {
    /// Queues a message for every client subscribed to `srvid` on `pnn`.
    ///
    /// Messages have no reply: the request is released as soon as it has
    /// been written.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Encode`] for oversized payloads.
    pub fn send_message(
        &mut self,
        pnn: u32,
        srvid: u64,
        data: &[u8],
    ) -> Result<RequestHandle, SendError> {
        let reqid = self.registry.allocate_reqid();
        let frame = Message { srvid, data }.encode(pnn, reqid)?;
        Ok(self.push_request(reqid, RequestKind::Message, frame, Completion::Discard, None))
    }

    /// Asks the daemon to route `srvid` messages to this client.
    ///
    /// `handler` is installed by [`Connection::set_message_handler_recv`]
    /// once the daemon has accepted the registration; until then it rides on
    /// the request and is dropped with it.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Encode`] if the control cannot be framed.
    pub fn set_message_handler_send(
        &mut self,
        srvid: u64,
        handler: impl FnMut(&mut Self, u64, &[u8]) + 'static,
        callback: impl FnOnce(&mut Self, Request) + 'static,
    ) -> Result<RequestHandle, SendError> {
        let registration = self.handlers.prepare(srvid, Box::new(handler));
        self.control_send_with(
            ctdb_protocol::CURRENT_NODE,
            ControlRequest::new(ControlOpcode::RegisterSrvid, &[]).with_srvid(srvid),
            Completion::Notify(Box::new(callback)),
            Some(RequestExtra::Register(registration)),
        )
    }

    /// Installs the handler carried by a completed registration request.
    ///
    /// # Errors
    ///
    /// Fails when the request is not a registration or the daemon refused it;
    /// the handler is then dropped.
    pub fn set_message_handler_recv(&mut self, req: &mut Request) -> Result<HandlerId, ReplyError> {
        let reply = self.control_reply(req, ControlOpcode::RegisterSrvid)?;
        if reply.status != 0 {
            return Err(ReplyError::Status {
                status: reply.status,
            });
        }
        match req.extra.take() {
            Some(RequestExtra::Register(registration)) => {
                let id = self.handlers.install(registration);
                self.log(
                    Severity::Debug,
                    &format_args!("installed message handler {id:?}"),
                );
                Ok(id)
            }
            other => {
                req.extra = other;
                Err(ReplyError::WrongKind {
                    expected: "handler registration",
                    found: req.kind.name(),
                })
            }
        }
    }

    /// Asks the daemon to stop routing `srvid` messages to this client.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Encode`] if the control cannot be framed.
    pub fn remove_message_handler_send(
        &mut self,
        srvid: u64,
        callback: impl FnOnce(&mut Self, Request) + 'static,
    ) -> Result<RequestHandle, SendError> {
        self.control_send_with(
            ctdb_protocol::CURRENT_NODE,
            ControlRequest::new(ControlOpcode::DeregisterSrvid, &[]).with_srvid(srvid),
            Completion::Notify(Box::new(callback)),
            Some(RequestExtra::Deregister { srvid }),
        )
    }

    /// Removes every local handler for the deregistered srvid.
    ///
    /// Returns how many handlers were removed.
    ///
    /// # Errors
    ///
    /// Fails when the request is not a deregistration or the daemon refused
    /// it; local handlers are then left in place.
    pub fn remove_message_handler_recv(&mut self, req: &mut Request) -> Result<usize, ReplyError> {
        let reply = self.control_reply(req, ControlOpcode::DeregisterSrvid)?;
        if reply.status != 0 {
            return Err(ReplyError::Status {
                status: reply.status,
            });
        }
        match req.extra.take() {
            Some(RequestExtra::Deregister { srvid }) => Ok(self.handlers.remove_srvid(srvid)),
            other => {
                req.extra = other;
                Err(ReplyError::WrongKind {
                    expected: "handler deregistration",
                    found: req.kind.name(),
                })
            }
        }
    }

    /// Removes one installed handler without telling the daemon.
    ///
    /// Returns `false` if no such handler is installed.
    pub fn drop_message_handler(&mut self, id: HandlerId) -> bool {
        self.handlers.remove(id)
    }

    /// Number of installed message handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn deliver_message(&mut self, packet: &Packet) {
        let message = match packet.message() {
            Ok(message) => message,
            Err(error) => {
                self.log(
                    Severity::Critical,
                    &format_args!("malformed message frame: {error}"),
                );
                return;
            }
        };

        if self.handlers.delivering {
            self.log(
                Severity::Debug,
                &format_args!(
                    "deferring srvid {:#x} message until the running handler returns",
                    message.srvid
                ),
            );
            self.handlers
                .backlog
                .push_back((message.srvid, message.data.to_vec()));
            return;
        }

        self.handlers.delivering = true;
        self.dispatch_message(message.srvid, message.data);
        while let Some((srvid, data)) = self.handlers.backlog.pop_front() {
            self.dispatch_message(srvid, &data);
        }
        self.handlers.delivering = false;
    }

    fn dispatch_message(&mut self, srvid: u64, data: &[u8]) {
        let handlers = self.handlers.matching(srvid);
        if handlers.is_empty() {
            self.log(
                Severity::Warning,
                &format_args!("no handler for message srvid {srvid:#x}"),
            );
            return;
        }

        for handler in handlers {
            match handler.try_borrow_mut() {
                Ok(mut handler) => (*handler)(self, srvid, data),
                Err(_) => self.log(
                    Severity::Critical,
                    &format_args!("message handler for srvid {srvid:#x} is already running"),
                ),
            }
        }
    }
}
