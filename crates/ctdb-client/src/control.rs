//! Control requests: the shared constructor and the per-control packers.

use camino::Utf8PathBuf;
use ctdb_protocol::{
    ControlOpcode, ControlReply, ControlRequest, Operation, PublicIp, decode_public_ips,
    decode_u32_payload, encode_u32_payload,
};

use crate::connection::Connection;
use crate::errors::{ReplyError, SendError};
use crate::log::Severity;
use crate::request::{Completion, Request, RequestExtra, RequestHandle, RequestKind};
use crate::store::DbId;

impl Connection {
    /// Queues an arbitrary control request.
    ///
    /// `callback` runs inside `service` once the reply has arrived; unpack it
    /// with [`Connection::control_reply`] or one of the typed `_recv`
    /// helpers.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::Encode`] for oversized payloads.
    pub fn control_send(
        &mut self,
        destnode: u32,
        opcode: ControlOpcode,
        srvid: u64,
        data: &[u8],
        callback: impl FnOnce(&mut Self, Request) + 'static,
    ) -> Result<RequestHandle, SendError> {
        self.control_send_with(
            destnode,
            ControlRequest::new(opcode, data).with_srvid(srvid),
            Completion::Notify(Box::new(callback)),
            None,
        )
    }

    pub(crate) fn control_send_with(
        &mut self,
        destnode: u32,
        control: ControlRequest<'_>,
        completion: Completion,
        extra: Option<RequestExtra>,
    ) -> Result<RequestHandle, SendError> {
        let reqid = self.registry.allocate_reqid();
        let frame = control.encode(destnode, reqid)?;
        Ok(self.push_request(
            reqid,
            RequestKind::Control(control.opcode),
            frame,
            completion,
            extra,
        ))
    }

    /// Checks that `req` is a replied `opcode` control and views its reply.
    ///
    /// The reply status is not interpreted: some controls carry their
    /// result in it.
    ///
    /// # Errors
    ///
    /// Returns a [`ReplyError`] describing the first mismatch found.
    pub fn control_reply<'r>(
        &self,
        req: &'r Request,
        opcode: ControlOpcode,
    ) -> Result<ControlReply<'r>, ReplyError> {
        let result = unpack_control(req, opcode);
        if let Err(error) = &result {
            self.log(
                Severity::Error,
                &format_args!("cannot unpack {opcode:?} reply: {error}"),
            );
        }
        result
    }

    /// Asks `destnode` for its cluster number.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the request cannot be framed.
    pub fn getpnn_send(
        &mut self,
        destnode: u32,
        callback: impl FnOnce(&mut Self, Request) + 'static,
    ) -> Result<RequestHandle, SendError> {
        self.control_send(destnode, ControlOpcode::GetPnn, 0, &[], callback)
    }

    /// Unpacks a cluster number; the daemon returns it in the status field.
    ///
    /// # Errors
    ///
    /// Fails on a mismatched request or a status of -1.
    pub fn getpnn_recv(&self, req: &Request) -> Result<u32, ReplyError> {
        let reply = self.control_reply(req, ControlOpcode::GetPnn)?;
        u32::try_from(reply.status).map_err(|_| ReplyError::Status {
            status: reply.status,
        })
    }

    /// Asks `destnode` for the public addresses it knows about.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the request cannot be framed.
    pub fn getpublicips_send(
        &mut self,
        destnode: u32,
        callback: impl FnOnce(&mut Self, Request) + 'static,
    ) -> Result<RequestHandle, SendError> {
        self.control_send(destnode, ControlOpcode::GetPublicIps, 0, &[], callback)
    }

    /// Unpacks a public address list.
    ///
    /// # Errors
    ///
    /// Fails on a mismatched request, a non-zero status, an empty payload or
    /// an undecodable list.
    pub fn getpublicips_recv(&self, req: &Request) -> Result<Vec<PublicIp>, ReplyError> {
        let data = successful(self.control_reply(req, ControlOpcode::GetPublicIps)?)?;
        if data.is_empty() {
            return Err(ReplyError::ShortPayload {
                expected: 4,
                actual: 0,
            });
        }
        Ok(decode_public_ips(data)?)
    }

    /// Asks `destnode` where database `db` is stored locally.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the request cannot be framed.
    pub fn getdbpath_send(
        &mut self,
        destnode: u32,
        db: DbId,
        callback: impl FnOnce(&mut Self, Request) + 'static,
    ) -> Result<RequestHandle, SendError> {
        self.control_send(
            destnode,
            ControlOpcode::GetDbPath,
            0,
            &encode_u32_payload(db.0),
            callback,
        )
    }

    /// Unpacks a database path.
    ///
    /// # Errors
    ///
    /// Fails on a mismatched request, a non-zero status, or an empty or
    /// non-UTF-8 path.
    pub fn getdbpath_recv(&self, req: &Request) -> Result<Utf8PathBuf, ReplyError> {
        let data = successful(self.control_reply(req, ControlOpcode::GetDbPath)?)?;
        let path = data.split(|byte| *byte == 0).next().unwrap_or_default();
        if path.is_empty() {
            return Err(ReplyError::ShortPayload {
                expected: 1,
                actual: 0,
            });
        }
        String::from_utf8(path.to_vec())
            .map(Utf8PathBuf::from)
            .map_err(|_| ReplyError::PathEncoding)
    }

    /// Asks the local daemon to attach the database called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the request cannot be framed.
    pub fn db_attach_send(
        &mut self,
        name: &str,
        persistent: bool,
        callback: impl FnOnce(&mut Self, Request) + 'static,
    ) -> Result<RequestHandle, SendError> {
        let mut payload = Vec::with_capacity(name.len() + 1);
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        self.control_send(
            ctdb_protocol::CURRENT_NODE,
            attach_opcode(persistent),
            0,
            &payload,
            callback,
        )
    }

    /// Unpacks the id of a freshly attached database.
    ///
    /// # Errors
    ///
    /// Fails on a mismatched request, a non-zero status or a short payload.
    pub fn db_attach_recv(&self, req: &Request) -> Result<DbId, ReplyError> {
        let opcode = match req.kind {
            RequestKind::Control(opcode @ ControlOpcode::DbAttachPersistent) => opcode,
            _ => ControlOpcode::DbAttach,
        };
        let data = successful(self.control_reply(req, opcode)?)?;
        Ok(DbId(decode_u32_payload(data)?))
    }
}

pub(crate) const fn attach_opcode(persistent: bool) -> ControlOpcode {
    if persistent {
        ControlOpcode::DbAttachPersistent
    } else {
        ControlOpcode::DbAttach
    }
}

fn unpack_control(req: &Request, opcode: ControlOpcode) -> Result<ControlReply<'_>, ReplyError> {
    match req.kind {
        RequestKind::Control(sent) if sent == opcode => {}
        RequestKind::Control(sent) => {
            return Err(ReplyError::WrongOpcode {
                expected: opcode,
                found: sent,
            });
        }
        other => {
            return Err(ReplyError::WrongKind {
                expected: "control",
                found: other.name(),
            });
        }
    }
    let reply = req.reply.as_ref().ok_or(ReplyError::NoReply)?;
    if reply.operation() != Operation::ReplyControl {
        return Err(ReplyError::WrongReply {
            expected: Operation::ReplyControl,
            found: reply.operation(),
        });
    }
    Ok(reply.control_reply()?)
}

fn successful(reply: ControlReply<'_>) -> Result<&[u8], ReplyError> {
    if reply.status == 0 {
        Ok(reply.data)
    } else {
        Err(ReplyError::Status {
            status: reply.status,
        })
    }
}
