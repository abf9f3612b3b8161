//! Operation-specific frame bodies.
//!
//! Each body borrows its variable-length payload, so the same type serves
//! for building outbound frames and for viewing received ones.

use crate::codec::{ByteReader, narrow};
use crate::control::ControlOpcode;
use crate::error::{DecodeError, EncodeError};
use crate::header::Operation;
use crate::packet::encode_frame;

/// Body of a [`Operation::ReqControl`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest<'a> {
    /// Which control is being invoked.
    pub opcode: ControlOpcode,
    /// Message channel argument, used by the srvid controls.
    pub srvid: u64,
    /// Client identifier, zero for requests from this library.
    pub client_id: u32,
    /// Control flags.
    pub flags: u32,
    /// Opcode-specific input.
    pub data: &'a [u8],
}

impl<'a> ControlRequest<'a> {
    const FIXED_LEN: usize = 28;

    /// Builds a control request with zeroed srvid, client id and flags.
    #[must_use]
    pub const fn new(opcode: ControlOpcode, data: &'a [u8]) -> Self {
        Self {
            opcode,
            srvid: 0,
            client_id: 0,
            flags: 0,
            data,
        }
    }

    /// Sets the message channel argument.
    #[must_use]
    pub const fn with_srvid(mut self, srvid: u64) -> Self {
        self.srvid = srvid;
        self
    }

    /// Encodes a complete, padded frame.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::FrameTooLarge`] when the payload would push the
    /// frame over the protocol limit.
    pub fn encode(&self, destnode: u32, reqid: u32) -> Result<Vec<u8>, EncodeError> {
        encode_frame(
            Operation::ReqControl,
            destnode,
            reqid,
            Self::FIXED_LEN + self.data.len(),
            |writer| {
                writer
                    .u32(self.opcode.code())
                    .u32(0)
                    .u64(self.srvid)
                    .u32(self.client_id)
                    .u32(self.flags)
                    .u32(narrow(self.data.len()))
                    .raw(self.data);
            },
        )
    }

    pub(crate) fn decode(reader: &mut ByteReader<'a>) -> Result<Self, DecodeError> {
        let opcode = ControlOpcode::from_code(reader.u32("control.opcode")?);
        reader.u32("control.pad")?;
        let srvid = reader.u64("control.srvid")?;
        let client_id = reader.u32("control.client_id")?;
        let flags = reader.u32("control.flags")?;
        let datalen = reader.u32("control.datalen")?;
        Ok(Self {
            opcode,
            srvid,
            client_id,
            flags,
            data: reader.sized("control.data", datalen)?,
        })
    }
}

/// Body of a [`Operation::ReplyControl`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlReply<'a> {
    /// Zero on success, otherwise a daemon-defined failure code.
    pub status: i32,
    /// Opcode-specific output.
    pub data: &'a [u8],
    /// Optional error text.
    pub error: &'a [u8],
}

impl<'a> ControlReply<'a> {
    const FIXED_LEN: usize = 12;

    /// Encodes a complete, padded reply frame.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::FrameTooLarge`] for oversized payloads.
    pub fn encode(&self, destnode: u32, reqid: u32) -> Result<Vec<u8>, EncodeError> {
        encode_frame(
            Operation::ReplyControl,
            destnode,
            reqid,
            Self::FIXED_LEN + self.data.len() + self.error.len(),
            |writer| {
                writer
                    .i32(self.status)
                    .u32(narrow(self.data.len()))
                    .u32(narrow(self.error.len()))
                    .raw(self.data)
                    .raw(self.error);
            },
        )
    }

    pub(crate) fn decode(reader: &mut ByteReader<'a>) -> Result<Self, DecodeError> {
        let status = reader.i32("control_reply.status")?;
        let datalen = reader.u32("control_reply.datalen")?;
        let errorlen = reader.u32("control_reply.errorlen")?;
        Ok(Self {
            status,
            data: reader.sized("control_reply.data", datalen)?,
            error: reader.sized("control_reply.error", errorlen)?,
        })
    }
}

/// Body of a [`Operation::ReqCall`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallRequest<'a> {
    /// Migration and delegation flags.
    pub flags: u32,
    /// Target database.
    pub db_id: u32,
    /// Registered call function.
    pub callid: u32,
    /// Forwarding count, zero from clients.
    pub hopcount: u32,
    /// Record key.
    pub key: &'a [u8],
    /// Input to the call function.
    pub calldata: &'a [u8],
}

impl<'a> CallRequest<'a> {
    const FIXED_LEN: usize = 24;

    /// Encodes a complete, padded frame.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::FrameTooLarge`] for oversized keys or payloads.
    pub fn encode(&self, destnode: u32, reqid: u32) -> Result<Vec<u8>, EncodeError> {
        encode_frame(
            Operation::ReqCall,
            destnode,
            reqid,
            Self::FIXED_LEN + self.key.len() + self.calldata.len(),
            |writer| {
                writer
                    .u32(self.flags)
                    .u32(self.db_id)
                    .u32(self.callid)
                    .u32(self.hopcount)
                    .u32(narrow(self.key.len()))
                    .u32(narrow(self.calldata.len()))
                    .raw(self.key)
                    .raw(self.calldata);
            },
        )
    }

    pub(crate) fn decode(reader: &mut ByteReader<'a>) -> Result<Self, DecodeError> {
        let flags = reader.u32("call.flags")?;
        let db_id = reader.u32("call.db_id")?;
        let callid = reader.u32("call.callid")?;
        let hopcount = reader.u32("call.hopcount")?;
        let keylen = reader.u32("call.keylen")?;
        let calldatalen = reader.u32("call.calldatalen")?;
        Ok(Self {
            flags,
            db_id,
            callid,
            hopcount,
            key: reader.sized("call.key", keylen)?,
            calldata: reader.sized("call.calldata", calldatalen)?,
        })
    }
}

/// Body of a [`Operation::ReplyCall`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallReply<'a> {
    /// Result of the call function.
    pub status: i32,
    /// Output of the call function.
    pub data: &'a [u8],
}

impl<'a> CallReply<'a> {
    const FIXED_LEN: usize = 8;

    /// Encodes a complete, padded reply frame.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::FrameTooLarge`] for oversized payloads.
    pub fn encode(&self, destnode: u32, reqid: u32) -> Result<Vec<u8>, EncodeError> {
        encode_frame(
            Operation::ReplyCall,
            destnode,
            reqid,
            Self::FIXED_LEN + self.data.len(),
            |writer| {
                writer
                    .i32(self.status)
                    .u32(narrow(self.data.len()))
                    .raw(self.data);
            },
        )
    }

    pub(crate) fn decode(reader: &mut ByteReader<'a>) -> Result<Self, DecodeError> {
        let status = reader.i32("call_reply.status")?;
        let datalen = reader.u32("call_reply.datalen")?;
        Ok(Self {
            status,
            data: reader.sized("call_reply.data", datalen)?,
        })
    }
}

/// Body of a [`Operation::ReqMessage`] frame, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    /// Channel the message is published on.
    pub srvid: u64,
    /// Opaque message payload.
    pub data: &'a [u8],
}

impl<'a> Message<'a> {
    const FIXED_LEN: usize = 12;

    /// Encodes a complete, padded frame.
    ///
    /// # Errors
    ///
    /// Returns [`EncodeError::FrameTooLarge`] for oversized payloads.
    pub fn encode(&self, destnode: u32, reqid: u32) -> Result<Vec<u8>, EncodeError> {
        encode_frame(
            Operation::ReqMessage,
            destnode,
            reqid,
            Self::FIXED_LEN + self.data.len(),
            |writer| {
                writer
                    .u64(self.srvid)
                    .u32(narrow(self.data.len()))
                    .raw(self.data);
            },
        )
    }

    pub(crate) fn decode(reader: &mut ByteReader<'a>) -> Result<Self, DecodeError> {
        let srvid = reader.u64("message.srvid")?;
        let datalen = reader.u32("message.datalen")?;
        Ok(Self {
            srvid,
            data: reader.sized("message.data", datalen)?,
        })
    }
}
