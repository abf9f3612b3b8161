//! Complete received frames and the shared frame encoder.

use crate::body::{CallReply, CallRequest, ControlReply, ControlRequest, Message};
use crate::codec::{ByteReader, ByteWriter, narrow, widen};
use crate::error::{DecodeError, EncodeError};
use crate::header::{HEADER_LEN, Header, MAX_FRAME_LEN, Operation, padded_len};

/// A fully received frame, with its header decoded once up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: Header,
    bytes: Vec<u8>,
}

impl Packet {
    /// Validates and wraps a complete frame.
    ///
    /// # Errors
    ///
    /// Fails when the header is malformed or its length field disagrees with
    /// the number of bytes supplied.
    pub fn decode(bytes: Vec<u8>) -> Result<Self, DecodeError> {
        let header = Header::decode(&bytes)?;
        let declared = widen(header.length);
        if declared < HEADER_LEN || declared > bytes.len() {
            return Err(DecodeError::BadLength {
                declared: header.length,
                actual: bytes.len(),
            });
        }
        Ok(Self { header, bytes })
    }

    /// Decoded header.
    #[must_use]
    pub const fn header(&self) -> &Header {
        &self.header
    }

    /// Shorthand for the header's operation.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.header.operation
    }

    /// Shorthand for the header's correlation id.
    #[must_use]
    pub const fn reqid(&self) -> u32 {
        self.header.reqid
    }

    /// Raw frame bytes, header included.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Releases the raw frame.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn body(&self, expected: Operation) -> Result<ByteReader<'_>, DecodeError> {
        if self.header.operation != expected {
            return Err(DecodeError::UnexpectedOperation {
                expected,
                found: self.header.operation,
            });
        }
        let end = widen(self.header.length).min(self.bytes.len());
        let body = self.bytes.get(HEADER_LEN..end).unwrap_or_default();
        Ok(ByteReader::new(body))
    }

    /// Views the frame as a control request.
    ///
    /// # Errors
    ///
    /// Fails for other operations or truncated bodies.
    pub fn control_request(&self) -> Result<ControlRequest<'_>, DecodeError> {
        ControlRequest::decode(&mut self.body(Operation::ReqControl)?)
    }

    /// Views the frame as a control reply.
    ///
    /// # Errors
    ///
    /// Fails for other operations or truncated bodies.
    pub fn control_reply(&self) -> Result<ControlReply<'_>, DecodeError> {
        ControlReply::decode(&mut self.body(Operation::ReplyControl)?)
    }

    /// Views the frame as a call request.
    ///
    /// # Errors
    ///
    /// Fails for other operations or truncated bodies.
    pub fn call_request(&self) -> Result<CallRequest<'_>, DecodeError> {
        CallRequest::decode(&mut self.body(Operation::ReqCall)?)
    }

    /// Views the frame as a call reply.
    ///
    /// # Errors
    ///
    /// Fails for other operations or truncated bodies.
    pub fn call_reply(&self) -> Result<CallReply<'_>, DecodeError> {
        CallReply::decode(&mut self.body(Operation::ReplyCall)?)
    }

    /// Views the frame as a cluster message.
    ///
    /// # Errors
    ///
    /// Fails for other operations or truncated bodies.
    pub fn message(&self) -> Result<Message<'_>, DecodeError> {
        Message::decode(&mut self.body(Operation::ReqMessage)?)
    }
}

/// Writes a header followed by `body_len` bytes from `body`, then pads.
pub(crate) fn encode_frame(
    operation: Operation,
    destnode: u32,
    reqid: u32,
    body_len: usize,
    body: impl FnOnce(&mut ByteWriter),
) -> Result<Vec<u8>, EncodeError> {
    let len = padded_len(HEADER_LEN.saturating_add(body_len));
    if len > MAX_FRAME_LEN {
        return Err(EncodeError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut header = Header::new(operation, destnode, reqid);
    header.length = narrow(len);
    let mut writer = ByteWriter::with_capacity(len);
    header.encode(&mut writer);
    body(&mut writer);
    let pad = len.saturating_sub(writer.len());
    writer.zeros(pad);
    Ok(writer.finish())
}
