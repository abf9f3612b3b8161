//! The fixed 32-byte header that prefixes every frame.

use crate::codec::{ByteReader, ByteWriter, peek_u32};
use crate::error::DecodeError;

/// Size of the encoded header in bytes.
pub const HEADER_LEN: usize = 32;

/// "CTDB" in little-endian byte order.
pub const CTDB_MAGIC: u32 = 0x4354_4442;

/// Protocol revision spoken by this client.
pub const CTDB_PROTOCOL: u32 = 1;

/// Frames are padded to a multiple of this many bytes.
pub const FRAME_ALIGNMENT: usize = 8;

/// Largest frame either side will accept.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Destination meaning "whichever node this client is attached to".
pub const CURRENT_NODE: u32 = 0xF000_0001;

/// Destination meaning "every node in the cluster".
pub const BROADCAST_ALL: u32 = 0xF000_0002;

/// Operation code carried in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Data-record call request.
    ReqCall,
    /// Reply to a data-record call.
    ReplyCall,
    /// Record migration request (daemon internal).
    ReqDmaster,
    /// Record migration reply (daemon internal).
    ReplyDmaster,
    /// Error reply.
    ReplyError,
    /// Cluster message, also used for unsolicited notifications.
    ReqMessage,
    /// Control request.
    ReqControl,
    /// Reply to a control request.
    ReplyControl,
    /// Keepalive between daemons.
    ReqKeepalive,
    /// Any code this client does not recognise.
    Unknown(u32),
}

impl Operation {
    /// Maps a wire code onto an operation.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            0 => Self::ReqCall,
            1 => Self::ReplyCall,
            2 => Self::ReqDmaster,
            3 => Self::ReplyDmaster,
            4 => Self::ReplyError,
            5 => Self::ReqMessage,
            7 => Self::ReqControl,
            8 => Self::ReplyControl,
            9 => Self::ReqKeepalive,
            other => Self::Unknown(other),
        }
    }

    /// Returns the wire code.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::ReqCall => 0,
            Self::ReplyCall => 1,
            Self::ReqDmaster => 2,
            Self::ReplyDmaster => 3,
            Self::ReplyError => 4,
            Self::ReqMessage => 5,
            Self::ReqControl => 7,
            Self::ReplyControl => 8,
            Self::ReqKeepalive => 9,
            Self::Unknown(code) => code,
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Total frame length, including this header and padding.
    pub length: u32,
    /// Protocol revision.
    pub version: u32,
    /// Cluster generation the sender believed current.
    pub generation: u32,
    /// What the frame is.
    pub operation: Operation,
    /// Node the frame is addressed to.
    pub destnode: u32,
    /// Node the frame came from.
    pub srcnode: u32,
    /// Correlation id.
    pub reqid: u32,
}

impl Header {
    /// Builds a client-originated header; `length` is filled in by the encoder.
    #[must_use]
    pub const fn new(operation: Operation, destnode: u32, reqid: u32) -> Self {
        Self {
            length: 0,
            version: CTDB_PROTOCOL,
            generation: 0,
            operation,
            destnode,
            srcnode: 0,
            reqid,
        }
    }

    /// Decodes the first [`HEADER_LEN`] bytes of `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Truncated`] for short input and
    /// [`DecodeError::BadMagic`] when the magic number does not match.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut reader = ByteReader::new(bytes);
        let length = reader.u32("header.length")?;
        let magic = reader.u32("header.magic")?;
        if magic != CTDB_MAGIC {
            return Err(DecodeError::BadMagic { found: magic });
        }
        Ok(Self {
            length,
            version: reader.u32("header.version")?,
            generation: reader.u32("header.generation")?,
            operation: Operation::from_code(reader.u32("header.operation")?),
            destnode: reader.u32("header.destnode")?,
            srcnode: reader.u32("header.srcnode")?,
            reqid: reader.u32("header.reqid")?,
        })
    }

    pub(crate) fn encode(&self, writer: &mut ByteWriter) {
        writer
            .u32(self.length)
            .u32(CTDB_MAGIC)
            .u32(self.version)
            .u32(self.generation)
            .u32(self.operation.code())
            .u32(self.destnode)
            .u32(self.srcnode)
            .u32(self.reqid);
    }

    /// Reads the length prefix of a partially received frame.
    #[must_use]
    pub fn peek_length(bytes: &[u8]) -> Option<u32> {
        peek_u32(bytes, 0)
    }
}

/// Rounds `len` up to the frame alignment.
#[must_use]
pub const fn padded_len(len: usize) -> usize {
    len.next_multiple_of(FRAME_ALIGNMENT)
}
