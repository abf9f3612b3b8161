//! Control opcodes and call constants understood by this client.

use crate::codec::{ByteReader, ByteWriter};
use crate::error::DecodeError;

/// Administrative operations carried by a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOpcode {
    /// Look up the local path of an attached database.
    GetDbPath,
    /// Attach a volatile database by name.
    DbAttach,
    /// Subscribe this client to a message channel.
    RegisterSrvid,
    /// Drop a message channel subscription.
    DeregisterSrvid,
    /// Ask for the cluster number of the serving node.
    GetPnn,
    /// Attach a persistent database by name.
    DbAttachPersistent,
    /// List the public addresses served by a node.
    GetPublicIps,
    /// Any opcode this client does not issue.
    Other(u32),
}

impl ControlOpcode {
    /// Maps a wire opcode onto the enum.
    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            4 => Self::GetDbPath,
            18 => Self::DbAttach,
            23 => Self::RegisterSrvid,
            24 => Self::DeregisterSrvid,
            35 => Self::GetPnn,
            61 => Self::DbAttachPersistent,
            90 => Self::GetPublicIps,
            other => Self::Other(other),
        }
    }

    /// Returns the wire opcode.
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::GetDbPath => 4,
            Self::DbAttach => 18,
            Self::RegisterSrvid => 23,
            Self::DeregisterSrvid => 24,
            Self::GetPnn => 35,
            Self::DbAttachPersistent => 61,
            Self::GetPublicIps => 90,
            Self::Other(code) => code,
        }
    }
}

/// Encodes a `u32` control argument, such as a database id.
#[must_use]
pub fn encode_u32_payload(value: u32) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(4);
    writer.u32(value);
    writer.finish()
}

/// Decodes a `u32` control result, such as the id returned by an attach.
///
/// # Errors
///
/// Returns [`DecodeError::Truncated`] when fewer than four bytes are present.
pub fn decode_u32_payload(data: &[u8]) -> Result<u32, DecodeError> {
    ByteReader::new(data).u32("control.u32")
}

/// Call function that only migrates the record to the caller.
pub const CTDB_NULL_FUNC: u32 = 0xFF00_0001;

/// Ask the daemon to migrate the record immediately.
pub const CTDB_IMMEDIATE_MIGRATION: u32 = 0x0000_0002;

/// Ask for a read-only delegation instead of a migration.
pub const CTDB_WANT_READONLY: u32 = 0x0000_0004;

/// Record header flag: this node holds a read-only copy.
pub const CTDB_REC_RO_HAVE_READONLY: u32 = 0x0200_0000;
