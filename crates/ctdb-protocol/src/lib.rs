//! Wire format spoken between ctdb clients and the local ctdbd.
//!
//! Frames are a 32-byte [`Header`] followed by an operation-specific body and
//! zero padding to an eight-byte boundary. Outbound frames are produced by the
//! `encode` methods on the body types; inbound frames are validated once into a
//! [`Packet`] whose accessors view the body without copying.
//!
//! This crate performs no I/O.

mod body;
mod codec;
mod control;
mod error;
mod header;
mod ips;
mod packet;

pub use body::{CallReply, CallRequest, ControlReply, ControlRequest, Message};
pub use control::{
    CTDB_IMMEDIATE_MIGRATION, CTDB_NULL_FUNC, CTDB_REC_RO_HAVE_READONLY, CTDB_WANT_READONLY,
    ControlOpcode, decode_u32_payload, encode_u32_payload,
};
pub use error::{DecodeError, EncodeError};
pub use header::{
    BROADCAST_ALL, CTDB_MAGIC, CTDB_PROTOCOL, CURRENT_NODE, FRAME_ALIGNMENT, HEADER_LEN, Header,
    MAX_FRAME_LEN, Operation, padded_len,
};
pub use ips::{PublicIp, decode_public_ips, encode_public_ips};
pub use packet::Packet;
