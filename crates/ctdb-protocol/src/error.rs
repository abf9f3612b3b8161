//! Error types for frame encoding and decoding.

use thiserror::Error;

use crate::header::Operation;

/// Errors raised while interpreting bytes received from the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame ended before the named field could be read.
    #[error("frame truncated while reading {field}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Field being decoded when the data ran out.
        field: &'static str,
        /// Number of bytes the field requires.
        needed: usize,
        /// Number of bytes left in the frame.
        available: usize,
    },
    /// The header carried an unexpected magic number.
    #[error("bad frame magic {found:#010x}")]
    BadMagic {
        /// Magic value found in the header.
        found: u32,
    },
    /// The header advertised a length inconsistent with the received bytes.
    #[error("frame declares length {declared} but {actual} bytes were received")]
    BadLength {
        /// Length field from the header.
        declared: u32,
        /// Number of bytes actually held.
        actual: usize,
    },
    /// A per-kind accessor was used on a frame of a different kind.
    #[error("expected a {expected:?} frame, found {found:?}")]
    UnexpectedOperation {
        /// Operation the accessor understands.
        expected: Operation,
        /// Operation carried by the frame.
        found: Operation,
    },
    /// A socket address used a family other than IPv4 or IPv6.
    #[error("unsupported address family {0}")]
    UnknownAddressFamily(u16),
}

/// Errors raised while building an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// The frame would exceed the protocol's maximum length.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Length the frame would have needed.
        len: usize,
        /// Maximum accepted frame length.
        max: usize,
    },
}
