//! Growable buffer for one frame moving across a non-blocking socket.

use std::io::{self, Read, Write};

use bytes::BytesMut;
use ctdb_protocol::{HEADER_LEN, Header, MAX_FRAME_LEN};

/// One frame in flight, together with how much of it has been transferred.
///
/// Outbound buffers are created from a fully encoded frame and drained by
/// [`FrameBuffer::write_to`]. Inbound buffers start header-sized and grow to
/// the length the header declares once its prefix has arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    data: BytesMut,
    done: usize,
}

impl FrameBuffer {
    /// Allocates an empty buffer expecting `len` bytes.
    #[must_use]
    pub fn with_len(len: usize) -> Self {
        Self {
            data: BytesMut::zeroed(len),
            done: 0,
        }
    }

    /// Allocates a buffer for receiving a frame whose length is not yet known.
    #[must_use]
    pub fn for_header() -> Self {
        Self::with_len(HEADER_LEN)
    }

    /// Wraps an encoded frame ready to be written.
    #[must_use]
    pub fn from_frame(frame: &[u8]) -> Self {
        Self {
            data: BytesMut::from(frame),
            done: 0,
        }
    }

    /// The whole buffer, including any part not yet transferred.
    #[must_use]
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// Length of the frame as currently known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the buffer holds a zero-length frame.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes transferred so far.
    #[must_use]
    pub const fn progress(&self) -> usize {
        self.done
    }

    /// Whether every byte of the frame has been transferred.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.done == self.data.len()
    }

    /// Rewinds the transfer so the frame can be sent again.
    pub const fn reset(&mut self) {
        self.done = 0;
    }

    /// Releases the underlying bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        Vec::from(self.data)
    }

    /// Performs one read attempt into the untransferred part of the buffer.
    ///
    /// Once the header completes, the buffer grows to the declared frame
    /// length and one further read is attempted straight away; a
    /// `WouldBlock` from that second attempt is not an error.
    ///
    /// Returns the number of bytes received, with `Ok(0)` meaning the peer
    /// closed the stream. Must not be called on a finished buffer.
    ///
    /// # Errors
    ///
    /// Propagates errors from `reader` (including `WouldBlock`), and returns
    /// `InvalidData` if the header declares an impossible length.
    pub fn read_from<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let received = self.read_once(reader)?;
        if received == 0 || self.done != HEADER_LEN || self.data.len() != HEADER_LEN {
            return Ok(received);
        }

        let declared = self.declared_len()?;
        if declared == HEADER_LEN {
            return Ok(received);
        }
        self.data.resize(declared, 0);
        match self.read_once(reader) {
            Ok(more) => Ok(received + more),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(received)
            }
            Err(error) => Err(error),
        }
    }

    /// Performs one write attempt from the untransferred part of the buffer.
    ///
    /// # Errors
    ///
    /// Propagates errors from `writer`, including `WouldBlock`.
    pub fn write_to<W: Write + ?Sized>(&mut self, writer: &mut W) -> io::Result<usize> {
        let pending = self.data.get(self.done..).unwrap_or_default();
        let written = writer.write(pending)?;
        self.done = (self.done + written).min(self.data.len());
        Ok(written)
    }

    fn read_once<R: Read + ?Sized>(&mut self, reader: &mut R) -> io::Result<usize> {
        let Some(slot) = self.data.get_mut(self.done..) else {
            return Ok(0);
        };
        let received = reader.read(slot)?;
        self.done += received;
        Ok(received)
    }

    fn declared_len(&self) -> io::Result<usize> {
        let declared = Header::peek_length(&self.data)
            .and_then(|len| usize::try_from(len).ok())
            .unwrap_or(0);
        if (HEADER_LEN..=MAX_FRAME_LEN).contains(&declared) {
            Ok(declared)
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame declares impossible length {declared}"),
            ))
        }
    }
}
