//! The dispatcher: moves bytes and routes completed frames.

use std::io;

use ctdb_protocol::{Operation, Packet};

use crate::connection::{Connection, Events};
use crate::errors::ServiceError;
use crate::frame::FrameBuffer;
use crate::log::Severity;
use crate::request::RequestKind;

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

impl Connection {
    /// Performs whatever I/O `events` allows and runs the callbacks of every
    /// request whose reply arrived. Never blocks.
    ///
    /// Frames completed before a fatal read error are still dispatched.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] for fatal transport conditions. The
    /// condition is latched: every later call fails with
    /// [`ServiceError::Broken`] without touching the queues.
    pub fn service(&mut self, events: Events) -> Result<(), ServiceError> {
        if self.broken {
            return Err(ServiceError::Broken);
        }
        if events.writable {
            self.flush_outgoing()?;
        }
        let outcome = if events.readable {
            self.fill_inbound()
        } else {
            Ok(())
        };
        self.dispatch_inbound();
        outcome
    }

    fn flush_outgoing(&mut self) -> Result<(), ServiceError> {
        while let Some(request) = self.registry.front_outgoing_mut() {
            match request.io.write_to(&mut self.stream) {
                Ok(_) if request.io.is_finished() => {}
                Ok(_) => return Ok(()),
                Err(error) if is_transient(&error) => return Ok(()),
                Err(error) => {
                    self.broken = true;
                    self.log(
                        Severity::Error,
                        &format_args!("write to ctdbd failed: {error}"),
                    );
                    return Err(ServiceError::Write(error));
                }
            }

            let Some(written) = self.registry.pop_outgoing() else {
                break;
            };
            if written.kind == RequestKind::Message {
                // No reply will ever claim a message.
                self.free_request(written);
            } else {
                self.registry.push_done(written);
            }
        }
        Ok(())
    }

    fn fill_inbound(&mut self) -> Result<(), ServiceError> {
        let mut first = true;
        loop {
            let available = match self.pending_bytes() {
                Ok(available) => available,
                Err(error) => return Err(self.fail_read(ServiceError::Ioctl(error))),
            };
            // A readable socket with nothing queued has hit EOF or an error;
            // the read below reports which.
            if available == 0 && !first {
                return Ok(());
            }
            first = false;

            let inbound = self.inbound.get_or_insert_with(FrameBuffer::for_header);
            match inbound.read_from(&mut self.stream) {
                Ok(0) => return Err(self.fail_read(ServiceError::Closed)),
                Ok(_) => {}
                Err(error) if is_transient(&error) => return Ok(()),
                Err(error) if error.kind() == io::ErrorKind::InvalidData => {
                    return Err(self.fail_read(ServiceError::Frame(error)));
                }
                Err(error) => return Err(self.fail_read(ServiceError::Read(error))),
            }

            if inbound.is_finished() {
                if let Some(frame) = self.inbound.take() {
                    self.queue_inbound(frame);
                }
            }
        }
    }

    fn fail_read(&mut self, error: ServiceError) -> ServiceError {
        self.broken = true;
        self.log(
            Severity::Error,
            &format_args!("read from ctdbd failed: {error}"),
        );
        error
    }

    fn queue_inbound(&mut self, frame: FrameBuffer) {
        match Packet::decode(frame.into_bytes()) {
            Ok(packet) => self.inbound_complete.push_back(packet),
            Err(error) => self.log(
                Severity::Critical,
                &format_args!("discarding malformed frame from ctdbd: {error}"),
            ),
        }
    }

    fn pending_bytes(&self) -> io::Result<usize> {
        let mut available: libc::c_int = 0;
        // SAFETY: FIONREAD writes a single c_int through the pointer, which
        // refers to a live local for the duration of the call.
        let rc = unsafe { libc::ioctl(self.fd(), libc::FIONREAD, &raw mut available) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(usize::try_from(available).unwrap_or(0))
    }

    fn dispatch_inbound(&mut self) {
        while let Some(packet) = self.inbound_complete.pop_front() {
            self.dispatch(packet);
        }
    }

    fn dispatch(&mut self, packet: Packet) {
        if packet.operation() == Operation::ReqMessage {
            self.deliver_message(&packet);
            return;
        }

        let reqid = packet.reqid();
        match self.registry.take_done(reqid) {
            Some(mut request) => {
                self.log(
                    Severity::Debug,
                    &format_args!(
                        "reply {:?} for request {} (reqid {reqid})",
                        packet.operation(),
                        request.handle
                    ),
                );
                request.reply = Some(packet);
                self.complete(request);
            }
            None => self.log(
                Severity::Warning,
                &format_args!(
                    "unexpected ctdbd reply: operation {:?}, reqid {reqid}",
                    packet.operation()
                ),
            ),
        }
    }
}
