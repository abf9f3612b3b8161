//! Shared fixtures: a scripted daemon, a recording logger and an in-memory
//! record store.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use ctdb_protocol::{
    CallReply, ControlOpcode, ControlReply, HEADER_LEN, Header, Message, Packet,
};

use crate::{ClientLogger, Connection, RecordHeader, RecordStore, Severity, StoredRecord};

/// Node number the scripted daemon reports for itself.
pub(crate) const LOCAL_PNN: u32 = 2;

/// Daemon end of a socket pair, driven step by step from the test.
pub(crate) struct FakeDaemon {
    stream: UnixStream,
}

impl FakeDaemon {
    pub(crate) fn new(stream: UnixStream) -> Self {
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set daemon read timeout");
        Self { stream }
    }

    /// Reads one complete request frame; the length prefix covers padding.
    pub(crate) fn read_frame(&mut self) -> Packet {
        let mut bytes = vec![0; HEADER_LEN];
        self.stream
            .read_exact(&mut bytes)
            .expect("read request header");
        let declared = Header::peek_length(&bytes).expect("length prefix");
        let len = usize::try_from(declared).expect("length fits usize");
        bytes.resize(len, 0);
        self.stream
            .read_exact(bytes.get_mut(HEADER_LEN..).expect("body slot"))
            .expect("read request body");
        Packet::decode(bytes).expect("well-formed request")
    }

    /// Reads one frame and checks it is the expected control.
    pub(crate) fn expect_control(&mut self, opcode: ControlOpcode) -> Packet {
        let packet = self.read_frame();
        let control = packet.control_request().expect("control request");
        assert_eq!(control.opcode, opcode, "unexpected control");
        packet
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write to client");
    }

    pub(crate) fn reply_control(&mut self, reqid: u32, status: i32, data: &[u8]) {
        let frame = control_reply_frame(reqid, status, data);
        self.write_raw(&frame);
    }

    pub(crate) fn reply_call(&mut self, reqid: u32, status: i32) {
        let frame = CallReply { status, data: &[] }
            .encode(0, reqid)
            .expect("encode call reply");
        self.write_raw(&frame);
    }

    pub(crate) fn publish(&mut self, srvid: u64, data: &[u8]) {
        let frame = Message { srvid, data }
            .encode(0, 0)
            .expect("encode message");
        self.write_raw(&frame);
    }

    /// Answers the pnn request every new connection starts with.
    pub(crate) fn answer_bootstrap(&mut self) {
        let packet = self.expect_control(ControlOpcode::GetPnn);
        let status = i32::try_from(LOCAL_PNN).expect("pnn fits");
        self.reply_control(packet.reqid(), status, &[]);
    }

    pub(crate) fn stream_mut(&mut self) -> &mut UnixStream {
        &mut self.stream
    }

    pub(crate) fn close(self) {
        drop(self.stream);
    }
}

pub(crate) fn control_reply_frame(reqid: u32, status: i32, data: &[u8]) -> Vec<u8> {
    ControlReply {
        status,
        data,
        error: &[],
    }
    .encode(0, reqid)
    .expect("encode control reply")
}

/// Logger that keeps every message for later inspection.
#[derive(Clone, Default)]
pub(crate) struct RecordingLogger {
    entries: Arc<Mutex<Vec<(Severity, String)>>>,
}

impl RecordingLogger {
    pub(crate) fn count(&self, severity: Severity) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(level, _)| *level == severity)
            .count()
    }

    pub(crate) fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(level, message)| *level == severity && message.contains(needle))
    }
}

impl ClientLogger for RecordingLogger {
    fn log(&self, severity: Severity, message: &fmt::Arguments<'_>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((severity, message.to_string()));
    }
}

/// Opens a connection over a socket pair, returning both ends.
pub(crate) fn connected(logger: &RecordingLogger) -> (Connection, FakeDaemon) {
    let (client, daemon) = UnixStream::pair().expect("socket pair");
    let conn = Connection::from_stream(client, Arc::new(logger.clone())).expect("connection");
    (conn, FakeDaemon::new(daemon))
}

/// Contents of an in-memory store, shared with the test.
pub(crate) type Records = Rc<RefCell<HashMap<Vec<u8>, StoredRecord>>>;

/// In-memory store sharing its records and chain-lock state with the test.
#[derive(Default)]
pub(crate) struct MemoryStore {
    pub(crate) records: Records,
    pub(crate) locked: Rc<RefCell<Vec<Vec<u8>>>>,
}

impl MemoryStore {
    pub(crate) fn put(&self, key: &[u8], dmaster: u32, data: &[u8]) {
        self.records.borrow_mut().insert(
            key.to_vec(),
            StoredRecord {
                header: RecordHeader {
                    rsn: 1,
                    dmaster,
                    flags: 0,
                },
                data: data.to_vec(),
            },
        );
    }

    pub(crate) fn handle(&self) -> Self {
        Self {
            records: Rc::clone(&self.records),
            locked: Rc::clone(&self.locked),
        }
    }
}

impl RecordStore for MemoryStore {
    fn chain_lock(&mut self, key: &[u8]) -> io::Result<()> {
        let mut locked = self.locked.borrow_mut();
        if locked.iter().any(|held| held == key) {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                "chain already locked",
            ));
        }
        locked.push(key.to_vec());
        Ok(())
    }

    fn chain_unlock(&mut self, key: &[u8]) {
        self.locked.borrow_mut().retain(|held| held != key);
    }

    fn fetch(&mut self, key: &[u8]) -> io::Result<Option<StoredRecord>> {
        Ok(self.records.borrow().get(key).cloned())
    }

    fn store(&mut self, key: &[u8], header: &RecordHeader, data: &[u8]) -> io::Result<()> {
        self.records.borrow_mut().insert(
            key.to_vec(),
            StoredRecord {
                header: *header,
                data: data.to_vec(),
            },
        );
        Ok(())
    }
}
