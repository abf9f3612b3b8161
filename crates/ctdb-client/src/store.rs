//! Boundary to the local record store backing an attached database.
//!
//! The client does not implement a storage engine. Embedders supply a
//! [`RecordStore`] when attaching a database; the lock path uses it to take
//! chain locks and inspect record headers.

use std::fmt;
use std::io;

use camino::Utf8Path;

/// Identifier the daemon assigned to an attached database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DbId(pub u32);

impl fmt::Display for DbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Per-record metadata kept alongside the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordHeader {
    /// Record sequence number.
    pub rsn: u64,
    /// Node that currently owns the authoritative copy.
    pub dmaster: u32,
    /// Record flags, such as read-only delegation state.
    pub flags: u32,
}

/// A record as read from the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredRecord {
    /// Record metadata.
    pub header: RecordHeader,
    /// Record value.
    pub data: Vec<u8>,
}

/// Local key/value store with per-key chain locks.
#[cfg_attr(test, mockall::automock)]
pub trait RecordStore {
    /// Takes the chain lock covering `key`, blocking until it is available.
    ///
    /// # Errors
    ///
    /// Returns the store's I/O failure.
    fn chain_lock(&mut self, key: &[u8]) -> io::Result<()>;

    /// Releases the chain lock covering `key`.
    fn chain_unlock(&mut self, key: &[u8]);

    /// Reads `key`, returning `None` when it is absent.
    ///
    /// # Errors
    ///
    /// Returns the store's I/O failure.
    fn fetch(&mut self, key: &[u8]) -> io::Result<Option<StoredRecord>>;

    /// Writes `key` while its chain lock is held.
    ///
    /// # Errors
    ///
    /// Returns the store's I/O failure.
    fn store(&mut self, key: &[u8], header: &RecordHeader, data: &[u8]) -> io::Result<()>;
}

/// Opens the local store at the path the daemon reports for a database.
///
/// The flag is `true` for persistent databases.
pub type StoreOpener = Box<dyn FnOnce(&Utf8Path, bool) -> io::Result<Box<dyn RecordStore>>>;

/// A database attached on this connection.
pub(crate) struct Database {
    pub(crate) persistent: bool,
    pub(crate) store: Box<dyn RecordStore>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}
