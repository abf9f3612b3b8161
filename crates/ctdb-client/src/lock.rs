//! Record locks: local acquisition, migration round trips and release.
//!
//! A connection holds at most one record lock, and may have at most one
//! acquisition in flight. A lock is genuinely held once the record's chain
//! lock is taken in the local store and this node owns the record (or, for
//! read-only locks, holds a read-only delegation). Otherwise the record is
//! migrated here with a null call and the local attempt is repeated.

use std::fmt;

use ctdb_protocol::{
    CTDB_IMMEDIATE_MIGRATION, CTDB_NULL_FUNC, CTDB_REC_RO_HAVE_READONLY, CTDB_WANT_READONLY,
    CURRENT_NODE, CallRequest, Operation,
};

use crate::connection::Connection;
use crate::errors::{LockError, ReplyError, SendError};
use crate::log::Severity;
use crate::request::{Completion, Request, RequestExtra, RequestHandle, RequestKind};
use crate::store::{DbId, RecordHeader, StoredRecord};

/// Receives the outcome of a lock acquisition: the lock, or `None` if the
/// record could not be brought local.
pub type LockCallback = Box<dyn FnOnce(&mut Connection, Option<Lock>)>;

/// One held record lock.
///
/// Hand it back to [`Connection::release_lock`]; dropping it leaves the
/// chain lock taken and the connection unable to lock anything else.
#[derive(Debug)]
#[must_use = "a lock must be released with Connection::release_lock"]
pub struct Lock {
    token: u64,
    db: DbId,
    key: Vec<u8>,
    readonly: bool,
    header: RecordHeader,
    data: Vec<u8>,
}

impl Lock {
    /// Database the record lives in.
    #[must_use]
    pub const fn db(&self) -> DbId {
        self.db
    }

    /// Locked key.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Whether the lock only permits reading.
    #[must_use]
    pub const fn readonly(&self) -> bool {
        self.readonly
    }

    /// Record header as read under the lock.
    #[must_use]
    pub const fn header(&self) -> &RecordHeader {
        &self.header
    }

    /// Record value as read under the lock, or last written through it.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// An acquisition waiting for its migration call to be answered.
pub(crate) struct PendingLock {
    db: DbId,
    key: Vec<u8>,
    readonly: bool,
    callback: LockCallback,
}

impl fmt::Debug for PendingLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingLock")
            .field("db", &self.db)
            .field("key", &self.key)
            .field("readonly", &self.readonly)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub(crate) struct LockTracker {
    held: Option<u64>,
    acquiring: Option<RequestHandle>,
    next_token: u64,
}

impl LockTracker {
    pub(crate) const fn is_busy(&self) -> bool {
        self.held.is_some() || self.acquiring.is_some()
    }

    pub(crate) const fn is_holding(&self) -> bool {
        self.held.is_some()
    }

    const fn begin(&mut self, handle: RequestHandle) {
        self.acquiring = Some(handle);
    }

    const fn hold(&mut self) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.held = Some(token);
        self.acquiring = None;
        token
    }

    fn holds(&self, token: u64) -> bool {
        self.held == Some(token)
    }

    fn release(&mut self, token: u64) -> bool {
        if self.holds(token) {
            self.held = None;
            true
        } else {
            false
        }
    }

    /// Forgets an acquisition whose request went away.
    pub(crate) fn abandon(&mut self, handle: RequestHandle) {
        if self.acquiring == Some(handle) {
            self.acquiring = None;
        }
    }
}

impl Connection {
    /// Starts acquiring the lock on `key` in `db`.
    ///
    /// If the record is already owned locally `callback` runs before this
    /// returns and `Ok(None)` is returned. Otherwise a migration call is
    /// queued and its handle returned; `callback` runs from `service` once
    /// the record has arrived, or with `None` if migration failed.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::AlreadyHeld`] while another lock is held or
    /// being acquired, and store or framing failures otherwise. `callback`
    /// is not run on error.
    pub fn readrecordlock_async(
        &mut self,
        db: DbId,
        key: &[u8],
        readonly: bool,
        callback: impl FnOnce(&mut Self, Option<Lock>) + 'static,
    ) -> Result<Option<RequestHandle>, LockError> {
        if self.locks.is_busy() {
            self.log(
                Severity::Alert,
                &format_args!("lock requested on {db} while another lock is outstanding"),
            );
            return Err(LockError::AlreadyHeld);
        }

        if let Some(record) = self.lock_locally(db, key, readonly)? {
            let lock = self.grant(db, key.to_vec(), readonly, record);
            callback(self, Some(lock));
            return Ok(None);
        }

        let reqid = self.registry.allocate_reqid();
        let frame = migration_call(db, key, readonly)
            .encode(CURRENT_NODE, reqid)
            .map_err(SendError::from)?;
        let pending = PendingLock {
            db,
            key: key.to_vec(),
            readonly,
            callback: Box::new(callback),
        };
        let handle = self.push_request(
            reqid,
            RequestKind::Call {
                callid: CTDB_NULL_FUNC,
            },
            frame,
            Completion::Notify(Box::new(Self::lock_migrated)),
            Some(RequestExtra::Lock(pending)),
        );
        self.locks.begin(handle);
        Ok(Some(handle))
    }

    fn lock_migrated(&mut self, mut req: Request) {
        let Some(RequestExtra::Lock(pending)) = req.extra.take() else {
            self.log(
                Severity::Critical,
                &format_args!("lock reply {} lost its pending lock", req.handle),
            );
            self.locks.abandon(req.handle);
            self.free_request(req);
            return;
        };

        if let Err(error) = unpack_migration(&req) {
            self.log(
                Severity::Error,
                &format_args!("migrating record in {} failed: {error}", pending.db),
            );
            self.fail_lock(req, pending);
            return;
        }

        match self.lock_locally(pending.db, &pending.key, pending.readonly) {
            Ok(Some(record)) => {
                self.free_request(req);
                let PendingLock {
                    db,
                    key,
                    readonly,
                    callback,
                } = pending;
                let lock = self.grant(db, key, readonly, record);
                callback(self, Some(lock));
            }
            Ok(None) => {
                self.log(
                    Severity::Debug,
                    &format_args!(
                        "record in {} moved away again; re-sending request {}",
                        pending.db, req.handle
                    ),
                );
                req.extra = Some(RequestExtra::Lock(pending));
                req.completion = Completion::Notify(Box::new(Self::lock_migrated));
                self.requeue(req);
            }
            Err(error) => {
                self.log(
                    Severity::Error,
                    &format_args!("locking record in {} failed: {error}", pending.db),
                );
                self.fail_lock(req, pending);
            }
        }
    }

    fn fail_lock(&mut self, req: Request, pending: PendingLock) {
        self.locks.abandon(req.handle);
        self.free_request(req);
        (pending.callback)(self, None);
    }

    /// Takes the chain lock and keeps it only if the record is usable here.
    fn lock_locally(
        &mut self,
        db: DbId,
        key: &[u8],
        readonly: bool,
    ) -> Result<Option<StoredRecord>, LockError> {
        let pnn = self.pnn;
        let database = self
            .databases
            .get_mut(&db)
            .ok_or(LockError::UnknownDatabase(db))?;
        database.store.chain_lock(key).map_err(LockError::Store)?;
        let fetched = match database.store.fetch(key) {
            Ok(fetched) => fetched,
            Err(error) => {
                database.store.chain_unlock(key);
                return Err(LockError::Store(error));
            }
        };
        match fetched {
            Some(record) if is_usable(&record.header, pnn, readonly) => Ok(Some(record)),
            _ => {
                database.store.chain_unlock(key);
                Ok(None)
            }
        }
    }

    fn grant(&mut self, db: DbId, key: Vec<u8>, readonly: bool, record: StoredRecord) -> Lock {
        let token = self.locks.hold();
        self.log(
            Severity::Debug,
            &format_args!("holding {} lock in {db}", lock_mode(readonly)),
        );
        Lock {
            token,
            db,
            key,
            readonly,
            header: record.header,
            data: record.data,
        }
    }

    /// Releases a held lock.
    ///
    /// A lock this connection does not hold is logged and otherwise ignored.
    pub fn release_lock(&mut self, lock: Lock) {
        let Lock { token, db, key, .. } = lock;
        if !self.locks.release(token) {
            self.log(
                Severity::Alert,
                &format_args!("release of a lock in {db} that is not held"),
            );
            return;
        }
        match self.databases.get_mut(&db) {
            Some(database) => database.store.chain_unlock(&key),
            None => self.log(
                Severity::Alert,
                &format_args!("lock released after {db} was detached"),
            ),
        }
    }

    /// Replaces the locked record's value.
    ///
    /// # Errors
    ///
    /// Refuses read-only locks, locks not held by this connection and
    /// persistent databases; otherwise propagates store failures.
    pub fn write_record(&mut self, lock: &mut Lock, data: &[u8]) -> Result<(), LockError> {
        if lock.readonly {
            return Err(LockError::ReadOnly);
        }
        if !self.locks.holds(lock.token) {
            return Err(LockError::NotHeld);
        }
        let database = self
            .databases
            .get_mut(&lock.db)
            .ok_or(LockError::UnknownDatabase(lock.db))?;
        if database.persistent {
            return Err(LockError::Persistent(lock.db));
        }
        database
            .store
            .store(&lock.key, &lock.header, data)
            .map_err(LockError::Store)?;
        lock.data = data.to_vec();
        Ok(())
    }

    /// Whether a record lock is currently held.
    #[must_use]
    pub const fn holding_lock(&self) -> bool {
        self.locks.is_holding()
    }
}

fn is_usable(header: &RecordHeader, pnn: Option<u32>, readonly: bool) -> bool {
    pnn.is_some_and(|pnn| header.dmaster == pnn)
        || (readonly && header.flags & CTDB_REC_RO_HAVE_READONLY != 0)
}

const fn migration_call(db: DbId, key: &[u8], readonly: bool) -> CallRequest<'_> {
    CallRequest {
        flags: if readonly {
            CTDB_WANT_READONLY
        } else {
            CTDB_IMMEDIATE_MIGRATION
        },
        db_id: db.0,
        callid: CTDB_NULL_FUNC,
        hopcount: 0,
        key,
        calldata: &[],
    }
}

fn unpack_migration(req: &Request) -> Result<(), ReplyError> {
    if !matches!(req.kind, RequestKind::Call { .. }) {
        return Err(ReplyError::WrongKind {
            expected: "call",
            found: req.kind.name(),
        });
    }
    let reply = req.reply.as_ref().ok_or(ReplyError::NoReply)?;
    if reply.operation() != Operation::ReplyCall {
        return Err(ReplyError::WrongReply {
            expected: Operation::ReplyCall,
            found: reply.operation(),
        });
    }
    match reply.call_reply()?.status {
        0 => Ok(()),
        status => Err(ReplyError::Status { status }),
    }
}

const fn lock_mode(readonly: bool) -> &'static str {
    if readonly { "read-only" } else { "exclusive" }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;

    use super::*;
    use crate::connection::Events;
    use crate::log::TracingLogger;
    use crate::store::{Database, MockRecordStore};
    use rstest::rstest;

    const DB: DbId = DbId(0x42);
    const PNN: u32 = 3;

    fn connection_with(store: MockRecordStore) -> (Connection, UnixStream) {
        let (client, daemon) = UnixStream::pair().expect("socket pair");
        let mut conn = Connection::from_stream(client, Arc::new(TracingLogger::new()))
            .expect("connection");
        conn.pnn = Some(PNN);
        conn.databases.insert(
            DB,
            Database {
                persistent: false,
                store: Box::new(store),
            },
        );
        (conn, daemon)
    }

    fn record(dmaster: u32, flags: u32) -> StoredRecord {
        StoredRecord {
            header: RecordHeader {
                rsn: 7,
                dmaster,
                flags,
            },
            data: b"value".to_vec(),
        }
    }

    #[rstest]
    #[case(PNN, 0, false, true)]
    #[case(PNN + 1, 0, false, false)]
    #[case(PNN + 1, CTDB_REC_RO_HAVE_READONLY, true, true)]
    #[case(PNN + 1, CTDB_REC_RO_HAVE_READONLY, false, false)]
    fn usability_follows_ownership_and_delegation(
        #[case] dmaster: u32,
        #[case] flags: u32,
        #[case] readonly: bool,
        #[case] expected: bool,
    ) {
        let header = record(dmaster, flags).header;
        assert_eq!(is_usable(&header, Some(PNN), readonly), expected);
    }

    #[rstest]
    fn unknown_pnn_never_owns_a_record() {
        assert!(!is_usable(&record(0, 0).header, None, false));
    }

    #[rstest]
    fn local_record_is_locked_without_a_round_trip() {
        let mut store = MockRecordStore::new();
        store.expect_chain_lock().times(1).returning(|_| Ok(()));
        store
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(Some(record(PNN, 0))));
        store.expect_chain_unlock().times(1).return_const(());
        let (mut conn, _daemon) = connection_with(store);
        let queued = conn.outstanding();

        let granted = std::rc::Rc::new(std::cell::RefCell::new(None));
        let sink = std::rc::Rc::clone(&granted);
        let handle = conn
            .readrecordlock_async(DB, b"key", false, move |_, lock| {
                *sink.borrow_mut() = lock;
            })
            .expect("lock");

        assert!(handle.is_none());
        assert_eq!(conn.outstanding(), queued);
        assert!(conn.holding_lock());
        let lock = granted.borrow_mut().take().expect("lock granted");
        assert_eq!(lock.data(), b"value");
        assert_eq!(lock.header().rsn, 7);
        conn.release_lock(lock);
        assert!(!conn.holding_lock());
    }

    #[rstest]
    fn remote_record_queues_a_migration_call() {
        let mut store = MockRecordStore::new();
        store.expect_chain_lock().times(1).returning(|_| Ok(()));
        store
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(Some(record(PNN + 1, 0))));
        store.expect_chain_unlock().times(1).return_const(());
        let (mut conn, _daemon) = connection_with(store);
        let queued = conn.outstanding();

        let handle = conn
            .readrecordlock_async(DB, b"key", false, |_, _| panic!("no reply yet"))
            .expect("lock");

        assert!(handle.is_some());
        assert_eq!(conn.outstanding(), queued + 1);
        assert!(!conn.holding_lock());
        assert!(matches!(
            conn.readrecordlock_async(DB, b"other", false, |_, _| {}),
            Err(LockError::AlreadyHeld)
        ));
    }

    #[rstest]
    fn cancelled_acquisition_frees_the_lock_slot() {
        let mut store = MockRecordStore::new();
        store.expect_chain_lock().returning(|_| Ok(()));
        store.expect_fetch().returning(|_| Ok(None));
        store.expect_chain_unlock().return_const(());
        let (mut conn, _daemon) = connection_with(store);
        let handle = conn
            .readrecordlock_async(DB, b"key", true, |_, _| panic!("cancelled"))
            .expect("lock")
            .expect("migration queued");

        conn.cancel(handle);
        assert!(conn.locks.is_busy());
        conn.service(Events {
            readable: false,
            writable: true,
        })
        .expect("flush");
        let reqid = conn
            .registry
            .find_mut(handle)
            .map(|req| req.reqid)
            .expect("awaiting reply");
        let req = conn.registry.take_done(reqid).expect("detached");
        conn.complete(req);

        assert!(!conn.locks.is_busy());
    }

    #[rstest]
    fn store_failure_releases_the_chain_lock() {
        let mut store = MockRecordStore::new();
        store.expect_chain_lock().times(1).returning(|_| Ok(()));
        store
            .expect_fetch()
            .times(1)
            .returning(|_| Err(std::io::Error::other("corrupt")));
        store.expect_chain_unlock().times(1).return_const(());
        let (mut conn, _daemon) = connection_with(store);

        let result = conn.readrecordlock_async(DB, b"key", false, |_, _| {});

        assert!(matches!(result, Err(LockError::Store(_))));
        assert!(!conn.locks.is_busy());
    }

    #[rstest]
    fn unknown_database_is_refused() {
        let (mut conn, _daemon) = connection_with(MockRecordStore::new());
        let result = conn.readrecordlock_async(DbId(1), b"key", false, |_, _| {});
        assert!(matches!(result, Err(LockError::UnknownDatabase(DbId(1)))));
    }

    #[rstest]
    fn oversized_key_fails_to_queue_the_migration() {
        let mut store = MockRecordStore::new();
        store.expect_chain_lock().times(1).returning(|_| Ok(()));
        store
            .expect_fetch()
            .times(1)
            .returning(|_| Ok(Some(record(PNN + 1, 0))));
        store.expect_chain_unlock().times(1).return_const(());
        let (mut conn, _daemon) = connection_with(store);
        let queued = conn.outstanding();
        let key = vec![0_u8; ctdb_protocol::MAX_FRAME_LEN];

        let result = conn.readrecordlock_async(DB, &key, false, |_, _| panic!("not queued"));

        assert!(matches!(
            result,
            Err(LockError::Send(SendError::Encode(_)))
        ));
        assert_eq!(conn.outstanding(), queued);
        assert!(!conn.locks.is_busy());
    }

    #[rstest]
    fn read_only_locks_cannot_write() {
        let mut store = MockRecordStore::new();
        store.expect_chain_lock().returning(|_| Ok(()));
        store
            .expect_fetch()
            .returning(|_| Ok(Some(record(PNN, 0))));
        store.expect_chain_unlock().return_const(());
        store.expect_store().never();
        let (mut conn, _daemon) = connection_with(store);
        let granted = std::rc::Rc::new(std::cell::RefCell::new(None));
        let sink = std::rc::Rc::clone(&granted);
        conn.readrecordlock_async(DB, b"key", true, move |_, lock| {
            *sink.borrow_mut() = lock;
        })
        .expect("lock");
        let mut lock = granted.borrow_mut().take().expect("lock granted");

        assert!(matches!(
            conn.write_record(&mut lock, b"new"),
            Err(LockError::ReadOnly)
        ));
        conn.release_lock(lock);
    }

    #[rstest]
    fn writes_go_through_the_held_header() {
        let mut store = MockRecordStore::new();
        store.expect_chain_lock().returning(|_| Ok(()));
        store
            .expect_fetch()
            .returning(|_| Ok(Some(record(PNN, 0))));
        store.expect_chain_unlock().return_const(());
        store
            .expect_store()
            .withf(|key, header, data| key == b"key" && header.rsn == 7 && data == b"new")
            .times(1)
            .returning(|_, _, _| Ok(()));
        let (mut conn, _daemon) = connection_with(store);
        let granted = std::rc::Rc::new(std::cell::RefCell::new(None));
        let sink = std::rc::Rc::clone(&granted);
        conn.readrecordlock_async(DB, b"key", false, move |_, lock| {
            *sink.borrow_mut() = lock;
        })
        .expect("lock");
        let mut lock = granted.borrow_mut().take().expect("lock granted");

        conn.write_record(&mut lock, b"new").expect("write");

        assert_eq!(lock.data(), b"new");
        conn.release_lock(lock);
    }
}
