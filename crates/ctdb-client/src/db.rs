//! Attaching databases: `DB_ATTACH`, then `GETDBPATH`, then the local open.

use std::cell::Cell;
use std::rc::Rc;

use ctdb_protocol::{ControlOpcode, ControlRequest, CURRENT_NODE, encode_u32_payload};

use crate::connection::Connection;
use crate::errors::{AttachError, SendError};
use crate::log::Severity;
use crate::request::{Completion, Request, RequestHandle, RequestKind};
use crate::store::{Database, DbId, StoreOpener};

/// Receives the outcome of [`Connection::attach_db_send`].
pub type AttachCallback = Box<dyn FnOnce(&mut Connection, Result<DbId, AttachError>)>;

/// The request currently carrying an attach sequence forward.
pub(crate) type AttachStage = Rc<Cell<Option<RequestHandle>>>;

struct PendingAttach {
    stage: AttachStage,
    persistent: bool,
    opener: StoreOpener,
    callback: AttachCallback,
}

impl PendingAttach {
    fn fail(self, conn: &mut Connection, error: AttachError) {
        conn.log(
            Severity::Error,
            &format_args!("database attach failed: {error}"),
        );
        (self.callback)(conn, Err(error));
    }
}

impl Connection {
    /// Attaches the database called `name` and opens its local store.
    ///
    /// Two controls are exchanged with the daemon before `opener` is called
    /// with the database path. `callback` runs from `service` with the new
    /// id, or with the first failure in the sequence. The returned handle
    /// names the first control only.
    ///
    /// # Errors
    ///
    /// Returns [`SendError`] if the first control cannot be framed;
    /// `callback` is then dropped unrun.
    pub fn attach_db_send(
        &mut self,
        name: &str,
        persistent: bool,
        opener: StoreOpener,
        callback: impl FnOnce(&mut Self, Result<DbId, AttachError>) + 'static,
    ) -> Result<RequestHandle, SendError> {
        let (first, _) = self.attach_db_staged(name, persistent, opener, Box::new(callback))?;
        Ok(first)
    }

    /// Starts an attach, returning the first control's handle and a cell
    /// that names whichever control of the sequence is outstanding.
    pub(crate) fn attach_db_staged(
        &mut self,
        name: &str,
        persistent: bool,
        opener: StoreOpener,
        callback: AttachCallback,
    ) -> Result<(RequestHandle, AttachStage), SendError> {
        let stage = AttachStage::default();
        let pending = PendingAttach {
            stage: Rc::clone(&stage),
            persistent,
            opener,
            callback,
        };
        let first = self.db_attach_send(name, persistent, move |conn, req| {
            conn.attach_replied(req, pending);
        })?;
        stage.set(Some(first));
        Ok((first, stage))
    }

    fn attach_replied(&mut self, req: Request, pending: PendingAttach) {
        let attached = self.db_attach_recv(&req);
        self.free_request(req);
        let db = match attached {
            Ok(db) => db,
            Err(error) => return pending.fail(self, error.into()),
        };

        let payload = encode_u32_payload(db.0);
        let reqid = self.registry.allocate_reqid();
        match ControlRequest::new(ControlOpcode::GetDbPath, &payload).encode(CURRENT_NODE, reqid)
        {
            Ok(frame) => {
                let stage = Rc::clone(&pending.stage);
                let lookup = self.push_request(
                    reqid,
                    RequestKind::Control(ControlOpcode::GetDbPath),
                    frame,
                    Completion::Notify(Box::new(move |conn: &mut Self, path_req| {
                        conn.path_replied(path_req, db, pending);
                    })),
                    None,
                );
                stage.set(Some(lookup));
            }
            Err(error) => pending.fail(self, SendError::from(error).into()),
        }
    }

    fn path_replied(&mut self, req: Request, db: DbId, pending: PendingAttach) {
        let located = self.getdbpath_recv(&req);
        self.free_request(req);
        let path = match located {
            Ok(path) => path,
            Err(error) => return pending.fail(self, error.into()),
        };

        let PendingAttach {
            stage: _,
            persistent,
            opener,
            callback,
        } = pending;
        match opener(&path, persistent) {
            Ok(store) => {
                let previous = self
                    .databases
                    .insert(db, Database { persistent, store });
                if previous.is_some() {
                    self.log(
                        Severity::Warning,
                        &format_args!("database {db} attached twice; replacing its store"),
                    );
                }
                self.log(
                    Severity::Debug,
                    &format_args!("attached database {db} at {path}"),
                );
                callback(self, Ok(db));
            }
            Err(source) => {
                let error = AttachError::Open { path, source };
                self.log(
                    Severity::Error,
                    &format_args!("database attach failed: {error}"),
                );
                callback(self, Err(error));
            }
        }
    }

    /// Forgets a locally attached database and closes its store.
    ///
    /// The daemon keeps the database attached. Returns `false` if `db` was
    /// not attached on this connection.
    pub fn detach_db(&mut self, db: DbId) -> bool {
        self.databases.remove(&db).is_some()
    }

    /// Whether `db` is attached on this connection.
    #[must_use]
    pub fn is_attached(&self, db: DbId) -> bool {
        self.databases.contains_key(&db)
    }
}
