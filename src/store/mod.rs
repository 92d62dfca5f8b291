/// Relational store
///
/// This module owns all durable state of the catalog:
/// - Connection setup and schema bootstrap (schema.rs)
/// - Shared row types (data.rs)
/// - Album, tag, item and settings statements (albums.rs, tags.rs, items.rs, settings.rs)
///
/// Statements run through a [`Session`], obtained either in autocommit mode
/// ([`Store::session`]) or inside one transaction ([`Store::with_transaction`]).

pub mod albums;
pub mod data;
pub mod items;
mod schema;
pub mod settings;
pub mod tags;

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, ToSql, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::notify::{Change, ChangeListener, Notifier};

pub use schema::SCHEMA_VERSION;

/// One result row of [`Store::execute`]
pub type Row = Vec<Value>;

/// The Store manages the SQLite catalog database.
///
/// The connection is shared by every thread; each session holds it for its
/// whole duration, so bodies passed to [`Store::session`] and
/// [`Store::with_transaction`] must not call back into the store.
pub struct Store {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    notifier: Notifier,
}

impl Store {
    /// Open or create the catalog at `path` and make sure its schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        Self::configure(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path: Some(path.to_path_buf()),
            notifier: Notifier::default(),
        };
        store.initialize()?;

        info!(path = %path.display(), "catalog database opened");
        Ok(store)
    }

    /// Open a private in-memory catalog (used by tests and dry runs).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        let store = Self { conn: Mutex::new(conn), db_path: None, notifier: Notifier::default() };
        store.initialize()?;
        Ok(store)
    }

    fn configure(conn: &Connection) -> Result<()> {
        // A background scan and the UI thread may both be writing.
        conn.busy_timeout(Duration::from_millis(1500))?;
        Ok(())
    }

    /// Create the schema if it is absent. A no-op on an initialized store.
    pub fn initialize(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        schema::initialize(&mut conn)
    }

    /// Path of the database file (`None` for in-memory stores)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Register a listener for committed changes.
    pub fn subscribe(&self, listener: Arc<dyn ChangeListener>) {
        self.notifier.subscribe(listener);
    }

    /// Run `body` in autocommit mode.
    ///
    /// Every statement commits on its own; operations touching several rows
    /// still run atomically inside an internal savepoint.
    pub fn session<T>(&self, body: impl FnOnce(&Session<'_>) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        let session = Session::new(&conn, false);
        let result = body(&session);
        let changes = session.into_changes();
        drop(conn);

        // Whatever was queued has been committed by its own statement/savepoint.
        self.notifier.emit(&changes);
        result
    }

    /// Run `body` inside one transaction: commit if it succeeds, roll back
    /// everything it did if it fails.
    pub fn with_transaction<T>(&self, body: impl FnOnce(&Session<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let session = Session::new(&tx, true);

        let value = match body(&session) {
            Ok(value) => value,
            Err(err) => {
                drop(session);
                debug!(error = %err, "rolling back transaction");
                if let Err(rollback) = tx.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                return Err(err);
            }
        };

        let changes = session.into_changes();
        tx.commit()?;
        drop(conn);

        self.notifier.emit(&changes);
        Ok(value)
    }

    /// Run a single statement in autocommit mode and return its rows.
    ///
    /// Values are always bound as parameters. Raw statements bypass change
    /// notification.
    pub fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>> {
        self.session(|s| s.execute(sql, params))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_path", &self.db_path)
            .field("notifier", &self.notifier)
            .finish()
    }
}

/// Statement surface of the store, valid for one `session`/`with_transaction` body.
pub struct Session<'c> {
    conn: &'c Connection,
    /// Inside a transaction or savepoint: multi-row operations need no extra scope
    atomic: Cell<bool>,
    changes: RefCell<Vec<Change>>,
}

impl<'c> Session<'c> {
    fn new(conn: &'c Connection, in_transaction: bool) -> Self {
        Self { conn, atomic: Cell::new(in_transaction), changes: RefCell::new(Vec::new()) }
    }

    pub(crate) fn conn(&self) -> &Connection {
        self.conn
    }

    pub(crate) fn record(&self, change: Change) {
        self.changes.borrow_mut().push(change);
    }

    fn into_changes(self) -> Vec<Change> {
        self.changes.into_inner()
    }

    /// Run `body` so that all of its statements apply or none do.
    pub(crate) fn atomic<T>(&self, body: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        if self.atomic.get() {
            return body(self);
        }

        self.conn.execute_batch("SAVEPOINT catalog_op")?;
        self.atomic.set(true);
        let mark = self.changes.borrow().len();
        let result = body(self);
        self.atomic.set(false);

        match result {
            Ok(value) => {
                self.conn.execute_batch("RELEASE catalog_op")?;
                Ok(value)
            }
            Err(err) => {
                self.changes.borrow_mut().truncate(mark);
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK TO catalog_op; RELEASE catalog_op") {
                    warn!(error = %rollback, "savepoint rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Run a single statement and collect its rows (empty for non-queries).
    pub fn execute(&self, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>> {
        let mut stmt = self.conn.prepare(sql)?;
        let columns = stmt.column_count();
        if columns == 0 {
            stmt.execute(params)?;
            return Ok(Vec::new());
        }

        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(columns);
            for i in 0..columns {
                values.push(row.get::<_, Value>(i)?);
            }
            out.push(values);
        }
        Ok(out)
    }
}

/// "?,?,?" for `n` bound values
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}
