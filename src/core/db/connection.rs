/// Connection Management Module
///
/// This module owns the live SQLite session. A `ConnectionHandle` is created
/// unconnected from a DSN, opened explicitly, and shared by reference with the
/// transaction executor and the query engine.
///
/// `rusqlite::Connection` is `Send` but not `Sync`, so the session sits behind a
/// `Mutex`: every batch, query and schema call holds the lock for its whole
/// duration and calls from different threads never interleave.

use crate::config::StoreConfig;
use crate::core::db::schema::{self, Schema};
use crate::core::db::record::RecordShape;
use crate::core::{Result, StoreError};
use rusqlite::{Connection, InterruptHandle};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{info, info_span, Span};

/// Default time a statement waits on a lock held by another connection
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Owner of the live database session
pub struct ConnectionHandle {
    dsn: String,
    busy_timeout: Duration,
    foreign_keys: bool,
    session: Mutex<Option<Connection>>,
    interrupt: Mutex<Option<Arc<InterruptHandle>>>,
    span: Span,
}

impl ConnectionHandle {
    /// Creates an unopened handle for `dsn`.
    ///
    /// The DSN is handed to SQLite untouched: a file path, `:memory:`, or a
    /// `file:` URI.
    pub fn new(dsn: impl Into<String>) -> Self {
        let dsn = dsn.into();
        ConnectionHandle {
            span: info_span!("store", dsn = %dsn),
            dsn,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            foreign_keys: true,
            session: Mutex::new(None),
            interrupt: Mutex::new(None),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        let mut handle = ConnectionHandle::new(config.dsn.clone());
        handle.busy_timeout = config.busy_timeout();
        handle.foreign_keys = config.foreign_keys;
        handle
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// Opens the session.
    ///
    /// # Errors
    ///
    /// `StoreError::AlreadyOpen` if the handle already holds a session,
    /// `StoreError::Connection` if SQLite cannot open the DSN or apply the
    /// connection pragmas.
    pub fn open(&self) -> Result<()> {
        let _entered = self.span.enter();
        let mut session = self.lock_session();
        if session.is_some() {
            return Err(StoreError::AlreadyOpen);
        }

        let conn = Connection::open(&self.dsn).map_err(StoreError::Connection)?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(StoreError::Connection)?;
        conn.pragma_update(None, "foreign_keys", self.foreign_keys)
            .map_err(StoreError::Connection)?;

        *self.lock_interrupt() = Some(Arc::new(conn.get_interrupt_handle()));
        *session = Some(conn);

        info!(
            foreign_keys = self.foreign_keys,
            busy_timeout_ms = self.busy_timeout.as_millis() as u64,
            "Opened session"
        );
        Ok(())
    }

    /// Closes the session.
    ///
    /// If SQLite refuses to close, the session is kept and the error returned.
    pub fn close(&self) -> Result<()> {
        let _entered = self.span.enter();
        let mut session = self.lock_session();
        let conn = session.take().ok_or(StoreError::NotOpen)?;
        *self.lock_interrupt() = None;

        if let Err((conn, e)) = conn.close() {
            *self.lock_interrupt() = Some(Arc::new(conn.get_interrupt_handle()));
            *session = Some(conn);
            return Err(StoreError::Connection(e));
        }

        info!("Closed session");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.lock_session().is_some()
    }

    /// Creates or reconciles the backing table of every shape.
    ///
    /// Safe to call on every startup: a second call with the same shapes
    /// performs no DDL.
    pub fn ensure_schema(&self, shapes: &[&RecordShape]) -> Result<()> {
        self.with_session(|conn| {
            schema::ensure_tables(conn, shapes)?;
            info!(tables = shapes.len(), "Schema synchronized");
            Ok(())
        })
    }

    /// Introspects the tables currently present in the store.
    pub fn schema(&self) -> Result<Schema> {
        self.with_session(|conn| Schema::from_connection(conn))
    }

    /// Returns a canceller for statements running on this session.
    pub fn canceller(&self) -> Result<QueryCanceller> {
        self.lock_interrupt()
            .as_ref()
            .map(|handle| QueryCanceller {
                interrupt_handle: Arc::clone(handle),
            })
            .ok_or(StoreError::NotOpen)
    }

    /// Runs `f` with exclusive access to the open session.
    pub(crate) fn with_session<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let _entered = self.span.enter();
        let mut session = self.lock_session();
        let conn = session.as_mut().ok_or(StoreError::NotOpen)?;
        f(conn)
    }

    // A panic while the lock is held drops any open rusqlite transaction,
    // which rolls it back, so the session is still consistent.
    fn lock_session(&self) -> MutexGuard<'_, Option<Connection>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_interrupt(&self) -> MutexGuard<'_, Option<Arc<InterruptHandle>>> {
        self.interrupt.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("dsn", &self.dsn)
            .field("busy_timeout", &self.busy_timeout)
            .field("foreign_keys", &self.foreign_keys)
            .field("open", &self.session.try_lock().map(|s| s.is_some()).ok())
            .finish()
    }
}

/// Interrupts the statement running on a session from another thread.
///
/// The interrupted call returns `StoreError::Cancelled`; a batch interrupted
/// mid-way is rolled back like any other failed batch.
#[derive(Clone)]
pub struct QueryCanceller {
    interrupt_handle: Arc<InterruptHandle>,
}

impl QueryCanceller {
    pub fn cancel(&self) {
        self.interrupt_handle.interrupt();
    }
}
