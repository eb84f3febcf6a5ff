//! The database handle (spec §4.2, §5, §6).
//!
//! Owns the single SQLite connection, the transaction/savepoint state that
//! shares its lock, and a registry of opened [`Collection`] handles. All of
//! it sits behind one `Mutex`: this engine targets a single-process,
//! single-connection deployment, not a connection pool.

use super::collection::Collection;
use super::dialect;
use super::transaction::{TxState, TxStatus};
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Name of the legacy single-collection API's backing collection (§6).
const DEFAULT_COLLECTION: &str = "documents";

struct Inner {
    conn: Connection,
    tx: TxState,
}

pub struct Database {
    inner: Mutex<Inner>,
    collections: Mutex<HashMap<String, Arc<Collection>>>,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (creating if absent) the database file at `path`, using
    /// default connection tuning.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Database>> {
        Self::open_with_config(path, &ConnectionConfig::default())
    }

    pub fn open_with_config(path: impl AsRef<Path>, config: &ConnectionConfig) -> Result<Arc<Database>> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::finish_open(conn, config, Some(path.to_path_buf()))
    }

    /// Open a private, process-local in-memory database. Useful for tests
    /// and short-lived caches; not shared across handles.
    pub fn open_in_memory() -> Result<Arc<Database>> {
        let conn = Connection::open_in_memory()?;
        Self::finish_open(conn, &ConnectionConfig::default(), None)
    }

    fn finish_open(conn: Connection, config: &ConnectionConfig, path: Option<PathBuf>) -> Result<Arc<Database>> {
        dialect::setup_pragmas(&conn, config.busy_timeout_ms, config.cache_size_kib)?;
        dialect::register_regexp_function(&conn)?;
        let db = Arc::new(Database {
            inner: Mutex::new(Inner { conn, tx: TxState::new() }),
            collections: Mutex::new(HashMap::new()),
            path,
        });
        // Pre-open the legacy default collection so Database::insert/search/
        // etc. (§6) work without an explicit collection() call first.
        db.collection(DEFAULT_COLLECTION, &[])?;
        tracing::debug!(path = ?db.path, busy_timeout_ms = config.busy_timeout_ms, "connection opened");
        Ok(db)
    }

    /// Run `f` with the underlying connection, translating any raw SQLite
    /// error (busy/locked in particular) through [`Error::from_sqlite`].
    pub(crate) fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let guard = self.inner.lock().unwrap();
        f(&guard.conn).map_err(|e| {
            tracing::warn!(error = %e, "statement failed");
            Error::from_sqlite(e)
        })
    }

    /// Open (or reopen) a named collection, caching the handle.
    pub fn collection(self: &Arc<Self>, name: &str, indexed_fields: &[String]) -> Result<Arc<Collection>> {
        {
            let cache = self.collections.lock().unwrap();
            if let Some(existing) = cache.get(name) {
                if existing.indexed_fields() == indexed_fields {
                    return Ok(Arc::clone(existing));
                }
                // fall through to Collection::open, which will raise
                // IndexSchemaMismatch against the table's actual schema.
            }
        }
        let coll = Collection::open(self, name, indexed_fields)?;
        self.collections.lock().unwrap().insert(name.to_string(), Arc::clone(&coll));
        Ok(coll)
    }

    /// Names of every collection handle opened so far in this process.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    fn default_collection(self: &Arc<Self>) -> Arc<Collection> {
        // registered during finish_open; always present.
        Arc::clone(self.collections.lock().unwrap().get(DEFAULT_COLLECTION).expect("default collection registered at open"))
    }

    // --- Legacy single-collection API (§6): forwards to `documents`. ---

    pub fn insert(self: &Arc<Self>, doc: &serde_json::Value) -> Result<i64> {
        self.default_collection().insert(doc)
    }

    pub fn get_by_id(self: &Arc<Self>, id: i64) -> Result<Option<serde_json::Value>> {
        self.default_collection().get_by_id(id)
    }

    pub fn search(self: &Arc<Self>, field: &str, value: &serde_json::Value) -> Result<Vec<(i64, serde_json::Value)>> {
        self.default_collection().search(field, value)
    }

    pub fn update(self: &Arc<Self>, field: &str, value: &serde_json::Value, patch: &serde_json::Value) -> Result<bool> {
        self.default_collection().update(field, value, patch)
    }

    pub fn remove(self: &Arc<Self>, field: &str, value: &serde_json::Value) -> Result<usize> {
        self.default_collection().remove(field, value)
    }

    pub fn all(self: &Arc<Self>, limit: Option<i64>, offset: Option<i64>) -> Result<Vec<(i64, serde_json::Value)>> {
        self.default_collection().all(limit, offset)
    }

    // --- Transaction controller (§4.2). ---

    pub fn begin(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if guard.tx.in_transaction() {
            return Err(Error::InvalidTransactionState("already in a transaction".to_string()));
        }
        guard.conn.execute_batch("BEGIN").map_err(Error::from_sqlite)?;
        guard.tx.status = TxStatus::InTransaction;
        tracing::debug!("transaction begin");
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if !guard.tx.in_transaction() {
            return Err(Error::InvalidTransactionState("commit() called while idle".to_string()));
        }
        guard.conn.execute_batch("COMMIT").map_err(Error::from_sqlite)?;
        guard.tx.status = TxStatus::Idle;
        guard.tx.savepoints.clear();
        tracing::debug!("transaction commit");
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        if !guard.tx.in_transaction() {
            return Err(Error::InvalidTransactionState("rollback() called while idle".to_string()));
        }
        guard.conn.execute_batch("ROLLBACK").map_err(Error::from_sqlite)?;
        guard.tx.status = TxStatus::Idle;
        guard.tx.savepoints.clear();
        tracing::debug!("transaction rollback");
        Ok(())
    }

    /// Create a savepoint, naming it `sp_<n>` when `name` is `None`.
    /// Requires an active transaction.
    pub fn savepoint(&self, name: Option<&str>) -> Result<String> {
        let mut guard = self.inner.lock().unwrap();
        if !guard.tx.in_transaction() {
            return Err(Error::InvalidTransactionState("savepoint() requires an active transaction".to_string()));
        }
        let name = match name {
            Some(n) => n.to_string(),
            None => guard.tx.next_savepoint_name(),
        };
        guard
            .conn
            .execute_batch(&format!("SAVEPOINT \"{name}\""))
            .map_err(Error::from_sqlite)?;
        guard.tx.savepoints.push(name.clone());
        tracing::debug!(savepoint = %name, "savepoint created");
        Ok(name)
    }

    /// Undo everything since `name` was created, keeping the savepoint
    /// itself (and everything below it) active. Pops any nested savepoint
    /// created above `name`.
    pub fn rollback_to(&self, name: &str) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let pos = guard
            .tx
            .position_of(name)
            .ok_or_else(|| Error::InvalidTransactionState(format!("no active savepoint named `{name}`")))?;
        guard
            .conn
            .execute_batch(&format!("ROLLBACK TO SAVEPOINT \"{name}\""))
            .map_err(Error::from_sqlite)?;
        guard.tx.savepoints.truncate(pos + 1);
        tracing::debug!(savepoint = %name, "rolled back to savepoint");
        Ok(())
    }

    /// Commit (discard) `name` and every savepoint nested above it.
    pub fn release(&self, name: &str) -> Result<()> {
        let mut guard = self.inner.lock().unwrap();
        let pos = guard
            .tx
            .position_of(name)
            .ok_or_else(|| Error::InvalidTransactionState(format!("no active savepoint named `{name}`")))?;
        guard
            .conn
            .execute_batch(&format!("RELEASE SAVEPOINT \"{name}\""))
            .map_err(Error::from_sqlite)?;
        guard.tx.savepoints.truncate(pos);
        tracing::debug!(savepoint = %name, "released savepoint");
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.lock().unwrap().tx.in_transaction()
    }

    pub fn savepoint_depth(&self) -> usize {
        self.inner.lock().unwrap().tx.depth()
    }

    /// Run `f` as a transaction scope (spec §4.2). When already inside a
    /// transaction, this transparently degrades to a savepoint instead of
    /// nesting `BEGIN` statements, so callers can compose freely.
    pub fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        if self.in_transaction() {
            let sp = self.savepoint(None)?;
            match f() {
                Ok(v) => {
                    self.release(&sp)?;
                    Ok(v)
                }
                Err(e) => {
                    let _ = self.rollback_to(&sp);
                    let _ = self.release(&sp);
                    Err(e)
                }
            }
        } else {
            self.begin()?;
            match f() {
                Ok(v) => {
                    self.commit()?;
                    Ok(v)
                }
                Err(e) => {
                    let _ = self.rollback();
                    Err(e)
                }
            }
        }
    }

    /// Size of the backing database file, in bytes. Returns `0` for an
    /// in-memory database.
    pub(crate) fn file_size(&self) -> Result<u64> {
        match &self.path {
            Some(p) => Ok(std::fs::metadata(p).map(|m| m.len()).unwrap_or(0)),
            None => Ok(0),
        }
    }

    /// Checkpoint the write-ahead log and drop cached collection handles.
    /// The handle remains usable afterward; this is a flush point, not a
    /// true close (SQLite connections close on `Drop`).
    pub fn close(&self) -> Result<()> {
        self.with_conn(|conn| conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)"))?;
        self.collections.lock().unwrap().clear();
        Ok(())
    }
}
