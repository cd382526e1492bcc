//! Durable registry of outstanding signing tokens.
//!
//! Tokens live in a transactional key-value store. Every [`TokenStore`]
//! operation runs its whole read-modify-write inside one store transaction
//! while holding the store lock, so a `take` either removes the token and
//! returns its secret or finds nothing; two racing `take`s on one token can
//! not both succeed.
//!
//! The lock is a single lock over the whole store. Token operations are a
//! handful of row lookups, so contention stays low next to the signing
//! arithmetic, which runs outside the lock. `exists` takes it shared, which
//! only pays off for backends that allow concurrent readers: [`SqliteKv`]
//! holds its one connection behind a mutex, so with it every transaction,
//! reads included, runs one at a time.

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

/// Read-only view of the store.
pub trait ReadTxn {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn discard(self: Box<Self>);
}

/// Read-write transaction. Dropping it without `commit` discards its writes.
pub trait WriteTxn {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    fn delete(&mut self, key: &[u8]) -> Result<()>;

    /// Durable once this returns `Ok`.
    fn commit(self: Box<Self>) -> Result<()>;

    fn discard(self: Box<Self>);
}

/// A transactional key-value store with crash-consistent commits.
pub trait KvStore: Send + Sync {
    fn write_txn(&self) -> Result<Box<dyn WriteTxn + '_>>;

    fn read_txn(&self) -> Result<Box<dyn ReadTxn + '_>>;
}

/// [`KvStore`] over a single SQLite table. One connection, so transactions
/// are serialized by its mutex.
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// Create or open the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("create {}: {}", parent.display(), e)))?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // FULL: a commit must survive power loss before the token goes out
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        info!(path = %path.display(), "Opened token store");
        Self::with_connection(conn)
    }

    /// Volatile store, for tests and throwaway deployments.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key BLOB PRIMARY KEY,
                value BLOB NOT NULL
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("connection mutex poisoned".into()))
    }
}

impl KvStore for SqliteKv {
    fn write_txn(&self) -> Result<Box<dyn WriteTxn + '_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTxn { conn, open: true }))
    }

    fn read_txn(&self) -> Result<Box<dyn ReadTxn + '_>> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN DEFERRED")?;
        Ok(Box::new(SqliteTxn { conn, open: true }))
    }
}

struct SqliteTxn<'a> {
    conn: MutexGuard<'a, Connection>,
    open: bool,
}

impl SqliteTxn<'_> {
    fn get_value(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn rollback(&mut self) {
        if self.open {
            self.open = false;
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                debug!(error = %e, "Rollback failed");
            }
        }
    }
}

impl ReadTxn for SqliteTxn<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_value(key)
    }

    fn discard(mut self: Box<Self>) {
        self.rollback();
    }
}

impl WriteTxn for SqliteTxn<'_> {
    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_value(key)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }

    fn discard(mut self: Box<Self>) {
        self.rollback();
    }
}

impl Drop for SqliteTxn<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}

/// At-most-once registry of `{tokenID → secret}`.
pub struct TokenStore {
    kv: Arc<dyn KvStore>,
    lock: RwLock<()>,
}

impl TokenStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            lock: RwLock::new(()),
        }
    }

    /// Stores `secret` under `token_id`; committed before returning.
    pub fn put(&self, token_id: &str, secret: &[u8]) -> Result<()> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| Error::Storage("token store lock poisoned".into()))?;
        let mut txn = self.kv.write_txn()?;
        txn.set(token_id.as_bytes(), secret)?;
        txn.commit()?;
        debug!("Token stored");
        Ok(())
    }

    /// Removes `token_id` and returns its secret.
    pub fn take(&self, token_id: &str) -> Result<Vec<u8>> {
        let _guard = self
            .lock
            .write()
            .map_err(|_| Error::Storage("token store lock poisoned".into()))?;
        let mut txn = self.kv.write_txn()?;
        let secret = match txn.get(token_id.as_bytes())? {
            Some(secret) => secret,
            None => {
                txn.discard();
                return Err(Error::UnknownToken);
            }
        };
        txn.delete(token_id.as_bytes())?;
        txn.commit()?;
        debug!("Token consumed");
        Ok(secret)
    }

    /// Diagnostics only; never gate a signature on this.
    pub fn exists(&self, token_id: &str) -> Result<bool> {
        let _guard = self
            .lock
            .read()
            .map_err(|_| Error::Storage("token store lock poisoned".into()))?;
        let mut txn = self.kv.read_txn()?;
        let found = txn.get(token_id.as_bytes())?.is_some();
        txn.discard();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_store() -> TokenStore {
        TokenStore::new(Arc::new(SqliteKv::open_in_memory().unwrap()))
    }

    #[test]
    fn take_consumes() -> Result<()> {
        let store = memory_store();
        store.put("t1", b"secret")?;
        assert!(store.exists("t1")?);
        assert_eq!(store.take("t1")?, b"secret".to_vec());
        assert!(!store.exists("t1")?);
        assert!(matches!(store.take("t1"), Err(Error::UnknownToken)));
        Ok(())
    }

    #[test]
    fn unknown_token() {
        let store = memory_store();
        assert!(matches!(store.take("never"), Err(Error::UnknownToken)));
    }

    #[test]
    fn discarded_write_leaves_no_trace() -> Result<()> {
        let kv = SqliteKv::open_in_memory()?;
        {
            let mut txn = kv.write_txn()?;
            txn.set(b"k", b"v")?;
            txn.discard();
        }
        {
            // dropped without commit
            let mut txn = kv.write_txn()?;
            txn.set(b"k2", b"v")?;
        }
        let mut txn = kv.read_txn()?;
        assert_eq!(txn.get(b"k")?, None);
        assert_eq!(txn.get(b"k2")?, None);
        Ok(())
    }

    #[test]
    fn committed_write_is_visible() -> Result<()> {
        let kv = SqliteKv::open_in_memory()?;
        let mut txn = kv.write_txn()?;
        txn.set(b"k", b"v")?;
        txn.commit()?;
        let mut txn = kv.read_txn()?;
        assert_eq!(txn.get(b"k")?, Some(b"v".to_vec()));
        Ok(())
    }
}
