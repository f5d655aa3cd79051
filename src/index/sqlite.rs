use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};

use super::{Index, IndexTransaction, UpdateFn, ViewFn};
use crate::errors::{IndexError, ProjectorError};

/// Name of the single table (bucket) holding every projection.
const BUCKET: &str = "projector";

/// Persistent index stored in one SQLite table.
///
/// The connection sits behind a mutex, so there is exactly one writer and each
/// `update` is a single `IMMEDIATE` transaction.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open (or create) the index file at `path` and ensure its table exists.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite index")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })
        .context("Failed to enable WAL journal")?;
        Self::with_connection(conn)
    }

    /// Create an in-memory SQLite index (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite index")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {BUCKET} (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            );"
        ))
        .context("Failed to create index table")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // An unwinding transaction is rolled back when dropped, so the
        // connection is consistent even if the lock was poisoned.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct SqliteTransaction<'c> {
    conn: &'c Connection,
    writable: bool,
}

impl IndexTransaction for SqliteTransaction<'_> {
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, IndexError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT value FROM {BUCKET} WHERE key = ?1"))?;
        stmt.query_row(params![key], |row| row.get::<_, Vec<u8>>(0))
            .optional()?
            .ok_or_else(|| IndexError::NotFound {
                key: key.to_string(),
            })
    }

    fn put_bytes(&mut self, key: &str, value: Vec<u8>) -> Result<(), IndexError> {
        if !self.writable {
            return Err(IndexError::ReadOnly {
                key: key.to_string(),
            });
        }
        let mut stmt = self.conn.prepare_cached(&format!(
            "INSERT INTO {BUCKET} (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value"
        ))?;
        stmt.execute(params![key, value])?;
        Ok(())
    }
}

impl Index for SqliteIndex {
    fn update(&self, work: &mut UpdateFn<'_>) -> Result<(), ProjectorError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(IndexError::from)?;
        {
            let mut itx = SqliteTransaction {
                conn: &tx,
                writable: true,
            };
            work(&mut itx)?;
        }
        tx.commit().map_err(IndexError::from)?;
        Ok(())
    }

    fn view(&self, work: &mut ViewFn<'_>) -> Result<(), ProjectorError> {
        let mut conn = self.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .map_err(IndexError::from)?;
        let itx = SqliteTransaction {
            conn: &tx,
            writable: false,
        };
        work(&itx)
    }
}
