//! # SQLite Artifact Storage
//!
//! Stores artifact and manifest blobs in a single SQLite table, for hosts
//! that already keep their activity data in a database file.

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{CacheError, Result};
use crate::store::ArtifactStorage;

/// Blob storage backed by SQLite.
pub struct SqliteStorage {
    /// Connection guarded for `Sync`; statements are short
    db: Mutex<Connection>,
    db_path: String,
}

impl SqliteStorage {
    /// Open (or create) the database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        log::info!("[SqliteStorage] Opened artifact store at {}", db_path);

        Ok(Self {
            db: Mutex::new(db),
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            -- One row per artifact or manifest blob
            CREATE TABLE IF NOT EXISTS cache_blobs (
                name TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at INTEGER DEFAULT (strftime('%s', 'now'))
            );
            "#,
        )?;
        Ok(())
    }

    /// Number of stored blobs.
    pub fn blob_count(&self) -> Result<u32> {
        let db = self.lock()?;
        let count: u32 = db.query_row("SELECT COUNT(*) FROM cache_blobs", [], |row| row.get(0))?;
        Ok(count)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| CacheError::Storage {
            message: "sqlite connection lock poisoned".to_string(),
        })
    }
}

impl ArtifactStorage for SqliteStorage {
    fn read_blob(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let db = self.lock()?;
        let data = db
            .query_row(
                "SELECT data FROM cache_blobs WHERE name = ?",
                params![name],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(data)
    }

    fn write_blob(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let db = self.lock()?;
        db.execute(
            "INSERT OR REPLACE INTO cache_blobs (name, data, updated_at)
             VALUES (?, ?, strftime('%s', 'now'))",
            params![name, bytes],
        )?;
        Ok(())
    }

    fn remove_blob(&self, name: &str) -> Result<()> {
        let db = self.lock()?;
        db.execute("DELETE FROM cache_blobs WHERE name = ?", params![name])?;
        Ok(())
    }
}
