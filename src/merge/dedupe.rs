//! Dedupe index — persistent "have I seen this hash" store
//!
//! One table, one operation: `add_if_new` returns `true` exactly once per
//! distinct hash, even under concurrent callers. Atomicity comes from the
//! store's own primary-key constraint (`INSERT OR IGNORE` under WAL), not
//! from application-level locking.
//!
//! Optionally partitioned: hashes are bucketed into N independent SQLite
//! files by the first byte of the hash, so a later parallel merge can
//! shard dedupe work without contention. The partition count is fixed for
//! the life of a store file set; reopening with a different count is an
//! integrity error.

use crate::{GreenlitError, GreenlitResult};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const BUSY_TIMEOUT_MS: u64 = 5_000;
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS seen_hashes (
    content_sha256 TEXT PRIMARY KEY
) WITHOUT ROWID;
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Persistent, optionally-partitioned at-most-once hash store.
pub struct DedupeIndex {
    partitions: Vec<Mutex<Connection>>,
}

impl DedupeIndex {
    /// Open (creating if needed) a store with `partition_count` partitions
    /// under `dir`. Fails if an existing store was created with a
    /// different partition count.
    pub fn open(dir: &Path, partition_count: usize) -> GreenlitResult<Self> {
        if partition_count == 0 || partition_count > 256 {
            return Err(GreenlitError::DedupeError(format!(
                "partition count {} out of range 1..=256",
                partition_count
            )));
        }
        std::fs::create_dir_all(dir)?;

        let mut partitions = Vec::with_capacity(partition_count);
        for i in 0..partition_count {
            let conn = open_partition(&partition_path(dir, i))?;
            verify_partition_count(&conn, partition_count)?;
            partitions.push(Mutex::new(conn));
        }

        Ok(Self { partitions })
    }

    /// Insert `hash` if unseen. Returns `true` exactly once per distinct
    /// hash across all callers and runs sharing this store.
    pub fn add_if_new(&self, hash: &str) -> GreenlitResult<bool> {
        let partition = &self.partitions[self.partition_for(hash)];
        let conn = partition
            .lock()
            .map_err(|_| GreenlitError::DedupeError("dedupe partition lock poisoned".to_string()))?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO seen_hashes (content_sha256) VALUES (?1)",
                params![hash],
            )
            .map_err(|e| GreenlitError::DedupeError(format!("insert failed: {}", e)))?;
        Ok(inserted == 1)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition selection by hash prefix: first hex byte modulo count.
    fn partition_for(&self, hash: &str) -> usize {
        let prefix = u8::from_str_radix(hash.get(0..2).unwrap_or("00"), 16).unwrap_or(0);
        prefix as usize % self.partitions.len()
    }
}

fn partition_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("hashes_{:03}.sqlite3", index))
}

fn open_partition(path: &Path) -> GreenlitResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
    )
    .map_err(|e| GreenlitError::DedupeError(format!("open {}: {}", path.display(), e)))?;

    conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))
        .map_err(|e| GreenlitError::DedupeError(format!("busy_timeout: {}", e)))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| GreenlitError::DedupeError(format!("journal_mode: {}", e)))?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(|e| GreenlitError::DedupeError(format!("synchronous: {}", e)))?;
    conn.execute_batch(SCHEMA)
        .map_err(|e| GreenlitError::DedupeError(format!("schema: {}", e)))?;
    Ok(conn)
}

/// Persist the partition count on first open; fail closed on mismatch.
fn verify_partition_count(conn: &Connection, expected: usize) -> GreenlitResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES ('partition_count', ?1)",
        params![expected.to_string()],
    )
    .map_err(|e| GreenlitError::DedupeError(format!("meta write: {}", e)))?;

    let stored: String = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'partition_count'",
            [],
            |row| row.get(0),
        )
        .map_err(|e| GreenlitError::DedupeError(format!("meta read: {}", e)))?;

    if stored != expected.to_string() {
        return Err(GreenlitError::DedupeError(format!(
            "store was created with {} partitions, opened with {}",
            stored, expected
        )));
    }
    Ok(())
}
