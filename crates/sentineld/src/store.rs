//! SQLite persistence for the watchlist.
//!
//! Encodings are stored as little-endian `f32` blobs. Rows are returned in
//! insertion order so a reload reproduces the roster order.

use rusqlite::params;
use sentinel_core::{FaceEncoding, WatchlistEntry};
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS watchlist (
        identity_id TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        encoding    BLOB NOT NULL,
        updated_at  TEXT NOT NULL
    );
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct WatchlistRepository {
    conn: Connection,
}

impl WatchlistRepository {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    pub async fn load(&self) -> Result<Vec<WatchlistEntry>, StoreError> {
        let entries = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT identity_id, name, encoding FROM watchlist ORDER BY rowid",
                )?;
                let rows = stmt.query_map([], |row| {
                    let blob: Vec<u8> = row.get(2)?;
                    Ok(WatchlistEntry {
                        identity_id: row.get(0)?,
                        name: row.get(1)?,
                        encoding: FaceEncoding::from_le_bytes(&blob),
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        Ok(entries)
    }

    /// Insert or replace one identity. Existing rows keep their position.
    pub async fn upsert(&self, entry: &WatchlistEntry) -> Result<(), StoreError> {
        let identity_id = entry.identity_id.clone();
        let name = entry.name.clone();
        let blob = entry.encoding.to_le_bytes();
        let updated_at = chrono::Local::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO watchlist (identity_id, name, encoding, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(identity_id) DO UPDATE SET
                         name = excluded.name,
                         encoding = excluded.encoding,
                         updated_at = excluded.updated_at",
                    params![identity_id, name, blob, updated_at],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Returns whether a row was deleted.
    pub async fn remove(&self, identity_id: &str) -> Result<bool, StoreError> {
        let identity_id = identity_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                Ok(conn.execute("DELETE FROM watchlist WHERE identity_id = ?1", params![identity_id])?)
            })
            .await?;
        Ok(deleted > 0)
    }

    /// Replace the whole table with `entries`, in order.
    pub async fn save_all(&self, entries: Vec<WatchlistEntry>) -> Result<(), StoreError> {
        let updated_at = chrono::Local::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute("DELETE FROM watchlist", [])?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR REPLACE INTO watchlist (identity_id, name, encoding, updated_at)
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for entry in &entries {
                        stmt.execute(params![
                            entry.identity_id,
                            entry.name,
                            entry.encoding.to_le_bytes(),
                            updated_at
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}
