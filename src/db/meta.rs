//! Key/value state: global algorithm version and the incremental scan cursor.

use rusqlite::{Connection, OptionalExtension};

use super::schema::meta_keys;
use crate::error::Result;

/// Last fully processed position in (capture time, asset id) order.
///
/// Field order matters: the derived ordering is the lexicographic order the
/// pending queue is walked in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScanCursor {
    pub taken_at: i64,
    pub asset_id: String,
}

pub struct MetaRepo<'c> {
    conn: &'c Connection,
}

impl<'c> MetaRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(value.flatten())
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    /// Global algorithm version; 1 when never recorded.
    pub fn global_algo_version(&self) -> Result<i64> {
        Ok(self
            .get(meta_keys::GLOBAL_ALGO_VERSION)?
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(1))
    }

    pub fn set_global_algo_version(&self, version: i64) -> Result<()> {
        self.set(meta_keys::GLOBAL_ALGO_VERSION, &version.to_string())
    }

    /// The persisted cursor, or `None` when scanning starts from the beginning.
    /// A half-written or unparsable cursor counts as absent.
    pub fn scan_cursor(&self) -> Result<Option<ScanCursor>> {
        let taken_at = self
            .get(meta_keys::SCAN_CURSOR_TAKEN_AT)?
            .and_then(|v| v.parse::<i64>().ok());
        let asset_id = self.get(meta_keys::SCAN_CURSOR_ASSET_ID)?;

        Ok(match (taken_at, asset_id) {
            (Some(taken_at), Some(asset_id)) => Some(ScanCursor { taken_at, asset_id }),
            _ => None,
        })
    }

    pub fn set_scan_cursor(&self, cursor: &ScanCursor) -> Result<()> {
        self.set(meta_keys::SCAN_CURSOR_TAKEN_AT, &cursor.taken_at.to_string())?;
        self.set(meta_keys::SCAN_CURSOR_ASSET_ID, &cursor.asset_id)
    }

    pub fn reset_scan_cursor(&self) -> Result<()> {
        self.conn.execute(
            "DELETE FROM meta WHERE key IN (?, ?)",
            [meta_keys::SCAN_CURSOR_TAKEN_AT, meta_keys::SCAN_CURSOR_ASSET_ID],
        )?;
        Ok(())
    }
}
