//! Asset records: one row per photo known to the engine.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row};

use super::meta::ScanCursor;
use super::now_millis;
use crate::error::Result;

/// Analysis state. Stored as an integer: 0 pending, 1 done, 2 error,
/// 3 deleted through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetStatus {
    Pending,
    Done,
    Error,
    Deleted,
}

impl AssetStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            AssetStatus::Pending => 0,
            AssetStatus::Done => 1,
            AssetStatus::Error => 2,
            AssetStatus::Deleted => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(AssetStatus::Pending),
            1 => Some(AssetStatus::Done),
            2 => Some(AssetStatus::Error),
            3 => Some(AssetStatus::Deleted),
            _ => None,
        }
    }
}

impl ToSql for AssetStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_i64()))
    }
}

impl FromSql for AssetStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = value.as_i64()?;
        AssetStatus::from_i64(raw).ok_or(FromSqlError::OutOfRange(raw))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    pub asset_id: String,
    pub taken_at: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_signature: Option<String>,
    pub algo_version: Option<i64>,
    pub blur_score: Option<f64>,
    pub mean_luma: Option<f64>,
    pub phash: Option<String>,
    pub labels_json: Option<String>,
    pub status: AssetStatus,
    pub error_message: Option<String>,
    pub updated_at: Option<i64>,
    pub face_count: i64,
}

impl AssetRecord {
    /// Position of this asset in scan order.
    pub fn cursor(&self) -> ScanCursor {
        ScanCursor {
            taken_at: self.taken_at.unwrap_or(0),
            asset_id: self.asset_id.clone(),
        }
    }
}

/// An asset observed in the library for the first time.
#[derive(Debug, Clone)]
pub struct NewAsset {
    pub asset_id: String,
    pub taken_at: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub file_signature: String,
}

/// Signals produced by a successful analysis pass.
#[derive(Debug, Clone)]
pub struct DoneSignals<'a> {
    pub blur_score: f64,
    pub mean_luma: f64,
    pub phash: &'a str,
    pub algo_version: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub done: u64,
    pub error: u64,
}

const ASSET_COLUMNS: &str = "asset_id, taken_at, width, height, file_signature, algo_version, \
     blur_score, mean_luma, phash, labels_json, status, error_message, updated_at, face_count";

fn row_to_asset(row: &Row) -> rusqlite::Result<AssetRecord> {
    Ok(AssetRecord {
        asset_id: row.get(0)?,
        taken_at: row.get(1)?,
        width: row.get(2)?,
        height: row.get(3)?,
        file_signature: row.get(4)?,
        algo_version: row.get(5)?,
        blur_score: row.get(6)?,
        mean_luma: row.get(7)?,
        phash: row.get(8)?,
        labels_json: row.get(9)?,
        status: row.get(10)?,
        error_message: row.get(11)?,
        updated_at: row.get(12)?,
        face_count: row.get::<_, Option<i64>>(13)?.unwrap_or(0),
    })
}

pub struct AssetRepo<'c> {
    conn: &'c Connection,
}

impl<'c> AssetRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, asset_id: &str) -> Result<Option<AssetRecord>> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {} FROM assets WHERE asset_id = ?", ASSET_COLUMNS),
                [asset_id],
                row_to_asset,
            )
            .optional()?;
        Ok(record)
    }

    /// Insert a newly observed asset as pending. Returns false if it was
    /// already known.
    pub fn insert_pending(&self, asset: &NewAsset) -> Result<bool> {
        let inserted = self.conn.execute(
            r#"
            INSERT OR IGNORE INTO assets (
                asset_id, taken_at, width, height, file_signature, status, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            rusqlite::params![
                asset.asset_id,
                asset.taken_at,
                asset.width,
                asset.height,
                asset.file_signature,
                AssetStatus::Pending,
                now_millis(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Pending assets strictly after `cursor` in (capture time, id) order.
    /// Missing capture times sort as 0.
    pub fn pending_batch(
        &self,
        cursor: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<Vec<AssetRecord>> {
        let limit = limit as i64;
        let records = match cursor {
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    r#"
                    SELECT {} FROM assets
                    WHERE status = ?
                    ORDER BY COALESCE(taken_at, 0) ASC, asset_id ASC
                    LIMIT ?
                    "#,
                    ASSET_COLUMNS
                ))?;
                let rows =
                    stmt.query_map(rusqlite::params![AssetStatus::Pending, limit], row_to_asset)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
            Some(cursor) => {
                let mut stmt = self.conn.prepare(&format!(
                    r#"
                    SELECT {} FROM assets
                    WHERE status = ?1
                      AND (COALESCE(taken_at, 0) > ?2
                           OR (COALESCE(taken_at, 0) = ?2 AND asset_id > ?3))
                    ORDER BY COALESCE(taken_at, 0) ASC, asset_id ASC
                    LIMIT ?4
                    "#,
                    ASSET_COLUMNS
                ))?;
                let rows = stmt.query_map(
                    rusqlite::params![
                        AssetStatus::Pending,
                        cursor.taken_at,
                        cursor.asset_id,
                        limit
                    ],
                    row_to_asset,
                )?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(records)
    }

    pub fn mark_done(&self, asset_id: &str, signals: &DoneSignals<'_>) -> Result<()> {
        self.conn.execute(
            r#"
            UPDATE assets SET
                status = ?, blur_score = ?, mean_luma = ?, phash = ?,
                algo_version = ?, error_message = NULL, updated_at = ?
            WHERE asset_id = ?
            "#,
            rusqlite::params![
                AssetStatus::Done,
                signals.blur_score,
                signals.mean_luma,
                signals.phash,
                signals.algo_version,
                now_millis(),
                asset_id,
            ],
        )?;
        Ok(())
    }

    pub fn set_enrichment(
        &self,
        asset_id: &str,
        face_count: i64,
        labels_json: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE assets SET face_count = ?, labels_json = ? WHERE asset_id = ?",
            rusqlite::params![face_count, labels_json, asset_id],
        )?;
        Ok(())
    }

    pub fn mark_error(&self, asset_id: &str, message: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE assets SET status = ?, error_message = ?, updated_at = ? WHERE asset_id = ?",
            rusqlite::params![AssetStatus::Error, message, now_millis(), asset_id],
        )?;
        Ok(())
    }

    /// Tombstone an asset removed from the library. It stops being a
    /// similarity candidate and is skipped by scans and resets.
    pub fn mark_deleted(&self, asset_id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE assets SET status = ?, updated_at = ? WHERE asset_id = ?",
            rusqlite::params![AssetStatus::Deleted, now_millis(), asset_id],
        )?;
        Ok(changed > 0)
    }

    /// Revert done assets analyzed by an algorithm older than `current_version`.
    /// Returns how many were reverted.
    pub fn reset_outdated(&self, current_version: i64) -> Result<usize> {
        let changed = self.conn.execute(
            r#"
            UPDATE assets SET status = ?, updated_at = ?
            WHERE status = ? AND (algo_version IS NULL OR algo_version < ?)
            "#,
            rusqlite::params![
                AssetStatus::Pending,
                now_millis(),
                AssetStatus::Done,
                current_version
            ],
        )?;
        Ok(changed)
    }

    /// Revert the asset to pending and store the new signature if the file
    /// changed since it was last seen, or if a deleted asset is back in the
    /// library. Untouched otherwise.
    pub fn reset_if_signature_changed(&self, asset_id: &str, signature: &str) -> Result<bool> {
        let changed = self.conn.execute(
            r#"
            UPDATE assets SET status = ?, file_signature = ?, updated_at = ?
            WHERE asset_id = ? AND (file_signature IS NOT ? OR status = ?)
            "#,
            rusqlite::params![
                AssetStatus::Pending,
                signature,
                now_millis(),
                asset_id,
                signature,
                AssetStatus::Deleted
            ],
        )?;
        Ok(changed > 0)
    }

    /// Done assets captured within `window_ms` of `taken_at`, most recent first.
    pub fn recent_done_within(
        &self,
        taken_at: i64,
        window_ms: i64,
        limit: usize,
        exclude: Option<&str>,
    ) -> Result<Vec<AssetRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM assets
            WHERE status = ? AND taken_at BETWEEN ? AND ?
              AND asset_id IS NOT ?
            ORDER BY taken_at DESC, asset_id DESC
            LIMIT ?
            "#,
            ASSET_COLUMNS
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![
                AssetStatus::Done,
                taken_at.saturating_sub(window_ms),
                taken_at.saturating_add(window_ms),
                exclude,
                limit as i64,
            ],
            row_to_asset,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn status_counts(&self) -> Result<StatusCounts> {
        let counts = self.conn.query_row(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 0 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 1 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 2 THEN 1 ELSE 0 END), 0)
            FROM assets
            "#,
            [],
            |row| {
                Ok(StatusCounts {
                    pending: row.get::<_, i64>(0)? as u64,
                    done: row.get::<_, i64>(1)? as u64,
                    error: row.get::<_, i64>(2)? as u64,
                })
            },
        )?;
        Ok(counts)
    }

    /// Count of done assets analyzed with an algorithm older than `version`.
    pub fn count_outdated(&self, version: i64) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM assets \
             WHERE status = ? AND (algo_version IS NULL OR algo_version < ?)",
            rusqlite::params![AssetStatus::Done, version],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Assets where enrichment found at least one face, newest first.
    pub fn people_assets(&self, limit: usize) -> Result<Vec<AssetRecord>> {
        self.query_list(
            &format!(
                "SELECT {} FROM assets WHERE status = 1 AND face_count > 0 \
                 ORDER BY taken_at DESC LIMIT ?",
                ASSET_COLUMNS
            ),
            limit,
        )
    }

    /// All done assets, labeled or not, newest first.
    pub fn labeled_assets(&self, limit: usize) -> Result<Vec<AssetRecord>> {
        self.query_list(
            &format!(
                "SELECT {} FROM assets WHERE status = 1 ORDER BY taken_at DESC LIMIT ?",
                ASSET_COLUMNS
            ),
            limit,
        )
    }

    /// Done assets with a stored sharpness score, sharpest last.
    pub fn scored_assets(&self, limit: usize) -> Result<Vec<AssetRecord>> {
        self.query_list(
            &format!(
                "SELECT {} FROM assets WHERE status = 1 AND blur_score IS NOT NULL \
                 ORDER BY blur_score ASC, asset_id ASC LIMIT ?",
                ASSET_COLUMNS
            ),
            limit,
        )
    }

    /// Force every asset except deleted ones back to pending and drop
    /// enrichment results.
    pub fn reset_all(&self) -> Result<usize> {
        let changed = self.conn.execute(
            r#"
            UPDATE assets SET
                status = ?,
                face_count = NULL,
                labels_json = NULL,
                error_message = NULL,
                updated_at = ?
            WHERE status != ?
            "#,
            rusqlite::params![AssetStatus::Pending, now_millis(), AssetStatus::Deleted],
        )?;
        Ok(changed)
    }

    fn query_list(&self, sql: &str, limit: usize) -> Result<Vec<AssetRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map([limit as i64], row_to_asset)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
