//! Duplicate groups and their members.

use rusqlite::{Connection, OptionalExtension, Row};

use super::now_millis;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DupGroup {
    pub group_id: String,
    /// The match partner that seeded the group.
    pub representative_asset_id: Option<String>,
    pub best_asset_id: Option<String>,
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DupMember {
    pub group_id: String,
    pub asset_id: String,
    /// Hamming distance to the partner that admitted this asset.
    pub distance: u32,
}

fn row_to_group(row: &Row) -> rusqlite::Result<DupGroup> {
    Ok(DupGroup {
        group_id: row.get(0)?,
        representative_asset_id: row.get(1)?,
        best_asset_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_member(row: &Row) -> rusqlite::Result<DupMember> {
    Ok(DupMember {
        group_id: row.get(0)?,
        asset_id: row.get(1)?,
        distance: row.get::<_, Option<u32>>(2)?.unwrap_or(0),
    })
}

pub struct GroupRepo<'c> {
    conn: &'c Connection,
}

impl<'c> GroupRepo<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Create an empty group seeded by `representative`, which also starts
    /// out as the elected best asset.
    pub fn create_group(&self, group_id: &str, representative: &str) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO dup_groups (group_id, representative_asset_id, best_asset_id, created_at)
            VALUES (?, ?, ?, ?)
            "#,
            rusqlite::params![group_id, representative, representative, now_millis()],
        )?;
        Ok(())
    }

    pub fn add_member(&self, group_id: &str, asset_id: &str, distance: u32) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO dup_members (group_id, asset_id, distance) VALUES (?, ?, ?)",
            rusqlite::params![group_id, asset_id, distance],
        )?;
        Ok(())
    }

    pub fn remove_member(&self, group_id: &str, asset_id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM dup_members WHERE group_id = ? AND asset_id = ?",
            [group_id, asset_id],
        )?;
        Ok(removed > 0)
    }

    /// The group currently claiming `asset_id`, if any.
    pub fn group_of(&self, asset_id: &str) -> Result<Option<String>> {
        let group = self
            .conn
            .query_row(
                "SELECT group_id FROM dup_members WHERE asset_id = ? ORDER BY rowid LIMIT 1",
                [asset_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(group)
    }

    pub fn get_group(&self, group_id: &str) -> Result<Option<DupGroup>> {
        let group = self
            .conn
            .query_row(
                r#"
                SELECT group_id, representative_asset_id, best_asset_id, created_at
                FROM dup_groups WHERE group_id = ?
                "#,
                [group_id],
                row_to_group,
            )
            .optional()?;
        Ok(group)
    }

    /// Members in admission order.
    pub fn members(&self, group_id: &str) -> Result<Vec<DupMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT group_id, asset_id, distance FROM dup_members \
             WHERE group_id = ? ORDER BY rowid",
        )?;
        let rows = stmt.query_map([group_id], row_to_member)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_best(&self, group_id: &str, asset_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE dup_groups SET best_asset_id = ? WHERE group_id = ?",
            [asset_id, group_id],
        )?;
        Ok(())
    }

    /// Every group, oldest first.
    pub fn all_groups(&self) -> Result<Vec<DupGroup>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT group_id, representative_asset_id, best_asset_id, created_at
            FROM dup_groups ORDER BY created_at ASC, group_id ASC
            "#,
        )?;
        let rows = stmt.query_map([], row_to_group)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Delete a group together with its member rows.
    pub fn delete_group(&self, group_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM dup_members WHERE group_id = ?", [group_id])?;
        self.conn
            .execute("DELETE FROM dup_groups WHERE group_id = ?", [group_id])?;
        Ok(())
    }

    /// Move every member of `source` into `target` and delete `source`.
    /// Assets already in `target` keep their existing row. Returns how many
    /// members moved.
    pub fn merge_groups(&self, target: &str, source: &str) -> Result<usize> {
        if target == source {
            return Ok(0);
        }
        let moved = self.conn.execute(
            "UPDATE OR IGNORE dup_members SET group_id = ? WHERE group_id = ?",
            [target, source],
        )?;
        self.delete_group(source)?;
        Ok(moved)
    }

    pub fn delete_all(&self) -> Result<()> {
        self.conn.execute_batch("DELETE FROM dup_members; DELETE FROM dup_groups;")?;
        Ok(())
    }
}
