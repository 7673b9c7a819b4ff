//! Versioned schema upgrades.
//!
//! The stored `schema_version` meta value says which migrations already ran.
//! Each pending migration runs in its own transaction together with the
//! version bump, so a failure leaves the database at the previous version.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use super::schema::{self, meta_keys, ALGO_VERSION, CURRENT_SCHEMA_VERSION};
use crate::error::{Error, Result};

struct Migration {
    version: i64,
    apply: fn(&Connection) -> rusqlite::Result<()>,
}

const MIGRATIONS: &[Migration] = &[
    Migration { version: 1, apply: migrate_v1 },
    Migration { version: 2, apply: migrate_v2 },
];

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`]. Returns the version
/// found before migrating.
pub fn run_migrations(conn: &mut Connection) -> Result<i64> {
    let found = schema_version(conn).map_err(|e| Error::MigrationFailure {
        version: 0,
        reason: e.to_string(),
    })?;

    if found > CURRENT_SCHEMA_VERSION {
        return Err(Error::MigrationFailure {
            version: found,
            reason: format!(
                "database schema v{} is newer than supported v{}",
                found, CURRENT_SCHEMA_VERSION
            ),
        });
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > found) {
        info!(version = migration.version, "Running schema migration");
        apply(conn, migration).map_err(|e| Error::MigrationFailure {
            version: migration.version,
            reason: e.to_string(),
        })?;
    }

    Ok(found)
}

fn apply(conn: &mut Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    (migration.apply)(&tx)?;
    tx.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)",
        rusqlite::params![meta_keys::SCHEMA_VERSION, migration.version.to_string()],
    )?;
    tx.commit()
}

/// Stored schema version, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    let has_meta: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    if has_meta.is_none() {
        return Ok(0);
    }

    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?",
            [meta_keys::SCHEMA_VERSION],
            |row| row.get(0),
        )
        .optional()?;

    match value {
        Some(v) => v.trim().parse::<i64>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        }),
        None => Ok(0),
    }
}

fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(schema::CREATE_META)?;
    conn.execute_batch(schema::CREATE_ASSETS)?;
    conn.execute_batch(schema::CREATE_DUP_GROUPS)?;
    conn.execute(
        "INSERT OR IGNORE INTO meta (key, value) VALUES (?, ?)",
        rusqlite::params![meta_keys::GLOBAL_ALGO_VERSION, ALGO_VERSION.to_string()],
    )?;
    Ok(())
}

fn migrate_v2(conn: &Connection) -> rusqlite::Result<()> {
    // Additive column; a half-applied earlier run may already have it.
    match conn.execute(schema::ADD_FACE_COUNT, []) {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
            if msg.contains("duplicate column name") =>
        {
            info!("face_count column already present");
        }
        Err(e) => return Err(e),
    }
    conn.execute_batch(schema::CREATE_FACES)?;
    Ok(())
}
