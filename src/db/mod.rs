//! SQLite persistence: schema, migrations and the repositories for assets,
//! duplicate groups, faces and scanner meta state.

mod migrations;
pub mod assets;
pub mod faces;
pub mod groups;
pub mod meta;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;
use tracing::info;

use crate::error::Result;

pub use assets::{AssetRecord, AssetRepo, AssetStatus, DoneSignals, NewAsset, StatusCounts};
pub use faces::{FaceInstance, FaceRepo};
pub use groups::{DupGroup, DupMember, GroupRepo};
pub use meta::{MetaRepo, ScanCursor};
pub use migrations::schema_version;
pub use schema::{ALGO_VERSION, CURRENT_SCHEMA_VERSION};

/// Current wall-clock time as unix milliseconds.
pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Owns the single SQLite connection. Constructed once at startup and handed
/// to whoever needs persistence.
pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// Apply pending migrations and make sure the stored algorithm version is
    /// at least the one compiled into this build.
    pub fn initialize(&mut self) -> Result<()> {
        let found = migrations::run_migrations(&mut self.conn)?;
        if found < CURRENT_SCHEMA_VERSION {
            info!(from = found, to = CURRENT_SCHEMA_VERSION, "Database schema upgraded");
        }

        let meta = MetaRepo::new(&self.conn);
        let stored = meta.global_algo_version()?;
        if stored < ALGO_VERSION {
            info!(from = stored, to = ALGO_VERSION, "Raising global algorithm version");
            meta.set_global_algo_version(ALGO_VERSION)?;
        }
        Ok(())
    }

    /// Run `f` inside a transaction. Commits when `f` returns `Ok`, rolls
    /// back on any error.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let tx = self.conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn assets(&self) -> AssetRepo<'_> {
        AssetRepo::new(&self.conn)
    }

    pub fn groups(&self) -> GroupRepo<'_> {
        GroupRepo::new(&self.conn)
    }

    pub fn meta(&self) -> MetaRepo<'_> {
        MetaRepo::new(&self.conn)
    }

    pub fn faces(&self) -> FaceRepo<'_> {
        FaceRepo::new(&self.conn)
    }
}

#[cfg(test)]
pub(crate) fn test_db() -> Database {
    let mut db = Database::open_in_memory().unwrap();
    db.initialize().unwrap();
    db
}
