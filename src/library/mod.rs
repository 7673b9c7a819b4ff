//! The photo library the engine analyzes.
//!
//! Providers enumerate assets page by page with a stable cursor, resolve an
//! asset to a readable local file and delete assets on request. The engine
//! never needs the whole library in memory.

pub mod fs;

use std::path::PathBuf;

use crate::error::Result;

pub use fs::FsLibrary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryAsset {
    pub id: String,
    /// Capture time, unix milliseconds.
    pub taken_at: Option<i64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct AssetPage {
    pub assets: Vec<LibraryAsset>,
    /// Pass back as `after` to fetch the next page. `None` on the last page.
    pub next: Option<String>,
}

pub trait LibraryProvider: Send + Sync {
    /// Up to `limit` assets ordered strictly after the `after` cursor.
    fn list_assets(&self, after: Option<&str>, limit: usize) -> Result<AssetPage>;

    /// Readable local file for `asset_id`, or `None` if it has none.
    fn resolve_path(&self, asset_id: &str) -> Result<Option<PathBuf>>;

    /// Delete the given assets. Returns how many were removed.
    fn delete_assets(&self, asset_ids: &[String]) -> Result<usize>;
}
