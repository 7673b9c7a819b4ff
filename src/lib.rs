//! Incremental blur and near-duplicate analysis for photo libraries.
//!
//! [`ScanEngine`] walks a [`LibraryProvider`] in capture-time order, scores
//! each photo for sharpness and brightness, fingerprints it with a
//! difference hash and groups near-identical shots taken close together.
//! Progress lives in SQLite, so an interrupted scan resumes where it left
//! off.

pub mod analysis;
pub mod config;
pub mod db;
pub mod duplicates;
pub mod enrichment;
pub mod error;
pub mod library;
pub mod logging;
pub mod scanner;
pub mod tasks;

pub use config::Config;
pub use db::Database;
pub use enrichment::{Enricher, Enrichment, NoopEnrichment};
pub use error::{Error, Result};
pub use library::{FsLibrary, LibraryProvider};
pub use scanner::{ScanEngine, ScanEvent, ScanStatus};
pub use tasks::{BackgroundScan, ScanMode, TaskState};
