//! Library backed by a directory tree.
//!
//! Asset ids are absolute file paths. Pages are cut from a sorted snapshot
//! taken when enumeration starts from the beginning.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{NaiveDateTime, Utc};
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::{AssetPage, LibraryAsset, LibraryProvider};
use crate::config::LibraryConfig;
use crate::error::{Error, Result};

pub struct FsLibrary {
    root: PathBuf,
    extensions: Vec<String>,
    trash_path: PathBuf,
    snapshot: Mutex<Vec<PathBuf>>,
}

impl FsLibrary {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            root: config.root.clone(),
            extensions: config.image_extensions.iter().map(|e| e.to_lowercase()).collect(),
            trash_path: config.trash_path.clone(),
            snapshot: Mutex::new(Vec::new()),
        }
    }

    fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|e| *e == ext))
    }

    fn discover(&self) -> Vec<PathBuf> {
        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        let trash = fs::canonicalize(&self.trash_path).unwrap_or_else(|_| self.trash_path.clone());
        let mut images: Vec<PathBuf> = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| !p.starts_with(&trash))
            .filter(|p| self.is_image(p))
            .collect();
        images.sort();
        images
    }

    fn describe(path: &Path) -> LibraryAsset {
        let (width, height) = match image::image_dimensions(path) {
            Ok((w, h)) => (Some(w), Some(h)),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Could not read dimensions");
                (None, None)
            }
        };
        LibraryAsset {
            id: path.to_string_lossy().to_string(),
            taken_at: exif_taken_at(path).or_else(|| modified_millis(path)),
            width,
            height,
        }
    }

    fn trash_name(&self, original: &Path) -> PathBuf {
        static COUNTER: AtomicU64 = AtomicU64::new(0);

        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let stem = original
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let extension = original
            .extension()
            .map(|s| format!(".{}", s.to_string_lossy()))
            .unwrap_or_default();
        self.trash_path
            .join(format!("{}_{}_{}{}", stem, Utc::now().timestamp(), seq, extension))
    }

    fn move_to_trash(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.trash_path)?;
        let target = self.trash_name(path);
        if fs::rename(path, &target).is_err() {
            // Cross-filesystem move.
            fs::copy(path, &target)?;
            fs::remove_file(path)?;
        }
        Ok(target)
    }
}

impl LibraryProvider for FsLibrary {
    fn list_assets(&self, after: Option<&str>, limit: usize) -> Result<AssetPage> {
        if !self.root.is_dir() {
            return Err(Error::LibraryFailure(format!(
                "library root {} is not a directory",
                self.root.display()
            )));
        }

        let mut snapshot = self
            .snapshot
            .lock()
            .map_err(|_| Error::LibraryFailure("library snapshot lock poisoned".into()))?;
        if after.is_none() || snapshot.is_empty() {
            *snapshot = self.discover();
        }

        let start = match after {
            Some(after) => snapshot.partition_point(|p| p.as_path() <= Path::new(after)),
            None => 0,
        };
        let end = (start + limit).min(snapshot.len());
        let assets: Vec<LibraryAsset> = snapshot[start..end]
            .iter()
            .map(|p| Self::describe(p))
            .collect();
        let next = if end < snapshot.len() {
            assets.last().map(|a| a.id.clone())
        } else {
            None
        };
        Ok(AssetPage { assets, next })
    }

    fn resolve_path(&self, asset_id: &str) -> Result<Option<PathBuf>> {
        let path = PathBuf::from(asset_id);
        Ok(path.is_file().then_some(path))
    }

    fn delete_assets(&self, asset_ids: &[String]) -> Result<usize> {
        let mut deleted = 0;
        for id in asset_ids {
            let path = Path::new(id);
            if !path.is_file() {
                warn!(asset_id = %id, "Asset to delete not found");
                continue;
            }
            let target = self.move_to_trash(path)?;
            debug!(asset_id = %id, trash = %target.display(), "Moved asset to trash");
            deleted += 1;
        }
        Ok(deleted)
    }
}

/// EXIF `DateTimeOriginal` as unix milliseconds. The camera clock carries no
/// zone, so it is read as UTC.
fn exif_taken_at(path: &Path) -> Option<i64> {
    let file = File::open(path).ok()?;
    let mut reader = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut reader).ok()?;
    let field = exif.get_field(exif::Tag::DateTimeOriginal, exif::In::PRIMARY)?;
    let value = field.display_value().to_string();
    parse_exif_datetime(value.trim_matches('"'))
}

fn parse_exif_datetime(value: &str) -> Option<i64> {
    ["%Y-%m-%d %H:%M:%S", "%Y:%m:%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn modified_millis(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let dt: chrono::DateTime<Utc> = modified.into();
    Some(dt.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Luma};
    use tempfile::tempdir;

    fn write_png(path: &Path, w: u32, h: u32) {
        DynamicImage::ImageLuma8(ImageBuffer::from_fn(w, h, |x, _| Luma([x as u8])))
            .save(path)
            .unwrap();
    }

    fn library(root: &Path) -> FsLibrary {
        FsLibrary::new(&LibraryConfig {
            root: root.to_path_buf(),
            image_extensions: vec!["png".into(), "jpg".into()],
            trash_path: root.join(".trash"),
        })
    }

    #[test]
    fn test_pages_walk_sorted_images() {
        let dir = tempdir().unwrap();
        for name in ["c.png", "a.png", "b.PNG"] {
            write_png(&dir.path().join(name), 8, 4);
        }
        fs::write(dir.path().join("notes.txt"), "x").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        write_png(&dir.path().join("sub/d.png"), 8, 4);

        let lib = library(dir.path());
        let first = lib.list_assets(None, 2).unwrap();
        assert_eq!(first.assets.len(), 2);
        assert!(first.assets[0].id.ends_with("a.png"));
        assert_eq!(first.assets[0].width, Some(8));
        assert_eq!(first.assets[0].height, Some(4));
        assert!(first.assets[0].taken_at.is_some());

        let second = lib.list_assets(first.next.as_deref(), 2).unwrap();
        assert_eq!(second.assets.len(), 2);
        assert!(second.next.is_none());
        assert!(second.assets[1].id.ends_with("d.png"));
    }

    #[test]
    fn test_missing_root_is_library_failure() {
        let dir = tempdir().unwrap();
        let lib = library(&dir.path().join("gone"));
        assert!(matches!(lib.list_assets(None, 10), Err(Error::LibraryFailure(_))));
    }

    #[test]
    fn test_resolve_and_delete_to_trash() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.png");
        write_png(&path, 4, 4);
        let lib = library(dir.path());
        let id = lib.list_assets(None, 10).unwrap().assets[0].id.clone();

        assert!(lib.resolve_path(&id).unwrap().is_some());
        assert_eq!(lib.delete_assets(&[id.clone(), "/nope.png".into()]).unwrap(), 1);
        assert!(lib.resolve_path(&id).unwrap().is_none());
        assert_eq!(fs::read_dir(dir.path().join(".trash")).unwrap().count(), 1);

        // Trashed files are not listed again.
        assert!(lib.list_assets(None, 10).unwrap().assets.is_empty());
    }

    #[test]
    fn test_parse_exif_datetime() {
        assert_eq!(parse_exif_datetime("1970-01-01 00:00:01"), Some(1_000));
        assert_eq!(
            parse_exif_datetime("2001:02:03 04:05:06"),
            parse_exif_datetime("2001-02-03 04:05:06")
        );
        assert_eq!(parse_exif_datetime("yesterday"), None);
    }
}
