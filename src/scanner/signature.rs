//! File content signatures used to notice external edits.

use std::path::Path;

use tracing::debug;

/// `"<mtime seconds>_<size bytes>"`, or an empty string when the file cannot
/// be inspected. An empty signature never matches a real one, so an
/// unreadable file is re-queued once it becomes readable.
pub fn file_signature(path: &Path) -> String {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cannot stat file for signature");
            return String::new();
        }
    };
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{}_{}", mtime, metadata.len())
}
