//! Optional face detection and image labeling.
//!
//! The capability itself lives outside the engine and is injected through
//! [`Enrichment`]. [`Enricher`] wraps it with a per-call timeout, a circuit
//! breaker and the face filtering rules. Nothing here is required for
//! blur or duplicate analysis.

pub mod breaker;
pub mod labels;

use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::config::EnrichmentConfig;
use crate::error::{Error, Result};

pub use breaker::CircuitBreaker;
pub use labels::{category_of, Category, Label, LabelSet};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// External labeling and face detection.
pub trait Enrichment: Send + Sync {
    fn is_available(&self) -> bool;
    fn label_image(&self, path: &Path) -> Result<Vec<Label>>;
    fn detect_faces(&self, path: &Path) -> Result<Vec<DetectedFace>>;
}

/// Default capability: never available.
pub struct NoopEnrichment;

impl Enrichment for NoopEnrichment {
    fn is_available(&self) -> bool {
        false
    }

    fn label_image(&self, _path: &Path) -> Result<Vec<Label>> {
        Err(Error::CapabilityUnavailable)
    }

    fn detect_faces(&self, _path: &Path) -> Result<Vec<DetectedFace>> {
        Err(Error::CapabilityUnavailable)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentOutcome {
    pub faces: Vec<DetectedFace>,
    pub labels: LabelSet,
}

impl EnrichmentOutcome {
    pub fn face_count(&self) -> i64 {
        self.faces.len() as i64
    }

    /// Serialized labels, or `None` when nothing was recognised.
    pub fn labels_json(&self) -> Result<Option<String>> {
        if self.labels.is_empty() {
            return Ok(None);
        }
        self.labels.to_json().map(Some)
    }
}

/// Drop faces too small to matter and all faces in screen-like photos.
pub fn filter_faces(
    faces: Vec<DetectedFace>,
    image_width: Option<u32>,
    labels: &LabelSet,
    config: &EnrichmentConfig,
) -> Vec<DetectedFace> {
    if labels.is_disqualifying(config.disqualifier_confidence) {
        debug!(ignored = faces.len(), "Faces ignored in screen-like context");
        return Vec::new();
    }
    let min_width = image_width.unwrap_or(1000) as f64 * config.min_face_ratio;
    faces
        .into_iter()
        .filter(|f| f.bbox.width as f64 > min_width)
        .collect()
}

/// Write a centered square crop of `path`, resized to `size`, to a temporary
/// file that is removed when dropped.
pub fn center_crop_square(path: &Path, size: u32) -> Result<NamedTempFile> {
    let img = image::open(path).map_err(|e| Error::extraction(path, e))?;
    let side = img.width().min(img.height());
    let x = (img.width() - side) / 2;
    let y = (img.height() - side) / 2;
    let cropped = img
        .crop_imm(x, y, side, side)
        .resize_exact(size, size, FilterType::Triangle);

    let file = tempfile::Builder::new()
        .prefix("photosift-crop-")
        .suffix(".png")
        .tempfile()?;
    cropped
        .save_with_format(file.path(), image::ImageFormat::Png)
        .map_err(|e| Error::extraction(path, e))?;
    Ok(file)
}

pub struct Enricher {
    capability: Arc<dyn Enrichment>,
    breaker: CircuitBreaker,
    config: EnrichmentConfig,
}

impl Enricher {
    pub fn new(capability: Arc<dyn Enrichment>, config: EnrichmentConfig) -> Self {
        Self {
            capability,
            breaker: CircuitBreaker::new(config.failure_threshold),
            config,
        }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopEnrichment), EnrichmentConfig::default())
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn is_active(&self) -> bool {
        self.config.enabled && !self.breaker.is_open() && self.capability.is_available()
    }

    /// Label and detect faces for one photo. `None` when enrichment is off or
    /// the capability failed; timeouts degrade to empty results.
    pub fn enrich(&self, path: &Path, image_width: Option<u32>) -> Option<EnrichmentOutcome> {
        if !self.is_active() {
            return None;
        }
        let mut timed_out = false;

        let crop = if self.config.label_crop_size > 0 {
            match center_crop_square(path, self.config.label_crop_size) {
                Ok(file) => Some(file),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Crop failed, labeling original");
                    None
                }
            }
        } else {
            None
        };
        let label_path: PathBuf = crop
            .as_ref()
            .map(|f| f.path().to_path_buf())
            .unwrap_or_else(|| path.to_path_buf());

        let labels = match self.bounded(move |c: &dyn Enrichment| c.label_image(&label_path)) {
            Ok(labels) => labels,
            Err(Error::CapabilityTimeout(t)) => {
                warn!(path = %path.display(), timeout = ?t, "Labeling timed out");
                timed_out = true;
                Vec::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Labeling failed");
                self.breaker.record_failure();
                return None;
            }
        };
        drop(crop);

        let face_path = path.to_path_buf();
        let faces = match self.bounded(move |c: &dyn Enrichment| c.detect_faces(&face_path)) {
            Ok(faces) => faces,
            Err(Error::CapabilityTimeout(t)) => {
                warn!(path = %path.display(), timeout = ?t, "Face detection timed out");
                timed_out = true;
                Vec::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Face detection failed");
                self.breaker.record_failure();
                return None;
            }
        };

        if timed_out {
            self.breaker.record_failure();
        } else {
            self.breaker.record_success();
        }

        let labels = LabelSet::new(labels);
        let faces = filter_faces(faces, image_width, &labels, &self.config);
        Some(EnrichmentOutcome { faces, labels })
    }

    /// Run `f` against the capability on a helper thread, giving up after the
    /// configured timeout. A timed-out call keeps running detached.
    fn bounded<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Enrichment) -> Result<T> + Send + 'static,
    {
        let timeout = Duration::from_secs(self.config.timeout_secs);
        let capability = Arc::clone(&self.capability);
        let (tx, rx) = mpsc::channel();

        thread::Builder::new()
            .name("photosift-enrich".into())
            .spawn(move || {
                let _ = tx.send(f(capability.as_ref()));
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(Error::CapabilityTimeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(Error::CapabilityUnavailable),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use tempfile::tempdir;

    fn enabled() -> EnrichmentConfig {
        EnrichmentConfig { enabled: true, ..EnrichmentConfig::default() }
    }

    fn photo(dir: &Path) -> PathBuf {
        let path = dir.join("photo.png");
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(400, 200, |x, _| Rgb([x as u8, 0, 0])))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_filter_faces_by_size_and_context() {
        let config = EnrichmentConfig::default();
        let plain = LabelSet::new(vec![label("Beach", 0.9)]);
        let kept = filter_faces(vec![face(50.0), face(150.0)], Some(1000), &plain, &config);
        assert_eq!(kept, vec![face(150.0)]);

        // Unknown width falls back to 1000px.
        assert_eq!(filter_faces(vec![face(90.0)], None, &plain, &config).len(), 0);

        let screen = LabelSet::new(vec![label("Monitor", 0.6)]);
        assert!(filter_faces(vec![face(500.0)], Some(1000), &screen, &config).is_empty());
    }

    #[test]
    fn test_center_crop_square() {
        let dir = tempdir().unwrap();
        let crop = center_crop_square(&photo(dir.path()), 300).unwrap();
        let img = image::open(crop.path()).unwrap();
        assert_eq!((img.width(), img.height()), (300, 300));

        let crop_path = crop.path().to_path_buf();
        drop(crop);
        assert!(!crop_path.exists());
    }

    #[test]
    fn test_disabled_by_default() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(FakeEnrichment::new(vec![label("Dog", 0.9)], vec![]));
        let enricher = Enricher::new(fake.clone(), EnrichmentConfig::default());
        assert!(enricher.enrich(&photo(dir.path()), Some(400)).is_none());
        assert_eq!(fake.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(Enricher::disabled().enrich(&photo(dir.path()), None).is_none());
    }

    #[test]
    fn test_enrich_produces_filtered_outcome() {
        let dir = tempdir().unwrap();
        let fake = Arc::new(FakeEnrichment::new(
            vec![label("Person", 0.9)],
            vec![face(100.0), face(10.0)],
        ));
        let enricher = Enricher::new(fake, enabled());
        let outcome = enricher.enrich(&photo(dir.path()), Some(400)).unwrap();
        assert_eq!(outcome.face_count(), 1);
        assert!(outcome.labels_json().unwrap().unwrap().contains("Person"));
    }

    #[test]
    fn test_failures_trip_breaker() {
        let dir = tempdir().unwrap();
        let path = photo(dir.path());
        let fake = Arc::new(FakeEnrichment::failing());
        let enricher = Enricher::new(fake.clone(), enabled());

        for _ in 0..4 {
            assert!(enricher.enrich(&path, Some(400)).is_none());
        }
        assert!(enricher.breaker().is_open());
        assert!(!enricher.is_active());

        enricher.enrich(&path, Some(400));
        assert_eq!(fake.calls.load(std::sync::atomic::Ordering::SeqCst), 4);
    }

    #[test]
    fn test_timeout_degrades_to_empty() {
        let dir = tempdir().unwrap();
        let mut fake = FakeEnrichment::new(vec![label("Dog", 0.9)], vec![face(300.0)]);
        fake.delay = Some(Duration::from_millis(1500));
        let config = EnrichmentConfig { timeout_secs: 1, ..enabled() };
        let enricher = Enricher::new(Arc::new(fake), config);

        let outcome = enricher.enrich(&photo(dir.path()), Some(400)).unwrap();
        assert!(outcome.labels.is_empty());
        assert_eq!(outcome.face_count(), 1);
        assert_eq!(enricher.breaker().consecutive_failures(), 1);
    }
}
