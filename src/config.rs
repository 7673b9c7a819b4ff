use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub blur: BlurConfig,

    #[serde(default)]
    pub similarity: SimilarityConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    #[serde(default = "default_library_root")]
    pub root: PathBuf,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Where deleted assets are moved to.
    #[serde(default = "default_trash_path")]
    pub trash_path: PathBuf,
}

fn default_library_root() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_trash_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("photosift/.trash")
}

fn default_image_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff"]
        .iter()
        .map(|e| e.to_string())
        .collect()
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_library_root(),
            image_extensions: default_image_extensions(),
            trash_path: default_trash_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Pending assets pulled per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Assets requested per library page during reconciliation.
    #[serde(default = "default_sync_page_size")]
    pub sync_page_size: usize,

    /// Pause between assets, in milliseconds. Zero only yields the thread.
    #[serde(default)]
    pub throttle_ms: u64,
}

fn default_batch_size() -> usize {
    20
}

fn default_sync_page_size() -> usize {
    100
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            sync_page_size: default_sync_page_size(),
            throttle_ms: 0,
        }
    }
}

/// Adaptive blur thresholds. Dark and bright images get a lower bar since
/// poor lighting legitimately reduces apparent sharpness.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlurConfig {
    #[serde(default = "default_base_threshold")]
    pub base_threshold: f64,

    #[serde(default = "default_dark_threshold")]
    pub dark_threshold: f64,

    #[serde(default = "default_light_multiplier")]
    pub dark_multiplier: f64,

    #[serde(default = "default_bright_threshold")]
    pub bright_threshold: f64,

    #[serde(default = "default_light_multiplier")]
    pub bright_multiplier: f64,
}

fn default_base_threshold() -> f64 {
    100.0
}

fn default_dark_threshold() -> f64 {
    40.0
}

fn default_bright_threshold() -> f64 {
    220.0
}

fn default_light_multiplier() -> f64 {
    0.7
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            base_threshold: default_base_threshold(),
            dark_threshold: default_dark_threshold(),
            dark_multiplier: default_light_multiplier(),
            bright_threshold: default_bright_threshold(),
            bright_multiplier: default_light_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimilarityConfig {
    /// Candidates must be captured within this many seconds of the target.
    #[serde(default = "default_time_window_secs")]
    pub time_window_secs: i64,

    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Hamming distance must be strictly below this to count as a match.
    #[serde(default = "default_similarity_threshold")]
    pub threshold: u32,
}

fn default_time_window_secs() -> i64 {
    120
}

fn default_max_candidates() -> usize {
    10
}

fn default_similarity_threshold() -> u32 {
    15 // out of 64 bits; tolerates small edits like overlaid text
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            time_window_secs: default_time_window_secs(),
            max_candidates: default_max_candidates(),
            threshold: default_similarity_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Face detection and labeling are off unless explicitly enabled.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_enrichment_timeout")]
    pub timeout_secs: u64,

    /// Consecutive failures tolerated before enrichment is switched off.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Faces narrower than this fraction of the image width are ignored.
    #[serde(default = "default_min_face_ratio")]
    pub min_face_ratio: f64,

    #[serde(default = "default_disqualifier_confidence")]
    pub disqualifier_confidence: f32,

    /// Side of the square crop handed to the labeler. Zero disables cropping.
    #[serde(default = "default_label_crop_size")]
    pub label_crop_size: u32,
}

fn default_enrichment_timeout() -> u64 {
    5
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_min_face_ratio() -> f64 {
    0.1
}

fn default_disqualifier_confidence() -> f32 {
    0.4
}

fn default_label_crop_size() -> u32 {
    300
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: default_enrichment_timeout(),
            failure_threshold: default_failure_threshold(),
            min_face_ratio: default_min_face_ratio(),
            disqualifier_confidence: default_disqualifier_confidence(),
            label_crop_size: default_label_crop_size(),
        }
    }
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photosift")
        .join("photosift.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            library: LibraryConfig::default(),
            scanner: ScannerConfig::default(),
            blur: BlurConfig::default(),
            similarity: SimilarityConfig::default(),
            enrichment: EnrichmentConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photosift")
    }

    fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PHOTOSIFT_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }
}
