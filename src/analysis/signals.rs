//! Per-photo signals: mean luminance, Laplacian-variance sharpness and a
//! 64-bit difference hash, all derived from one fixed-size grayscale sample.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};

use crate::error::{Error, Result};

/// Side length of the grayscale sample every signal is computed from.
pub const SAMPLE_SIZE: u32 = 256;

const HASH_COLS: usize = 9;
const HASH_ROWS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signals {
    pub sharpness: f64,
    pub mean_luma: f64,
    pub phash: PerceptualHash,
}

/// 64-bit difference hash. Bit 63 is the first comparison of the first row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    /// Number of differing bits, in `0..=64`.
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != 16 {
            return Err(Error::InvalidHash(s.to_string()));
        }
        u64::from_str_radix(s, 16)
            .map(PerceptualHash)
            .map_err(|_| Error::InvalidHash(s.to_string()))
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl FromStr for PerceptualHash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PerceptualHash::from_hex(s)
    }
}

/// Fixed-size grayscale sample. Dropped as soon as the signals are computed.
pub struct GraySample {
    pixels: GrayImage,
}

impl GraySample {
    pub fn from_image(img: &DynamicImage) -> Self {
        let pixels = img
            .resize_exact(SAMPLE_SIZE, SAMPLE_SIZE, FilterType::Triangle)
            .to_luma8();
        Self { pixels }
    }

    fn at(&self, x: u32, y: u32) -> f64 {
        self.pixels.get_pixel(x, y).0[0] as f64
    }

    pub fn mean_luma(&self) -> f64 {
        let raw = self.pixels.as_raw();
        if raw.is_empty() {
            return 0.0;
        }
        raw.iter().map(|&p| p as f64).sum::<f64>() / raw.len() as f64
    }

    /// Variance of the 4-neighbour Laplacian over interior pixels.
    pub fn laplacian_variance(&self) -> f64 {
        let (w, h) = self.pixels.dimensions();
        if w < 3 || h < 3 {
            return 0.0;
        }

        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut n = 0.0;
        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let lap = self.at(x, y - 1)
                    + self.at(x - 1, y)
                    + self.at(x + 1, y)
                    + self.at(x, y + 1)
                    - 4.0 * self.at(x, y);
                sum += lap;
                sum_sq += lap * lap;
                n += 1.0;
            }
        }

        let mean = sum / n;
        (sum_sq / n - mean * mean).max(0.0)
    }

    /// Difference hash over a 9x8 box-averaged grid: a bit is set when a cell
    /// is darker than its right neighbour.
    pub fn dhash(&self) -> PerceptualHash {
        let (w, h) = self.pixels.dimensions();
        let mut grid = [[0.0f64; HASH_COLS]; HASH_ROWS];

        for (r, row) in grid.iter_mut().enumerate() {
            let y0 = r as u32 * h / HASH_ROWS as u32;
            let y1 = ((r as u32 + 1) * h / HASH_ROWS as u32).max(y0 + 1);
            for (c, cell) in row.iter_mut().enumerate() {
                let x0 = c as u32 * w / HASH_COLS as u32;
                let x1 = ((c as u32 + 1) * w / HASH_COLS as u32).max(x0 + 1);
                let mut total = 0.0;
                for y in y0..y1.min(h) {
                    for x in x0..x1.min(w) {
                        total += self.at(x, y);
                    }
                }
                *cell = total / ((y1 - y0) * (x1 - x0)) as f64;
            }
        }

        let mut bits = 0u64;
        for (r, row) in grid.iter().enumerate() {
            for c in 0..HASH_COLS - 1 {
                if row[c] < row[c + 1] {
                    bits |= 1u64 << (63 - (r * 8 + c));
                }
            }
        }
        PerceptualHash(bits)
    }

    pub fn signals(&self) -> Signals {
        Signals {
            sharpness: self.laplacian_variance(),
            mean_luma: self.mean_luma(),
            phash: self.dhash(),
        }
    }
}

/// Decode the image at `path` and compute its signals. The decoded image and
/// the sample are released before this returns.
pub fn extract_signals(path: &Path) -> Result<Signals> {
    let img = image::open(path).map_err(|e| Error::extraction(path, e))?;
    let sample = GraySample::from_image(&img);
    drop(img);
    Ok(sample.signals())
}
