//! Image analysis: signal extraction, blur classification, near-duplicate
//! matching and best-shot scoring.

pub mod best_shot;
pub mod blur;
pub mod signals;
pub mod similarity;

pub use best_shot::{recalculate_all, select_best_shot};
pub use blur::{classify, list_blurry, BlurVerdict};
pub use signals::{extract_signals, PerceptualHash, Signals};
pub use similarity::{find_matches, Match};
