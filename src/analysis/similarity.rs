//! Near-duplicate candidates within a capture-time window.

use tracing::warn;

use super::signals::PerceptualHash;
use crate::config::SimilarityConfig;
use crate::db::AssetRepo;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub asset_id: String,
    pub distance: u32,
}

/// Done assets captured within the configured window of `taken_at` whose
/// hash is closer than the threshold, closest first. `exclude` keeps the
/// target itself out of its own candidates.
///
/// Assets without a capture time have no window and never match.
pub fn find_matches(
    assets: &AssetRepo<'_>,
    target: &PerceptualHash,
    taken_at: Option<i64>,
    exclude: Option<&str>,
    config: &SimilarityConfig,
) -> Result<Vec<Match>> {
    let Some(taken_at) = taken_at else {
        return Ok(Vec::new());
    };

    let candidates = assets.recent_done_within(
        taken_at,
        config.time_window_secs.saturating_mul(1000),
        config.max_candidates,
        exclude,
    )?;

    let mut matches: Vec<Match> = candidates
        .into_iter()
        .filter_map(|candidate| {
            let hex = candidate.phash.as_deref()?;
            match PerceptualHash::from_hex(hex) {
                Ok(hash) => Some((candidate.asset_id, target.distance(&hash))),
                Err(e) => {
                    warn!(
                        asset_id = %candidate.asset_id,
                        error = %e,
                        "Skipping candidate with bad hash"
                    );
                    None
                }
            }
        })
        .filter(|(_, distance)| *distance < config.threshold)
        .map(|(asset_id, distance)| Match { asset_id, distance })
        .collect();

    // Stable: equal distances keep most-recent-first order.
    matches.sort_by_key(|m| m.distance);
    Ok(matches)
}
