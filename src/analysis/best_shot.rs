//! Best-shot election for duplicate groups.

use rusqlite::Connection;
use tracing::debug;

use crate::db::{AssetRecord, AssetRepo, GroupRepo};
use crate::error::Result;

const SHARPNESS_CAP: f64 = 500.0;
const LUMA_TARGET: f64 = 140.0;
const LUMA_TOLERANCE: f64 = 40.0;
const DEFAULT_LUMA: f64 = 128.0;

/// Weighted quality score: resolution, capped sharpness and closeness to a
/// mid-tone exposure.
pub fn score(asset: &AssetRecord) -> f64 {
    let resolution = match (asset.width, asset.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w as f64 * h as f64).log10() * 10.0,
        _ => 0.0,
    };
    let sharpness = asset.blur_score.unwrap_or(0.0).min(SHARPNESS_CAP) / 5.0;
    let luma = asset.mean_luma.unwrap_or(DEFAULT_LUMA);
    let lighting = (LUMA_TOLERANCE - (luma - LUMA_TARGET).abs()).max(0.0);

    resolution + sharpness + lighting
}

/// Highest-scoring asset; ties go to the earliest.
pub fn pick_best<'a, I>(assets: I) -> Option<&'a AssetRecord>
where
    I: IntoIterator<Item = &'a AssetRecord>,
{
    let mut best: Option<(&AssetRecord, f64)> = None;
    for asset in assets {
        let s = score(asset);
        match best {
            Some((_, top)) if s <= top => {}
            _ => best = Some((asset, s)),
        }
    }
    best.map(|(asset, _)| asset)
}

/// Score every member of `group_id` and store the winner. Returns the elected
/// asset, or `None` for an empty group.
pub fn select_best_shot(conn: &Connection, group_id: &str) -> Result<Option<String>> {
    let groups = GroupRepo::new(conn);
    let assets = AssetRepo::new(conn);

    let mut records = Vec::new();
    for member in groups.members(group_id)? {
        if let Some(record) = assets.get(&member.asset_id)? {
            records.push(record);
        }
    }

    let Some(best) = pick_best(&records) else {
        return Ok(None);
    };
    groups.set_best(group_id, &best.asset_id)?;
    debug!(group_id, best = %best.asset_id, "Elected best shot");
    Ok(Some(best.asset_id.clone()))
}

/// Re-elect every group. Returns how many elections changed.
pub fn recalculate_all(conn: &Connection) -> Result<usize> {
    let mut changed = 0;
    for group in GroupRepo::new(conn).all_groups()? {
        let elected = select_best_shot(conn, &group.group_id)?;
        if elected.is_some() && elected != group.best_asset_id {
            changed += 1;
        }
    }
    Ok(changed)
}
