//! Adaptive blur threshold.

use crate::config::BlurConfig;
use crate::db::{AssetRecord, AssetRepo};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurVerdict {
    pub is_blurry: bool,
    pub adjusted_threshold: f64,
}

/// Very dark and very bright photos legitimately show less edge energy, so
/// the threshold is relaxed at both ends of the luminance range.
pub fn classify(sharpness: f64, mean_luma: f64, config: &BlurConfig) -> BlurVerdict {
    let mut threshold = config.base_threshold;
    if mean_luma < config.dark_threshold {
        threshold *= config.dark_multiplier;
    } else if mean_luma > config.bright_threshold {
        threshold *= config.bright_multiplier;
    }

    BlurVerdict {
        is_blurry: sharpness < threshold,
        adjusted_threshold: threshold,
    }
}

/// Done assets whose stored sharpness is blurry under `config`, blurriest
/// first. At most `limit` scored assets are examined.
pub fn list_blurry(
    assets: &AssetRepo<'_>,
    config: &BlurConfig,
    limit: usize,
) -> Result<Vec<(AssetRecord, BlurVerdict)>> {
    Ok(assets
        .scored_assets(limit)?
        .into_iter()
        .filter_map(|asset| {
            let sharpness = asset.blur_score?;
            let verdict = classify(sharpness, asset.mean_luma.unwrap_or(128.0), config);
            verdict.is_blurry.then_some((asset, verdict))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::assets::test_support::insert_done;
    use crate::db::test_db;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_dark_photo_gets_relaxed_threshold() {
        let verdict = classify(50.0, 30.0, &BlurConfig::default());
        assert!(approx(verdict.adjusted_threshold, 70.0));
        assert!(verdict.is_blurry);
    }

    #[test]
    fn test_mid_tone_uses_base_threshold() {
        let config = BlurConfig::default();
        let verdict = classify(100.0, 128.0, &config);
        assert!(approx(verdict.adjusted_threshold, 100.0));
        assert!(!verdict.is_blurry);
        assert!(classify(99.9, 128.0, &config).is_blurry);
    }

    #[test]
    fn test_bright_photo_gets_relaxed_threshold() {
        let verdict = classify(80.0, 240.0, &BlurConfig::default());
        assert!(approx(verdict.adjusted_threshold, 70.0));
        assert!(!verdict.is_blurry);
    }

    #[test]
    fn test_threshold_boundaries_are_exclusive() {
        let config = BlurConfig::default();
        assert!(approx(classify(0.0, 40.0, &config).adjusted_threshold, 100.0));
        assert!(approx(classify(0.0, 220.0, &config).adjusted_threshold, 100.0));
    }

    #[test]
    fn test_list_blurry_uses_stored_scores() {
        let db = test_db();
        insert_done(db.conn(), "dark_soft", 1, "0000000000000000", 50.0, 30.0);
        insert_done(db.conn(), "dark_ok", 2, "0000000000000000", 80.0, 30.0);
        insert_done(db.conn(), "mid_soft", 3, "0000000000000000", 90.0, 128.0);
        insert_done(db.conn(), "sharp", 4, "0000000000000000", 400.0, 128.0);

        let blurry = list_blurry(&db.assets(), &BlurConfig::default(), 100).unwrap();
        let ids: Vec<_> = blurry.iter().map(|(a, _)| a.asset_id.as_str()).collect();
        assert_eq!(ids, vec!["dark_soft", "mid_soft"]);
        assert!(approx(blurry[0].1.adjusted_threshold, 70.0));
    }
}
