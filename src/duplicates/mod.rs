//! Duplicate group maintenance.
//!
//! Groups form as a side effect of analysis: a newly analyzed asset with
//! matches joins the group of its closest grouped match, or seeds a new
//! group with its closest match. When matches span several groups the first
//! one found wins and the groups are left unmerged.

use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::analysis::best_shot::select_best_shot;
use crate::analysis::Match;
use crate::db::{now_millis, GroupRepo};
use crate::error::Result;

fn new_group_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("grp_{}_{}", now_millis(), seq)
}

/// Remove `asset_id` from whatever group claims it. The old group is deleted
/// when left empty, otherwise its best shot is re-elected.
pub fn detach(conn: &Connection, asset_id: &str) -> Result<Option<String>> {
    let groups = GroupRepo::new(conn);
    let Some(group_id) = groups.group_of(asset_id)? else {
        return Ok(None);
    };

    groups.remove_member(&group_id, asset_id)?;
    if groups.members(&group_id)?.is_empty() {
        groups.delete_group(&group_id)?;
        debug!(group_id = %group_id, "Deleted emptied group");
    } else {
        select_best_shot(conn, &group_id)?;
    }
    Ok(Some(group_id))
}

/// Place `asset_id` into a group according to `matches` (closest first) and
/// re-elect that group's best shot. Returns the group joined, if any.
///
/// Matched assets that belong to no group yet are pulled into the same group
/// so that every match ends up grouped.
pub fn assign(conn: &Connection, asset_id: &str, matches: &[Match]) -> Result<Option<String>> {
    let Some(closest) = matches.first() else {
        return Ok(None);
    };
    let groups = GroupRepo::new(conn);

    let mut existing = None;
    for m in matches {
        if let Some(group_id) = groups.group_of(&m.asset_id)? {
            existing = Some(group_id);
            break;
        }
    }

    let group_id = match existing {
        Some(group_id) => group_id,
        None => {
            let group_id = new_group_id();
            groups.create_group(&group_id, &closest.asset_id)?;
            groups.add_member(&group_id, &closest.asset_id, 0)?;
            info!(group_id = %group_id, seed = %closest.asset_id, "Created duplicate group");
            group_id
        }
    };

    groups.add_member(&group_id, asset_id, closest.distance)?;
    for m in matches {
        if groups.group_of(&m.asset_id)?.is_none() {
            groups.add_member(&group_id, &m.asset_id, m.distance)?;
        }
    }

    select_best_shot(conn, &group_id)?;
    Ok(Some(group_id))
}

/// Move every member of `source` into `target`, delete `source` and re-elect
/// `target`. Not used during scanning.
pub fn merge_groups(conn: &Connection, target: &str, source: &str) -> Result<usize> {
    let moved = GroupRepo::new(conn).merge_groups(target, source)?;
    select_best_shot(conn, target)?;
    info!(target, source, moved, "Merged duplicate groups");
    Ok(moved)
}

pub fn delete_all(conn: &Connection) -> Result<()> {
    GroupRepo::new(conn).delete_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::assets::test_support::insert_done;
    use crate::db::test_db;

    fn m(id: &str, distance: u32) -> Match {
        Match { asset_id: id.into(), distance }
    }

    fn member_ids(conn: &Connection, group_id: &str) -> Vec<String> {
        GroupRepo::new(conn)
            .members(group_id)
            .unwrap()
            .into_iter()
            .map(|m| m.asset_id)
            .collect()
    }

    #[test]
    fn test_new_group_seeded_by_closest_match() {
        let db = test_db();
        insert_done(db.conn(), "a", 1, "0000000000000000", 100.0, 140.0);
        insert_done(db.conn(), "b", 2, "00000000000003ff", 300.0, 140.0);

        let group_id = assign(db.conn(), "b", &[m("a", 10)]).unwrap().unwrap();
        assert!(group_id.starts_with("grp_"));

        let members = db.groups().members(&group_id).unwrap();
        assert_eq!(
            members.iter().map(|m| (m.asset_id.as_str(), m.distance)).collect::<Vec<_>>(),
            vec![("a", 0), ("b", 10)]
        );
        let group = db.groups().get_group(&group_id).unwrap().unwrap();
        assert_eq!(group.representative_asset_id.as_deref(), Some("a"));
        assert_eq!(group.best_asset_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_joins_first_existing_group() {
        let db = test_db();
        for id in ["a", "b", "c", "d", "new"] {
            insert_done(db.conn(), id, 1, "0000000000000000", 100.0, 140.0);
        }
        let g1 = assign(db.conn(), "b", &[m("a", 2)]).unwrap().unwrap();
        let g2 = assign(db.conn(), "d", &[m("c", 2)]).unwrap().unwrap();
        assert_ne!(g1, g2);

        // Closest grouped match is "c", so g2 wins; g1 is left alone.
        let joined = assign(db.conn(), "new", &[m("c", 1), m("a", 3)]).unwrap().unwrap();
        assert_eq!(joined, g2);
        assert_eq!(member_ids(db.conn(), &g2), vec!["c", "d", "new"]);
        assert_eq!(member_ids(db.conn(), &g1), vec!["a", "b"]);
    }

    #[test]
    fn test_ungrouped_matches_are_pulled_in() {
        let db = test_db();
        for id in ["a", "b", "c"] {
            insert_done(db.conn(), id, 1, "0000000000000000", 100.0, 140.0);
        }
        let group_id = assign(db.conn(), "c", &[m("a", 1), m("b", 4)]).unwrap().unwrap();
        assert_eq!(member_ids(db.conn(), &group_id), vec!["a", "c", "b"]);
        for id in ["a", "b", "c"] {
            assert_eq!(db.groups().group_of(id).unwrap().as_deref(), Some(group_id.as_str()));
        }
    }

    #[test]
    fn test_no_matches_creates_nothing() {
        let db = test_db();
        assert_eq!(assign(db.conn(), "x", &[]).unwrap(), None);
        assert!(db.groups().all_groups().unwrap().is_empty());
    }

    #[test]
    fn test_detach_deletes_or_reelects() {
        let db = test_db();
        insert_done(db.conn(), "a", 1, "0000000000000000", 10.0, 140.0);
        insert_done(db.conn(), "b", 2, "0000000000000000", 400.0, 140.0);
        insert_done(db.conn(), "c", 3, "0000000000000000", 200.0, 140.0);
        let group_id = assign(db.conn(), "b", &[m("a", 1), m("c", 2)]).unwrap().unwrap();
        let group = db.groups().get_group(&group_id).unwrap().unwrap();
        assert_eq!(group.best_asset_id.as_deref(), Some("b"));

        assert_eq!(detach(db.conn(), "b").unwrap().as_deref(), Some(group_id.as_str()));
        let group = db.groups().get_group(&group_id).unwrap().unwrap();
        assert_eq!(group.best_asset_id.as_deref(), Some("c"));

        detach(db.conn(), "a").unwrap();
        detach(db.conn(), "c").unwrap();
        assert!(db.groups().get_group(&group_id).unwrap().is_none());
        assert_eq!(detach(db.conn(), "c").unwrap(), None);
    }

    #[test]
    fn test_merge_reelects_target() {
        let db = test_db();
        insert_done(db.conn(), "a", 1, "0000000000000000", 10.0, 140.0);
        insert_done(db.conn(), "b", 2, "0000000000000000", 20.0, 140.0);
        insert_done(db.conn(), "c", 3, "0000000000000000", 30.0, 140.0);
        insert_done(db.conn(), "d", 4, "0000000000000000", 450.0, 140.0);
        let g1 = assign(db.conn(), "b", &[m("a", 1)]).unwrap().unwrap();
        let g2 = assign(db.conn(), "d", &[m("c", 1)]).unwrap().unwrap();

        assert_eq!(merge_groups(db.conn(), &g1, &g2).unwrap(), 2);
        assert!(db.groups().get_group(&g2).unwrap().is_none());
        let target = db.groups().get_group(&g1).unwrap().unwrap();
        assert_eq!(target.best_asset_id.as_deref(), Some("d"));

        delete_all(db.conn()).unwrap();
        assert!(db.groups().all_groups().unwrap().is_empty());
    }
}
