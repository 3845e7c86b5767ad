//! Level placement and movement
//!
//! Non-legacy levels hold the dense positions `1..=n`, legacy levels the
//! tail `n+1..=m`. Every position change is one range-shift UPDATE followed
//! by the point cascade for the touched range and the history entries.

use std::collections::HashSet;

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use super::context::UnitOfWork;
use super::history;
use super::models::{new_id, HistoryAction, LevelRow, SubmissionStatus};
use super::ordering::DenseOrder;
use super::points;
use super::row_exists;
use super::submissions::{self, SubmissionUpsert};
use super::tables::TableNames;
use crate::error::{ListError, Result};

const COLUMNS: &str =
    "id, name, game_level_id, position, legacy, points, publisher_id, verification_id, created_at, updated_at";

/// A level to be placed on the list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewLevel {
    pub name: String,
    pub game_level_id: Option<i64>,
    pub position: i64,
    #[serde(default)]
    pub legacy: bool,
    pub publisher_id: Option<String>,
    #[serde(default)]
    pub creators: Vec<String>,
    pub verification: Option<VerificationInput>,
}

/// The verifying clear recorded together with a placement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationInput {
    pub submitted_by: String,
    pub video_url: Option<String>,
    #[serde(default)]
    pub mobile: bool,
    pub fps: Option<i64>,
}

/// Partial level edit; `None` leaves the field alone
///
/// The nullable columns take `Some(None)` to clear them. In JSON an absent
/// key leaves the column and an explicit `null` clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LevelUpdate {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub game_level_id: Option<Option<i64>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub publisher_id: Option<Option<String>>,
    pub position: Option<i64>,
    pub legacy: Option<bool>,
    /// Full replacement of the creator set
    pub creators: Option<Vec<String>>,
}

/// A key that is present in the input, `null` included
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// What a move did to the list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    pub old_position: i64,
    pub new_position: i64,
    pub old_legacy: bool,
    pub new_legacy: bool,
    /// Levels pushed one slot aside
    pub shifted: usize,
}

fn positions(t: &TableNames) -> DenseOrder<'_> {
    DenseOrder::new(&t.levels, "position")
}

fn check_range(what: &str, value: i64, low: i64, high: i64) -> Result<()> {
    if value < low || value > high {
        return Err(ListError::validation(format!(
            "{} {} is outside the applicable range {}..={}",
            what, value, low, high
        )));
    }
    Ok(())
}

fn require_user(conn: &Connection, t: &TableNames, user_id: &str) -> Result<()> {
    if !row_exists(conn, &t.users, user_id)? {
        return Err(ListError::not_found(format!("user {}", user_id)));
    }
    Ok(())
}

/// Number of levels, optionally filtered by legacy-ness
pub fn count_levels(conn: &Connection, t: &TableNames, legacy: Option<bool>) -> Result<i64> {
    let count = match legacy {
        Some(legacy) => conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE legacy = ?", t.levels),
            params![legacy],
            |row| row.get(0),
        )?,
        None => conn.query_row(&format!("SELECT COUNT(*) FROM {}", t.levels), [], |row| row.get(0))?,
    };
    Ok(count)
}

// ============================================================================
// Placement
// ============================================================================

/// Insert a level at `input.position`, pushing everything at or below it
/// down by one.
///
/// Non-legacy levels may go anywhere in `1..=n+1`, legacy ones in
/// `n+1..=m+1`.
pub fn place_level_in(uow: &UnitOfWork<'_>, input: NewLevel, actor: &str) -> Result<LevelRow> {
    let t = uow.tables();
    let conn = uow.conn();

    if input.name.trim().is_empty() {
        return Err(ListError::validation("level name must not be empty"));
    }
    require_user(conn, t, actor)?;
    if let Some(publisher) = &input.publisher_id {
        require_user(conn, t, publisher)?;
    }

    let level_count = count_levels(conn, t, Some(false))?;
    let total_count = count_levels(conn, t, None)?;
    let (low, high) = if input.legacy {
        (level_count + 1, total_count + 1)
    } else {
        (1, level_count + 1)
    };
    check_range("position", input.position, low, high)?;

    positions(t).open_gap(conn, input.position)?;

    let id = new_id();
    conn.execute(
        &format!(
            "INSERT INTO {} (id, name, game_level_id, position, legacy, points, publisher_id, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?7)",
            t.levels
        ),
        params![
            id,
            input.name,
            input.game_level_id,
            input.position,
            input.legacy,
            input.publisher_id,
            uow.now()
        ],
    )?;

    update_creators(uow, &id, &input.creators)?;

    if let Some(verification) = input.verification {
        let record = submissions::upsert_submission_in(
            uow,
            SubmissionUpsert {
                level_id: id.clone(),
                submitted_by: verification.submitted_by,
                status: Some(SubmissionStatus::Accepted),
                placement_order: Some(1),
                reviewer_id: Some(actor.to_string()),
                video_url: verification.video_url,
                mobile: Some(verification.mobile),
                fps: verification.fps,
                ..Default::default()
            },
            &SubmissionStatus::ALL,
        )?;
        conn.execute(
            &format!("UPDATE {} SET verification_id = ? WHERE id = ?", t.levels),
            params![record.id, id],
        )?;
    }

    // A new non-legacy level stretches the curve over the whole list
    points::regenerate_lookup(uow)?;
    let min_pos = if input.legacy { input.position } else { 1 };
    points::update_level_points_by_range(uow, min_pos, total_count + 1)?;

    history::record_level_event(uow, &id, HistoryAction::Placed, input.position, actor)?;
    let shifted = history::record_shifted_above(uow, &id, input.position, actor)?;

    debug!(id = %id, position = input.position, legacy = input.legacy, shifted, "Placed level");
    get_level(conn, t, &id)?.ok_or_else(|| ListError::not_found(format!("level {}", id)))
}

// ============================================================================
// Movement
// ============================================================================

/// Move a level and/or flip its legacy flag.
///
/// Returns `None` when the requested position and legacy-ness are what the
/// level already has.
pub fn move_level_in(
    uow: &UnitOfWork<'_>,
    level_id: &str,
    position: Option<i64>,
    legacy: Option<bool>,
    actor: &str,
) -> Result<Option<MoveOutcome>> {
    let t = uow.tables();
    let conn = uow.conn();

    let level = get_level(conn, t, level_id)?.ok_or_else(|| ListError::not_found(format!("level {}", level_id)))?;
    let old = level.position;
    let new = position.unwrap_or(old);
    let new_legacy = legacy.unwrap_or(level.legacy);
    let legacy_changed = new_legacy != level.legacy;

    if new == old && !legacy_changed {
        return Ok(None);
    }
    require_user(conn, t, actor)?;

    // Ranges as seen before the move: n non-legacy, m in total
    let level_count = count_levels(conn, t, Some(false))?;
    let total_count = count_levels(conn, t, None)?;
    let (low, high) = match (level.legacy, new_legacy) {
        (false, false) => (1, level_count),
        (true, true) => (level_count + 1, total_count),
        (false, true) => (level_count, total_count),
        (true, false) => (1, level_count + 1),
    };
    check_range("position", new, low, high)?;

    if legacy_changed {
        conn.execute(
            &format!("UPDATE {} SET legacy = ?, updated_at = ? WHERE id = ?", t.levels),
            params![new_legacy, uow.now(), level_id],
        )?;
    }
    let shifted = positions(t).move_item(conn, level_id, old, new)?;
    if new != old && !legacy_changed {
        conn.execute(
            &format!("UPDATE {} SET updated_at = ? WHERE id = ?", t.levels),
            params![uow.now(), level_id],
        )?;
    }

    let (min_pos, max_pos) = (old.min(new), old.max(new));
    if legacy_changed {
        // n changed, so every non-legacy value moved along the curve
        points::regenerate_lookup(uow)?;
        points::update_level_points_by_range(uow, 1, total_count)?;
    } else {
        points::update_level_points_by_range(uow, min_pos, max_pos)?;
    }

    let moved_up = new < old;
    let level_action = match (legacy_changed, new_legacy, moved_up) {
        (true, true, _) => HistoryAction::MovedToLegacy,
        (true, false, _) => HistoryAction::MovedFromLegacy,
        (false, _, true) => HistoryAction::MovedUp,
        (false, _, false) => HistoryAction::MovedDown,
    };
    let other_action = if moved_up {
        HistoryAction::MovedPastUp
    } else {
        HistoryAction::MovedPastDown
    };
    history::record_level_event(uow, level_id, level_action, new, actor)?;
    if new != old {
        history::record_shifted_range(uow, level_id, other_action, min_pos, max_pos, actor)?;
    }

    debug!(id = %level_id, old, new, legacy = new_legacy, shifted, "Moved level");
    Ok(Some(MoveOutcome {
        old_position: old,
        new_position: new,
        old_legacy: level.legacy,
        new_legacy,
        shifted,
    }))
}

/// Apply a partial edit: move first, then plain fields, then creators
pub fn update_level_in(
    uow: &UnitOfWork<'_>,
    level_id: &str,
    update: LevelUpdate,
    actor: &str,
) -> Result<(LevelRow, Option<MoveOutcome>)> {
    let t = uow.tables();
    let conn = uow.conn();

    if !row_exists(conn, &t.levels, level_id)? {
        return Err(ListError::not_found(format!("level {}", level_id)));
    }

    let moved = if update.position.is_some() || update.legacy.is_some() {
        move_level_in(uow, level_id, update.position, update.legacy, actor)?
    } else {
        None
    };

    if let Some(name) = &update.name {
        if name.trim().is_empty() {
            return Err(ListError::validation("level name must not be empty"));
        }
    }
    if let Some(Some(publisher)) = &update.publisher_id {
        require_user(conn, t, publisher)?;
    }
    conn.execute(
        &format!(
            "UPDATE {} SET name = COALESCE(?1, name), \
             game_level_id = CASE WHEN ?2 THEN ?3 ELSE game_level_id END, \
             publisher_id = CASE WHEN ?4 THEN ?5 ELSE publisher_id END, \
             updated_at = ?6 WHERE id = ?7",
            t.levels
        ),
        params![
            update.name,
            update.game_level_id.is_some(),
            update.game_level_id.flatten(),
            update.publisher_id.is_some(),
            update.publisher_id.as_ref().and_then(|p| p.as_deref()),
            uow.now(),
            level_id
        ],
    )?;

    if let Some(creators) = &update.creators {
        update_creators(uow, level_id, creators)?;
    }

    let level = get_level(conn, t, level_id)?.ok_or_else(|| ListError::not_found(format!("level {}", level_id)))?;
    Ok((level, moved))
}

/// Replace a level's creator set with `creator_ids`
pub fn update_creators(uow: &UnitOfWork<'_>, level_id: &str, creator_ids: &[String]) -> Result<()> {
    let t = uow.tables();
    let conn = uow.conn();

    for creator in creator_ids {
        require_user(conn, t, creator)?;
    }

    let current: HashSet<String> = creators_of(conn, t, level_id)?.into_iter().collect();
    let wanted: HashSet<&str> = creator_ids.iter().map(String::as_str).collect();

    let mut removed = 0;
    for gone in current.iter().filter(|id| !wanted.contains(id.as_str())) {
        removed += conn.execute(
            &format!("DELETE FROM {} WHERE level_id = ? AND user_id = ?", t.creators),
            params![level_id, gone],
        )?;
    }
    let mut added = 0;
    for new in wanted.iter().filter(|id| !current.contains(**id)) {
        added += conn.execute(
            &format!("INSERT INTO {} (level_id, user_id) VALUES (?, ?)", t.creators),
            params![level_id, new],
        )?;
    }

    debug!(level_id = %level_id, added, removed, "Updated creators");
    Ok(())
}

// ============================================================================
// Reads
// ============================================================================

pub fn get_level(conn: &Connection, t: &TableNames, level_id: &str) -> Result<Option<LevelRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM {} WHERE id = ?", COLUMNS, t.levels),
            params![level_id],
            LevelRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Levels in position order, legacy tail included on request
pub fn list_levels(conn: &Connection, t: &TableNames, include_legacy: bool) -> Result<Vec<LevelRow>> {
    let filter = if include_legacy { "" } else { "WHERE legacy = 0" };
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} {} ORDER BY position",
        COLUMNS, t.levels, filter
    ))?;
    let rows = stmt
        .query_map([], LevelRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Creator user ids for a level
pub fn creators_of(conn: &Connection, t: &TableNames, level_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT user_id FROM {} WHERE level_id = ? ORDER BY user_id",
        t.creators
    ))?;
    let ids = stmt
        .query_map(params![level_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListConfig;
    use crate::db::leaderboard;
    use crate::db::points::PointFormula;
    use crate::db::ListDb;

    fn setup() -> ListDb {
        let list = ListConfig {
            default_formula: PointFormula::Fixed {
                values: vec![100.0, 90.0, 80.0, 70.0, 60.0, 50.0, 40.0],
            },
            ..Default::default()
        };
        let db = ListDb::open_in_memory(list).unwrap();
        db.with_conn(|conn, t| {
            conn.execute_batch(&format!(
                "INSERT INTO {} (id, username, global_name) VALUES ('mod', 'mod', 'Mod'), ('v', 'v', 'Verifier'), ('c1', 'c1', 'C1'), ('c2', 'c2', 'C2');",
                t.users
            ))?;
            Ok(())
        })
        .unwrap();
        db
    }

    fn place(db: &ListDb, name: &str, position: i64, legacy: bool) -> Result<LevelRow> {
        db.run_in_transaction(|uow| {
            place_level_in(
                uow,
                NewLevel {
                    name: name.to_string(),
                    position,
                    legacy,
                    ..Default::default()
                },
                "mod",
            )
        })
    }

    fn names(db: &ListDb) -> Vec<(String, i64, bool)> {
        db.with_conn(|conn, t| list_levels(conn, t, true))
            .unwrap()
            .into_iter()
            .map(|l| (l.name, l.position, l.legacy))
            .collect()
    }

    fn seed_five(db: &ListDb) -> Vec<LevelRow> {
        (1..=5).map(|i| place(db, &format!("L{}", i), i, false).unwrap()).collect()
    }

    #[test]
    fn test_place_in_the_middle() {
        let db = setup();
        let old = seed_five(&db);
        let placed = place(&db, "New", 3, false).unwrap();
        assert_eq!(placed.position, 3);
        assert_eq!(placed.points, 80.0);

        let order: Vec<_> = names(&db).into_iter().map(|(n, p, _)| (n, p)).collect();
        assert_eq!(
            order,
            vec![
                ("L1".to_string(), 1),
                ("L2".to_string(), 2),
                ("New".to_string(), 3),
                ("L3".to_string(), 4),
                ("L4".to_string(), 5),
                ("L5".to_string(), 6)
            ]
        );

        let entries = db.with_conn(|conn, t| history::caused_by(conn, t, &placed.id)).unwrap();
        let placed_entries: Vec<_> = entries.iter().filter(|e| e.action == HistoryAction::Placed).collect();
        assert_eq!(placed_entries.len(), 1);
        let mut above: Vec<_> = entries
            .iter()
            .filter(|e| e.action == HistoryAction::PlacedAbove)
            .map(|e| (e.level_id.clone(), e.new_position))
            .collect();
        above.sort_by_key(|(_, p)| *p);
        assert_eq!(
            above,
            vec![(old[2].id.clone(), 4), (old[3].id.clone(), 5), (old[4].id.clone(), 6)]
        );

        // points follow the new positions
        let l5 = db.with_conn(|conn, t| get_level(conn, t, &old[4].id)).unwrap().unwrap();
        assert_eq!(l5.points, 50.0);
    }

    #[test]
    fn test_place_out_of_range_changes_nothing() {
        let db = setup();
        seed_five(&db);
        assert!(matches!(place(&db, "Far", 7, false), Err(ListError::Validation(_))));
        assert!(matches!(place(&db, "Zero", 0, false), Err(ListError::Validation(_))));
        assert!(matches!(place(&db, "Old", 3, true), Err(ListError::Validation(_))));
        assert_eq!(names(&db).len(), 5);
        assert_eq!(db.stats().unwrap().history_count, 5);
    }

    #[test]
    fn test_legacy_tail() {
        let db = setup();
        seed_five(&db);
        let legacy = place(&db, "Retired", 6, true).unwrap();
        assert_eq!(legacy.points, 0.0);
        let err = place(&db, "Sneaky", 8, true).unwrap_err();
        assert!(matches!(err, ListError::Validation(_)));

        // a non-legacy level placed at n+1 lands above the legacy tail
        let placed = place(&db, "Tail", 6, false).unwrap();
        assert_eq!(placed.points, 50.0);
        let order = names(&db);
        assert_eq!(order[5], ("Tail".to_string(), 6, false));
        assert_eq!(order[6], ("Retired".to_string(), 7, true));
    }

    #[test]
    fn test_move_is_a_permutation() {
        let db = setup();
        let levels = seed_five(&db);

        let outcome = db
            .run_in_transaction(|uow| move_level_in(uow, &levels[4].id, Some(2), None, "mod"))
            .unwrap()
            .unwrap();
        assert_eq!(outcome.shifted, 3);
        let order: Vec<_> = names(&db).into_iter().map(|(n, p, _)| (n, p)).collect();
        assert_eq!(
            order,
            vec![("L1".to_string(), 1), ("L5".to_string(), 2), ("L2".to_string(), 3), ("L3".to_string(), 4), ("L4".to_string(), 5)]
        );

        let l5 = db.with_conn(|conn, t| get_level(conn, t, &levels[4].id)).unwrap().unwrap();
        assert_eq!(l5.points, 90.0);
        let entries = db.with_conn(|conn, t| history::level_history(conn, t, &levels[1].id)).unwrap();
        assert_eq!(entries.last().unwrap().action, HistoryAction::MovedPastUp);
        assert_eq!(entries.last().unwrap().new_position, 3);

        // same spot is a no-op
        let none = db
            .run_in_transaction(|uow| move_level_in(uow, &levels[4].id, Some(2), Some(false), "mod"))
            .unwrap();
        assert!(none.is_none());

        let err = db
            .run_in_transaction(|uow| move_level_in(uow, &levels[0].id, Some(6), None, "mod"))
            .unwrap_err();
        assert!(matches!(err, ListError::Validation(_)));
    }

    #[test]
    fn test_move_into_and_out_of_legacy() {
        let db = setup();
        let levels = seed_five(&db);

        let outcome = db
            .run_in_transaction(|uow| move_level_in(uow, &levels[1].id, Some(5), Some(true), "mod"))
            .unwrap()
            .unwrap();
        assert!(outcome.new_legacy);
        let order = names(&db);
        assert_eq!(order[4], ("L2".to_string(), 5, true));
        assert!(order[..4].iter().all(|(_, _, legacy)| !legacy));

        let l2 = db.with_conn(|conn, t| get_level(conn, t, &levels[1].id)).unwrap().unwrap();
        assert_eq!(l2.points, 0.0);
        let l5 = db.with_conn(|conn, t| get_level(conn, t, &levels[4].id)).unwrap().unwrap();
        assert_eq!((l5.position, l5.points), (4, 70.0));

        db.run_in_transaction(|uow| move_level_in(uow, &levels[1].id, Some(1), Some(false), "mod"))
            .unwrap();
        let order: Vec<_> = names(&db).into_iter().map(|(n, _, _)| n).collect();
        assert_eq!(order, ["L2", "L1", "L3", "L4", "L5"]);
        let entries = db.with_conn(|conn, t| history::level_history(conn, t, &levels[1].id)).unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action).collect();
        assert_eq!(
            &actions[actions.len() - 2..],
            &[HistoryAction::MovedToLegacy, HistoryAction::MovedFromLegacy]
        );
    }

    #[test]
    fn test_placement_records_verification() {
        let db = setup();
        let level = db
            .run_in_transaction(|uow| {
                place_level_in(
                    uow,
                    NewLevel {
                        name: "Verified".into(),
                        position: 1,
                        creators: vec!["c1".into(), "c2".into()],
                        publisher_id: Some("c1".into()),
                        verification: Some(VerificationInput {
                            submitted_by: "v".into(),
                            video_url: Some("https://example.com/v".into()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    "mod",
                )
            })
            .unwrap();

        let verification = db
            .with_conn(|conn, t| submissions::get_submission(conn, t, level.verification_id.as_deref().unwrap()))
            .unwrap()
            .unwrap();
        assert_eq!(verification.placement_order, 1);
        assert_eq!(verification.status, SubmissionStatus::Accepted);
        assert_eq!(verification.reviewer_id.as_deref(), Some("mod"));

        let entry = db.with_conn(|conn, t| leaderboard::get_entry(conn, t, "v")).unwrap().unwrap();
        assert_eq!((entry.points, entry.rank), (100.0, 1));

        let (updated, moved) = db
            .run_in_transaction(|uow| {
                update_level_in(
                    uow,
                    &level.id,
                    LevelUpdate {
                        name: Some("Renamed".into()),
                        creators: Some(vec!["c2".into()]),
                        ..Default::default()
                    },
                    "mod",
                )
            })
            .unwrap();
        assert!(moved.is_none());
        assert_eq!(updated.name, "Renamed");
        assert_eq!(db.with_conn(|conn, t| creators_of(conn, t, &level.id)).unwrap(), vec!["c2".to_string()]);
    }

    #[test]
    fn test_update_clears_nullable_columns() {
        let db = setup();
        let level = db
            .run_in_transaction(|uow| {
                place_level_in(
                    uow,
                    NewLevel {
                        name: "Published".into(),
                        position: 1,
                        game_level_id: Some(128),
                        publisher_id: Some("c1".into()),
                        ..Default::default()
                    },
                    "mod",
                )
            })
            .unwrap();

        // Absent keys leave both columns alone
        let untouched: LevelUpdate = serde_json::from_str(r#"{"name": "Kept"}"#).unwrap();
        assert!(untouched.publisher_id.is_none());
        let (kept, _) = db.run_in_transaction(|uow| update_level_in(uow, &level.id, untouched, "mod")).unwrap();
        assert_eq!(kept.publisher_id.as_deref(), Some("c1"));
        assert_eq!(kept.game_level_id, Some(128));

        let cleared: LevelUpdate = serde_json::from_str(r#"{"publisher_id": null, "game_level_id": null}"#).unwrap();
        assert_eq!(cleared.publisher_id, Some(None));
        let (cleared, _) = db.run_in_transaction(|uow| update_level_in(uow, &level.id, cleared, "mod")).unwrap();
        assert_eq!(cleared.name, "Kept");
        assert!(cleared.publisher_id.is_none());
        assert!(cleared.game_level_id.is_none());

        let (republished, _) = db
            .run_in_transaction(|uow| {
                update_level_in(
                    uow,
                    &level.id,
                    LevelUpdate {
                        publisher_id: Some(Some("c2".into())),
                        ..Default::default()
                    },
                    "mod",
                )
            })
            .unwrap();
        assert_eq!(republished.publisher_id.as_deref(), Some("c2"));
    }
}
