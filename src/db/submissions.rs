//! Submissions: per-level placement order and the status state machine
//!
//! There is at most one submission per (user, level). The per-level
//! `placement_order` is a dense `1..=k` sequence with slot 1 conventionally
//! holding the verification. Any status change or deletion re-derives the
//! submitter's completed packs and leaderboard entry.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::UnitOfWork;
use super::leaderboard::{self, LeaderboardScope};
use super::models::{new_id, SubmissionRow, SubmissionStatus};
use super::ordering::DenseOrder;
use super::packs::{self, CompletionScope};
use super::row_exists;
use super::tables::TableNames;
use crate::error::{ListError, Result};

const COLUMNS: &str =
    "id, level_id, submitted_by, status, placement_order, reviewer_id, video_url, mobile, fps, created_at, updated_at";

/// Create or update the submission identified by `id` or by
/// `(submitted_by, level_id)`. Unset fields are left as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionUpsert {
    pub id: Option<String>,
    pub level_id: String,
    pub submitted_by: String,
    pub status: Option<SubmissionStatus>,
    pub placement_order: Option<i64>,
    pub reviewer_id: Option<String>,
    pub video_url: Option<String>,
    pub mobile: Option<bool>,
    pub fps: Option<i64>,
}

fn placement<'a>(t: &'a TableNames, level_id: &str) -> DenseOrder<'a> {
    DenseOrder::new(&t.submissions, "placement_order").within("level_id", level_id.to_string())
}

/// Upsert a submission.
///
/// An existing submission may only be touched when its current status is in
/// `allowed_from`; the permission layer decides that set per caller.
pub fn upsert_submission_in(
    uow: &UnitOfWork<'_>,
    input: SubmissionUpsert,
    allowed_from: &[SubmissionStatus],
) -> Result<SubmissionRow> {
    let t = uow.tables();
    let conn = uow.conn();

    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE id = ?1 OR (submitted_by = ?2 AND level_id = ?3)",
        COLUMNS, t.submissions
    ))?;
    let matches = stmt
        .query_map(params![input.id, input.submitted_by, input.level_id], SubmissionRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let id = match matches.as_slice() {
        [] => {
            if let Some(id) = &input.id {
                return Err(ListError::not_found(format!("submission {}", id)));
            }
            create(uow, &input)?
        }
        [existing] => {
            update(uow, existing, &input, allowed_from)?;
            existing.id.clone()
        }
        _ => {
            return Err(ListError::validation(
                "id and (submitter, level) refer to different submissions",
            ))
        }
    };

    if input.status.is_some() {
        refresh_submitter(uow, &input.submitted_by)?;
    }

    get_submission(conn, t, &id)?.ok_or_else(|| ListError::not_found(format!("submission {}", id)))
}

fn create(uow: &UnitOfWork<'_>, input: &SubmissionUpsert) -> Result<String> {
    let t = uow.tables();
    let conn = uow.conn();

    if !row_exists(conn, &t.levels, &input.level_id)? {
        return Err(ListError::not_found(format!("level {}", input.level_id)));
    }
    if !row_exists(conn, &t.users, &input.submitted_by)? {
        return Err(ListError::not_found(format!("user {}", input.submitted_by)));
    }

    let order = placement(t, &input.level_id);
    let max = order.max(conn)?;
    let slot = input.placement_order.unwrap_or(max + 1);
    if slot < 1 || slot > max + 1 {
        return Err(ListError::validation(format!("placement order {} outside 1..={}", slot, max + 1)));
    }
    order.open_gap(conn, slot)?;

    let id = new_id();
    conn.execute(
        &format!("INSERT INTO {} ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)", t.submissions, COLUMNS),
        params![
            id,
            input.level_id,
            input.submitted_by,
            input.status.unwrap_or(SubmissionStatus::Pending),
            slot,
            input.reviewer_id,
            input.video_url,
            input.mobile.unwrap_or(false),
            input.fps,
            uow.now(),
            uow.now(),
        ],
    )?;
    debug!(id = %id, level_id = %input.level_id, slot, "Created submission");
    Ok(id)
}

fn update(
    uow: &UnitOfWork<'_>,
    existing: &SubmissionRow,
    input: &SubmissionUpsert,
    allowed_from: &[SubmissionStatus],
) -> Result<()> {
    let t = uow.tables();
    let conn = uow.conn();

    if existing.level_id != input.level_id || existing.submitted_by != input.submitted_by {
        return Err(ListError::validation(format!(
            "submission {} belongs to another level or user",
            existing.id
        )));
    }
    if !allowed_from.contains(&existing.status) {
        return Err(ListError::validation(format!(
            "submission {} is {} and cannot be changed here",
            existing.id, existing.status
        )));
    }
    if let Some(next) = input.status {
        if !existing.status.can_become(next) {
            return Err(ListError::validation(format!(
                "submission {} cannot go from {} to {}",
                existing.id, existing.status, next
            )));
        }
    }

    if let Some(slot) = input.placement_order {
        let order = placement(t, &existing.level_id);
        let max = order.max(conn)?;
        if slot < 1 || slot > max {
            return Err(ListError::validation(format!("placement order {} outside 1..={}", slot, max)));
        }
        order.move_item(conn, &existing.id, existing.placement_order, slot)?;
    }

    conn.execute(
        &format!(
            "UPDATE {} SET status = COALESCE(?1, status), reviewer_id = COALESCE(?2, reviewer_id), \
             video_url = COALESCE(?3, video_url), mobile = COALESCE(?4, mobile), fps = COALESCE(?5, fps), \
             updated_at = ?6 WHERE id = ?7",
            t.submissions
        ),
        params![
            input.status,
            input.reviewer_id,
            input.video_url,
            input.mobile,
            input.fps,
            uow.now(),
            existing.id
        ],
    )?;
    Ok(())
}

/// Delete a submission whose status is in `allowed_from` and close its slot
pub fn delete_submission_in(
    uow: &UnitOfWork<'_>,
    submission_id: &str,
    allowed_from: &[SubmissionStatus],
) -> Result<SubmissionRow> {
    let t = uow.tables();
    let conn = uow.conn();

    let existing = get_submission(conn, t, submission_id)?
        .ok_or_else(|| ListError::not_found(format!("submission {}", submission_id)))?;
    if !allowed_from.contains(&existing.status) {
        return Err(ListError::validation(format!(
            "submission {} is {} and cannot be deleted here",
            existing.id, existing.status
        )));
    }

    conn.execute(&format!("DELETE FROM {} WHERE id = ?", t.submissions), params![submission_id])?;
    placement(t, &existing.level_id).close_gap(conn, existing.placement_order)?;

    refresh_submitter(uow, &existing.submitted_by)?;
    Ok(existing)
}

/// Re-derive the submitter's completions and total
fn refresh_submitter(uow: &UnitOfWork<'_>, user_id: &str) -> Result<()> {
    packs::update_completed_packs(uow, CompletionScope::User(user_id))?;
    leaderboard::update_leaderboard(uow, &LeaderboardScope::Users(&[user_id.to_string()]))
}

// ============================================================================
// Reads
// ============================================================================

pub fn get_submission(conn: &Connection, t: &TableNames, submission_id: &str) -> Result<Option<SubmissionRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM {} WHERE id = ?", COLUMNS, t.submissions),
            params![submission_id],
            SubmissionRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Every submission on a level, in placement order
pub fn submissions_for_level(conn: &Connection, t: &TableNames, level_id: &str) -> Result<Vec<SubmissionRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM {} WHERE level_id = ? ORDER BY placement_order",
        COLUMNS, t.submissions
    ))?;
    let rows = stmt
        .query_map(params![level_id], SubmissionRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListConfig;
    use crate::db::ListDb;
    use crate::db::models::SubmissionStatus::*;

    const MODERATOR: &[SubmissionStatus] = &SubmissionStatus::ALL;
    const PLAYER: &[SubmissionStatus] = &[Pending, RejectedRetryable];

    fn seed() -> ListDb {
        let db = ListDb::open_in_memory(ListConfig::default()).unwrap();
        db.with_conn(|conn, t| {
            conn.execute_batch(&format!(
                "INSERT INTO {users} (id, username, global_name) VALUES ('a', 'a', 'A'), ('b', 'b', 'B'), ('c', 'c', 'C');
                 INSERT INTO {levels} (id, name, position, legacy, points, created_at, updated_at) VALUES
                     ('l1', 'One', 1, 0, 100, '', '');",
                users = t.users,
                levels = t.levels,
            ))?;
            Ok(())
        })
        .unwrap();
        db
    }

    fn submit(db: &ListDb, user: &str, status: Option<SubmissionStatus>) -> Result<SubmissionRow> {
        db.run_in_transaction(|uow| {
            upsert_submission_in(
                uow,
                SubmissionUpsert {
                    level_id: "l1".into(),
                    submitted_by: user.into(),
                    status,
                    ..Default::default()
                },
                PLAYER,
            )
        })
    }

    fn points(db: &ListDb, user: &str) -> Option<f64> {
        db.with_conn(|conn, t| leaderboard::get_entry(conn, t, user))
            .unwrap()
            .map(|e| e.points)
    }

    #[test]
    fn test_accept_then_correct() {
        let db = seed();
        let sub = submit(&db, "a", None).unwrap();
        assert_eq!(sub.status, Pending);
        assert_eq!(sub.placement_order, 1);
        assert_eq!(points(&db, "a"), None);

        let sub = db
            .run_in_transaction(|uow| {
                upsert_submission_in(
                    uow,
                    SubmissionUpsert {
                        id: Some(sub.id.clone()),
                        level_id: "l1".into(),
                        submitted_by: "a".into(),
                        status: Some(Accepted),
                        reviewer_id: Some("c".into()),
                        ..Default::default()
                    },
                    &[Pending],
                )
            })
            .unwrap();
        assert_eq!(sub.status, Accepted);
        assert_eq!(sub.reviewer_id.as_deref(), Some("c"));
        assert_eq!(points(&db, "a"), Some(100.0));

        // a player cannot touch an accepted clear
        assert!(matches!(submit(&db, "a", Some(Pending)), Err(ListError::Validation(_))));

        // a moderator can take it back
        db.run_in_transaction(|uow| {
            upsert_submission_in(
                uow,
                SubmissionUpsert {
                    level_id: "l1".into(),
                    submitted_by: "a".into(),
                    status: Some(Rejected),
                    ..Default::default()
                },
                MODERATOR,
            )
        })
        .unwrap();
        assert_eq!(points(&db, "a"), None);
    }

    #[test]
    fn test_retryable_only_returns_to_pending() {
        let db = seed();
        let sub = submit(&db, "a", None).unwrap();
        db.run_in_transaction(|uow| {
            upsert_submission_in(
                uow,
                SubmissionUpsert {
                    id: Some(sub.id.clone()),
                    level_id: "l1".into(),
                    submitted_by: "a".into(),
                    status: Some(RejectedRetryable),
                    ..Default::default()
                },
                MODERATOR,
            )
        })
        .unwrap();

        let err = db
            .run_in_transaction(|uow| {
                upsert_submission_in(
                    uow,
                    SubmissionUpsert {
                        id: Some(sub.id.clone()),
                        level_id: "l1".into(),
                        submitted_by: "a".into(),
                        status: Some(Accepted),
                        ..Default::default()
                    },
                    MODERATOR,
                )
            })
            .unwrap_err();
        assert!(matches!(err, ListError::Validation(_)));

        // resubmission goes back to pending and keeps the same row
        let again = submit(&db, "a", Some(Pending)).unwrap();
        assert_eq!(again.id, sub.id);
        assert_eq!(again.status, Pending);
    }

    #[test]
    fn test_placement_order_stays_dense() {
        let db = seed();
        let a = submit(&db, "a", None).unwrap();
        let b = submit(&db, "b", None).unwrap();
        let c = submit(&db, "c", None).unwrap();
        assert_eq!((a.placement_order, b.placement_order, c.placement_order), (1, 2, 3));

        db.run_in_transaction(|uow| {
            upsert_submission_in(
                uow,
                SubmissionUpsert {
                    id: Some(c.id.clone()),
                    level_id: "l1".into(),
                    submitted_by: "c".into(),
                    placement_order: Some(1),
                    ..Default::default()
                },
                MODERATOR,
            )
        })
        .unwrap();
        let order: Vec<_> = db
            .with_conn(|conn, t| submissions_for_level(conn, t, "l1"))
            .unwrap()
            .into_iter()
            .map(|s| (s.submitted_by, s.placement_order))
            .collect();
        assert_eq!(order, vec![("c".to_string(), 1), ("a".to_string(), 2), ("b".to_string(), 3)]);

        db.run_in_transaction(|uow| delete_submission_in(uow, &a.id, PLAYER)).unwrap();
        let order: Vec<_> = db
            .with_conn(|conn, t| submissions_for_level(conn, t, "l1"))
            .unwrap()
            .into_iter()
            .map(|s| (s.submitted_by, s.placement_order))
            .collect();
        assert_eq!(order, vec![("c".to_string(), 1), ("b".to_string(), 2)]);
    }

    #[test]
    fn test_conflicting_identity_rejected() {
        let db = seed();
        let a = submit(&db, "a", None).unwrap();
        submit(&db, "b", None).unwrap();

        // id points at a's row, (user, level) at b's
        let err = db
            .run_in_transaction(|uow| {
                upsert_submission_in(
                    uow,
                    SubmissionUpsert {
                        id: Some(a.id.clone()),
                        level_id: "l1".into(),
                        submitted_by: "b".into(),
                        ..Default::default()
                    },
                    MODERATOR,
                )
            })
            .unwrap_err();
        assert!(matches!(err, ListError::Validation(_)));

        let err = db
            .run_in_transaction(|uow| {
                upsert_submission_in(
                    uow,
                    SubmissionUpsert {
                        id: Some("missing".into()),
                        level_id: "l1".into(),
                        submitted_by: "c".into(),
                        ..Default::default()
                    },
                    MODERATOR,
                )
            })
            .unwrap_err();
        assert!(matches!(err, ListError::NotFound(_)));
    }

    #[test]
    fn test_delete_requires_allowed_status() {
        let db = seed();
        let sub = submit(&db, "a", Some(Accepted)).unwrap();
        assert_eq!(points(&db, "a"), Some(100.0));

        let err = db.run_in_transaction(|uow| delete_submission_in(uow, &sub.id, &[Pending])).unwrap_err();
        assert!(matches!(err, ListError::Validation(_)));

        db.run_in_transaction(|uow| delete_submission_in(uow, &sub.id, MODERATOR)).unwrap();
        assert_eq!(points(&db, "a"), None);
    }
}
