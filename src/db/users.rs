//! Users: creation, bans, and identity merges
//!
//! A merge moves every reference from the secondary user onto the primary.
//! When a reassigned row would collide with one the primary already owns
//! (same level clear, same role, same credit) the secondary row is dropped.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::context::UnitOfWork;
use super::leaderboard::{self, LeaderboardScope};
use super::models::{new_id, UserRow};
use super::ordering::DenseOrder;
use super::packs::{self, CompletionScope};
use super::row_exists;
use super::tables::TableNames;
use crate::error::{is_unique_violation, ListError, Result};

const COLUMNS: &str = "id, username, global_name, banned, placeholder, created_at";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub global_name: String,
    /// Stand-in account for a player who has not signed up yet
    #[serde(default)]
    pub placeholder: bool,
}

/// Counts from one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub reassigned: usize,
    /// Secondary rows dropped because the primary already had an equivalent
    pub conflicts: usize,
}

pub fn create_user_in(uow: &UnitOfWork<'_>, input: NewUser) -> Result<UserRow> {
    let t = uow.tables();
    let conn = uow.conn();

    if input.username.trim().is_empty() {
        return Err(ListError::validation("username must not be empty"));
    }
    let taken = conn
        .prepare(&format!("SELECT 1 FROM {} WHERE username = ?", t.users))?
        .exists(params![input.username])?;
    if taken {
        return Err(ListError::validation(format!("username {} is taken", input.username)));
    }

    let id = new_id();
    conn.execute(
        &format!(
            "INSERT INTO {} ({}) VALUES (?, ?, ?, 0, ?, ?)",
            t.users, COLUMNS
        ),
        params![id, input.username, input.global_name, input.placeholder, uow.now()],
    )?;
    get_user(conn, t, &id)?.ok_or_else(|| ListError::not_found(format!("user {}", id)))
}

pub fn grant_role_in(uow: &UnitOfWork<'_>, user_id: &str, role: &str) -> Result<()> {
    let t = uow.tables();
    require(uow.conn(), t, user_id)?;
    uow.conn().execute(
        &format!("INSERT INTO {} (user_id, role) VALUES (?, ?) ON CONFLICT DO NOTHING", t.roles),
        params![user_id, role],
    )?;
    Ok(())
}

/// Ask for `to_merge_id` to be folded into `user_id`; one open request per user
pub fn request_merge_in(uow: &UnitOfWork<'_>, user_id: &str, to_merge_id: &str) -> Result<String> {
    let t = uow.tables();
    let conn = uow.conn();
    if user_id == to_merge_id {
        return Err(ListError::validation("a user cannot be merged into itself"));
    }
    require(conn, t, user_id)?;
    require(conn, t, to_merge_id)?;

    let id = new_id();
    conn.execute(
        &format!(
            "INSERT INTO {} (id, user_id, to_merge_id, created_at) VALUES (?, ?, ?, ?)",
            t.merge_requests
        ),
        params![id, user_id, to_merge_id, uow.now()],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            ListError::validation(format!("user {} already has an open merge request", user_id))
        } else {
            e.into()
        }
    })?;
    Ok(id)
}

/// Ask for a new display name; one open request per user
pub fn request_name_change_in(uow: &UnitOfWork<'_>, user_id: &str, new_name: &str) -> Result<String> {
    let t = uow.tables();
    let conn = uow.conn();
    require(conn, t, user_id)?;

    let id = new_id();
    conn.execute(
        &format!(
            "INSERT INTO {} (id, user_id, new_name, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET new_name = excluded.new_name, created_at = excluded.created_at",
            t.name_change_requests
        ),
        params![id, user_id, new_name, uow.now()],
    )?;
    let id = conn.query_row(
        &format!("SELECT id FROM {} WHERE user_id = ?", t.name_change_requests),
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(id)
}

/// Apply a pending name change to the user's display name and close it
pub fn accept_name_change_in(uow: &UnitOfWork<'_>, request_id: &str) -> Result<UserRow> {
    let t = uow.tables();
    let conn = uow.conn();

    let (user_id, new_name): (String, String) = conn
        .query_row(
            &format!("SELECT user_id, new_name FROM {} WHERE id = ?", t.name_change_requests),
            params![request_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| ListError::not_found(format!("name change request {}", request_id)))?;

    conn.execute(
        &format!("UPDATE {} SET global_name = ? WHERE id = ?", t.users),
        params![new_name, user_id],
    )?;
    conn.execute(&format!("DELETE FROM {} WHERE id = ?", t.name_change_requests), params![request_id])?;

    debug!(user_id = %user_id, new_name = %new_name, "Accepted name change");
    get_user(conn, t, &user_id)?.ok_or_else(|| ListError::not_found(format!("user {}", user_id)))
}

pub fn reject_name_change_in(uow: &UnitOfWork<'_>, request_id: &str) -> Result<()> {
    delete_request(uow, &uow.tables().name_change_requests, "name change request", request_id)
}

pub fn reject_merge_request_in(uow: &UnitOfWork<'_>, request_id: &str) -> Result<()> {
    delete_request(uow, &uow.tables().merge_requests, "merge request", request_id)
}

fn delete_request(uow: &UnitOfWork<'_>, table: &str, what: &str, request_id: &str) -> Result<()> {
    let removed = uow
        .conn()
        .execute(&format!("DELETE FROM {} WHERE id = ?", table), params![request_id])?;
    if removed == 0 {
        return Err(ListError::not_found(format!("{} {}", what, request_id)));
    }
    Ok(())
}

// ============================================================================
// Bans
// ============================================================================

/// Ban a user: revoke every role and drop them from the leaderboard
pub fn ban_user_in(uow: &UnitOfWork<'_>, user_id: &str) -> Result<()> {
    let t = uow.tables();
    let conn = uow.conn();
    require(conn, t, user_id)?;

    conn.execute(&format!("UPDATE {} SET banned = 1 WHERE id = ?", t.users), params![user_id])?;
    let revoked = conn.execute(&format!("DELETE FROM {} WHERE user_id = ?", t.roles), params![user_id])?;
    leaderboard::update_leaderboard(uow, &LeaderboardScope::Users(&[user_id.to_string()]))?;

    debug!(user_id = %user_id, revoked, "Banned user");
    Ok(())
}

/// Lift a ban; the user's total comes back from their clears and packs
pub fn unban_user_in(uow: &UnitOfWork<'_>, user_id: &str) -> Result<()> {
    let t = uow.tables();
    let conn = uow.conn();
    require(conn, t, user_id)?;

    conn.execute(&format!("UPDATE {} SET banned = 0 WHERE id = ?", t.users), params![user_id])?;
    leaderboard::update_leaderboard(uow, &LeaderboardScope::Users(&[user_id.to_string()]))
}

// ============================================================================
// Merge
// ============================================================================

/// Fold `secondary` into `primary` and delete `secondary`
pub fn merge_users_in(uow: &UnitOfWork<'_>, primary: &str, secondary: &str) -> Result<MergeOutcome> {
    let t = uow.tables();
    let conn = uow.conn();

    if primary == secondary {
        return Err(ListError::validation("a user cannot be merged into itself"));
    }
    require(conn, t, primary)?;
    require(conn, t, secondary)?;

    // Requests to absorb the secondary are moot once it is gone
    conn.execute(
        &format!("DELETE FROM {} WHERE to_merge_id = ?", t.merge_requests),
        params![secondary],
    )?;

    let mut outcome = MergeOutcome::default();
    let plain = [
        (t.submissions.as_str(), "reviewer_id"),
        (t.history.as_str(), "action_by"),
        (t.creators.as_str(), "user_id"),
        (t.roles.as_str(), "user_id"),
        (t.name_change_requests.as_str(), "user_id"),
        (t.merge_requests.as_str(), "user_id"),
        (t.levels.as_str(), "publisher_id"),
    ];

    reassign(conn, &t.submissions, "submitted_by", primary, secondary, &mut outcome, |rowid| {
        drop_submission(conn, t, rowid)
    })?;
    for (table, column) in plain {
        reassign(conn, table, column, primary, secondary, &mut outcome, |rowid| {
            conn.execute(&format!("DELETE FROM {} WHERE rowid = ?", table), params![rowid])?;
            Ok(())
        })?;
    }

    // A request by the secondary to absorb the primary now points at itself
    conn.execute(
        &format!("DELETE FROM {} WHERE user_id = to_merge_id", t.merge_requests),
        [],
    )?;

    conn.execute(&format!("DELETE FROM {} WHERE user_id = ?", t.leaderboard), params![secondary])?;
    conn.execute(&format!("DELETE FROM {} WHERE user_id = ?", t.completed_packs), params![secondary])?;
    conn.execute(&format!("DELETE FROM {} WHERE id = ?", t.users), params![secondary])?;

    packs::update_completed_packs(uow, CompletionScope::User(primary))?;
    leaderboard::update_leaderboard(uow, &LeaderboardScope::Users(&[primary.to_string()]))?;

    debug!(
        primary = %primary,
        secondary = %secondary,
        reassigned = outcome.reassigned,
        conflicts = outcome.conflicts,
        "Merged users"
    );
    Ok(outcome)
}

/// Point every `column = secondary` row at `primary`, one row at a time so a
/// single collision does not abort the rest
fn reassign<F>(
    conn: &Connection,
    table: &str,
    column: &str,
    primary: &str,
    secondary: &str,
    outcome: &mut MergeOutcome,
    on_conflict: F,
) -> Result<()>
where
    F: Fn(i64) -> Result<()>,
{
    let mut stmt = conn.prepare(&format!("SELECT rowid FROM {} WHERE {} = ?", table, column))?;
    let rowids = stmt
        .query_map(params![secondary], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let update = format!("UPDATE {} SET {} = ? WHERE rowid = ?", table, column);
    for rowid in rowids {
        match conn.execute(&update, params![primary, rowid]) {
            Ok(_) => outcome.reassigned += 1,
            Err(e) if is_unique_violation(&e) => {
                warn!(table = %table, column = %column, rowid, "Merge conflict, dropping secondary row");
                on_conflict(rowid)?;
                outcome.conflicts += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Delete a colliding submission and close its placement slot
fn drop_submission(conn: &Connection, t: &TableNames, rowid: i64) -> Result<()> {
    let (level_id, slot): (String, i64) = conn.query_row(
        &format!("SELECT level_id, placement_order FROM {} WHERE rowid = ?", t.submissions),
        params![rowid],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    conn.execute(&format!("DELETE FROM {} WHERE rowid = ?", t.submissions), params![rowid])?;
    DenseOrder::new(&t.submissions, "placement_order")
        .within("level_id", level_id)
        .close_gap(conn, slot)?;
    Ok(())
}

/// Run the merge a request asks for and remove the request
pub fn accept_merge_request_in(uow: &UnitOfWork<'_>, request_id: &str) -> Result<(String, String, MergeOutcome)> {
    let t = uow.tables();
    let conn = uow.conn();

    let (primary, secondary): (String, String) = conn
        .query_row(
            &format!("SELECT user_id, to_merge_id FROM {} WHERE id = ?", t.merge_requests),
            params![request_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or_else(|| ListError::not_found(format!("merge request {}", request_id)))?;

    conn.execute(&format!("DELETE FROM {} WHERE id = ?", t.merge_requests), params![request_id])?;
    let outcome = merge_users_in(uow, &primary, &secondary)?;
    Ok((primary, secondary, outcome))
}

// ============================================================================
// Reads
// ============================================================================

fn require(conn: &Connection, t: &TableNames, user_id: &str) -> Result<()> {
    if !row_exists(conn, &t.users, user_id)? {
        return Err(ListError::not_found(format!("user {}", user_id)));
    }
    Ok(())
}

/// The user's pending display name change, if any, as `(request_id, new_name)`
pub fn pending_name_change(conn: &Connection, t: &TableNames, user_id: &str) -> Result<Option<(String, String)>> {
    let row = conn
        .query_row(
            &format!("SELECT id, new_name FROM {} WHERE user_id = ?", t.name_change_requests),
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    Ok(row)
}

pub fn get_user(conn: &Connection, t: &TableNames, user_id: &str) -> Result<Option<UserRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM {} WHERE id = ?", COLUMNS, t.users),
            params![user_id],
            UserRow::from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn roles_of(conn: &Connection, t: &TableNames, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("SELECT role FROM {} WHERE user_id = ? ORDER BY role", t.roles))?;
    let roles = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(roles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListConfig;
    use crate::db::models::SubmissionStatus;
    use crate::db::submissions::{self, SubmissionUpsert};
    use crate::db::ListDb;

    fn user(db: &ListDb, name: &str) -> UserRow {
        db.run_in_transaction(|uow| {
            create_user_in(
                uow,
                NewUser {
                    username: name.to_string(),
                    global_name: name.to_uppercase(),
                    placeholder: false,
                },
            )
        })
        .unwrap()
    }

    fn accept(db: &ListDb, level: &str, user_id: &str) {
        db.run_in_transaction(|uow| {
            submissions::upsert_submission_in(
                uow,
                SubmissionUpsert {
                    level_id: level.to_string(),
                    submitted_by: user_id.to_string(),
                    status: Some(SubmissionStatus::Accepted),
                    ..Default::default()
                },
                &SubmissionStatus::ALL,
            )
        })
        .unwrap();
    }

    fn setup() -> ListDb {
        let db = ListDb::open_in_memory(ListConfig::default()).unwrap();
        db.with_conn(|conn, t| {
            conn.execute_batch(&format!(
                "INSERT INTO {levels} (id, name, position, legacy, points, created_at, updated_at) VALUES
                     ('l1', 'One', 1, 0, 50, '', ''), ('l2', 'Two', 2, 0, 20, '', '');",
                levels = t.levels,
            ))?;
            Ok(())
        })
        .unwrap();
        db
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let db = setup();
        user(&db, "alice");
        let err = db
            .run_in_transaction(|uow| {
                create_user_in(
                    uow,
                    NewUser {
                        username: "alice".into(),
                        global_name: "Other".into(),
                        placeholder: true,
                    },
                )
            })
            .unwrap_err();
        assert!(matches!(err, ListError::Validation(_)));
    }

    #[test]
    fn test_ban_and_unban() {
        let db = setup();
        let a = user(&db, "a");
        db.run_in_transaction(|uow| grant_role_in(uow, &a.id, "moderator")).unwrap();
        accept(&db, "l1", &a.id);

        db.run_in_transaction(|uow| ban_user_in(uow, &a.id)).unwrap();
        assert!(db.with_conn(|conn, t| leaderboard::get_entry(conn, t, &a.id)).unwrap().is_none());
        assert!(db.with_conn(|conn, t| roles_of(conn, t, &a.id)).unwrap().is_empty());
        assert!(db.with_conn(|conn, t| get_user(conn, t, &a.id)).unwrap().unwrap().banned);

        db.run_in_transaction(|uow| unban_user_in(uow, &a.id)).unwrap();
        let entry = db.with_conn(|conn, t| leaderboard::get_entry(conn, t, &a.id)).unwrap().unwrap();
        assert_eq!(entry.points, 50.0);
    }

    #[test]
    fn test_merge_resolves_duplicate_clear() {
        let db = setup();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let c = user(&db, "c");
        accept(&db, "l1", &a.id);
        accept(&db, "l1", &b.id);
        accept(&db, "l1", &c.id);
        accept(&db, "l2", &b.id);
        db.run_in_transaction(|uow| {
            grant_role_in(uow, &a.id, "helper")?;
            grant_role_in(uow, &b.id, "helper")?;
            grant_role_in(uow, &b.id, "moderator")
        })
        .unwrap();

        let outcome = db.run_in_transaction(|uow| merge_users_in(uow, &a.id, &b.id)).unwrap();
        assert_eq!(outcome.conflicts, 2);

        assert!(db.with_conn(|conn, t| get_user(conn, t, &b.id)).unwrap().is_none());
        let entry = db.with_conn(|conn, t| leaderboard::get_entry(conn, t, &a.id)).unwrap().unwrap();
        assert_eq!(entry.points, 70.0);
        assert_eq!(
            db.with_conn(|conn, t| roles_of(conn, t, &a.id)).unwrap(),
            vec!["helper".to_string(), "moderator".to_string()]
        );

        // b's dropped clear on l1 left no hole in the placement order
        let order: Vec<_> = db
            .with_conn(|conn, t| submissions::submissions_for_level(conn, t, "l1"))
            .unwrap()
            .into_iter()
            .map(|s| (s.submitted_by, s.placement_order))
            .collect();
        assert_eq!(order, vec![(a.id.clone(), 1), (c.id.clone(), 2)]);
    }

    #[test]
    fn test_accept_merge_request() {
        let db = setup();
        let a = user(&db, "a");
        let b = user(&db, "b");
        let c = user(&db, "c");
        accept(&db, "l2", &b.id);

        let request = db.run_in_transaction(|uow| request_merge_in(uow, &a.id, &b.id)).unwrap();
        // c also wanted b; that request goes away with b
        db.run_in_transaction(|uow| request_merge_in(uow, &c.id, &b.id)).unwrap();

        let (primary, secondary, _) = db
            .run_in_transaction(|uow| accept_merge_request_in(uow, &request))
            .unwrap();
        assert_eq!((primary.as_str(), secondary.as_str()), (a.id.as_str(), b.id.as_str()));

        let open: i64 = db
            .with_conn(|conn, t| {
                Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {}", t.merge_requests), [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(open, 0);
        let entry = db.with_conn(|conn, t| leaderboard::get_entry(conn, t, &a.id)).unwrap().unwrap();
        assert_eq!(entry.points, 20.0);

        let err = db
            .run_in_transaction(|uow| accept_merge_request_in(uow, &request))
            .unwrap_err();
        assert!(matches!(err, ListError::NotFound(_)));
    }

    #[test]
    fn test_name_change_replace_accept_and_reject() {
        let db = setup();
        let a = user(&db, "a");

        let first = db.run_in_transaction(|uow| request_name_change_in(uow, &a.id, "Alpha")).unwrap();
        let second = db.run_in_transaction(|uow| request_name_change_in(uow, &a.id, "Aleph")).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            db.with_conn(|conn, t| pending_name_change(conn, t, &a.id)).unwrap(),
            Some((first.clone(), "Aleph".to_string()))
        );

        let renamed = db.run_in_transaction(|uow| accept_name_change_in(uow, &first)).unwrap();
        assert_eq!(renamed.global_name, "Aleph");
        assert_eq!(renamed.username, "a");
        assert!(db.with_conn(|conn, t| pending_name_change(conn, t, &a.id)).unwrap().is_none());

        let again = db.run_in_transaction(|uow| request_name_change_in(uow, &a.id, "Nope")).unwrap();
        db.run_in_transaction(|uow| reject_name_change_in(uow, &again)).unwrap();
        assert!(db.with_conn(|conn, t| pending_name_change(conn, t, &a.id)).unwrap().is_none());
        assert_eq!(db.with_conn(|conn, t| get_user(conn, t, &a.id)).unwrap().unwrap().global_name, "Aleph");

        let err = db.run_in_transaction(|uow| reject_name_change_in(uow, &again)).unwrap_err();
        assert!(matches!(err, ListError::NotFound(_)));
    }

    #[test]
    fn test_rejected_merge_request_cannot_be_accepted() {
        let db = setup();
        let a = user(&db, "a");
        let b = user(&db, "b");

        let request = db.run_in_transaction(|uow| request_merge_in(uow, &a.id, &b.id)).unwrap();
        db.run_in_transaction(|uow| reject_merge_request_in(uow, &request)).unwrap();

        let err = db
            .run_in_transaction(|uow| accept_merge_request_in(uow, &request))
            .unwrap_err();
        assert!(matches!(err, ListError::NotFound(_)));
        assert!(db.with_conn(|conn, t| get_user(conn, t, &b.id)).unwrap().is_some());

        // a is free to ask again
        db.run_in_transaction(|uow| request_merge_in(uow, &a.id, &b.id)).unwrap();
    }
}
