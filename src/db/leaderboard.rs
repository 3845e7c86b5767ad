//! Leaderboard recomputation
//!
//! A user's total is the sum of the points of every level they hold an
//! accepted clear on plus the points of every pack they completed. Totals are
//! upserted for a scope of users, banned and pointless users are pruned, and
//! the rank column is then rewritten for the whole table.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use tracing::debug;

use super::context::UnitOfWork;
use super::models::LeaderboardRow;
use super::tables::TableNames;
use crate::error::Result;

/// Which users a recomputation touches
#[derive(Debug, Clone, Copy)]
pub enum LeaderboardScope<'a> {
    All,
    Users(&'a [String]),
    /// Users with an accepted clear on a level positioned in the range
    LevelRange { min: i64, max: i64 },
    /// Users who completed the pack
    Pack(&'a str),
}

impl LeaderboardScope<'_> {
    /// SQL condition over the candidate user id column `u.id`
    fn condition(&self, t: &TableNames, params: &mut Vec<Value>) -> String {
        match self {
            LeaderboardScope::All => "1".to_string(),
            LeaderboardScope::Users(ids) => {
                if ids.is_empty() {
                    return "0".to_string();
                }
                params.extend(ids.iter().map(|id| Value::Text(id.clone())));
                format!("u.id IN ({})", vec!["?"; ids.len()].join(", "))
            }
            LeaderboardScope::LevelRange { min, max } => {
                params.push(Value::Integer(*min));
                params.push(Value::Integer(*max));
                format!(
                    "u.id IN (SELECT s.submitted_by FROM {submissions} s \
                     JOIN {levels} l ON l.id = s.level_id \
                     WHERE s.status = 'accepted' AND l.position BETWEEN ? AND ?)",
                    submissions = t.submissions,
                    levels = t.levels,
                )
            }
            LeaderboardScope::Pack(pack_id) => {
                params.push(Value::Text(pack_id.to_string()));
                format!(
                    "u.id IN (SELECT cp.user_id FROM {} cp WHERE cp.pack_id = ?)",
                    t.completed_packs
                )
            }
        }
    }
}

/// Recompute totals for `scope`, prune, then rerank everyone
pub fn update_leaderboard(uow: &UnitOfWork<'_>, scope: &LeaderboardScope<'_>) -> Result<()> {
    let t = uow.tables();
    let conn = uow.conn();

    let mut params = Vec::new();
    let condition = scope.condition(t, &mut params);
    let upserted = conn.execute(
        &format!(
            "INSERT INTO {leaderboard} (user_id, points, rank) \
             SELECT u.id, ROUND( \
                 COALESCE((SELECT SUM(l.points) FROM {submissions} s \
                           JOIN {levels} l ON l.id = s.level_id \
                           WHERE s.submitted_by = u.id AND s.status = 'accepted'), 0) + \
                 COALESCE((SELECT SUM(p.points) FROM {completed_packs} cp \
                           JOIN {packs} p ON p.id = cp.pack_id \
                           WHERE cp.user_id = u.id), 0), 1), 0 \
             FROM {users} u WHERE {condition} \
             ON CONFLICT(user_id) DO UPDATE SET points = excluded.points",
            leaderboard = t.leaderboard,
            submissions = t.submissions,
            levels = t.levels,
            completed_packs = t.completed_packs,
            packs = t.packs,
            users = t.users,
            condition = condition,
        ),
        params_from_iter(params.iter()),
    )?;

    let pruned = prune(conn, t)?;
    update_ranks(conn, t)?;

    debug!(scope = ?scope, upserted, pruned, "Updated leaderboard");
    Ok(())
}

/// Drop banned users and users with no points
fn prune(conn: &Connection, t: &TableNames) -> Result<usize> {
    let pruned = conn.execute(
        &format!(
            "DELETE FROM {leaderboard} WHERE points = 0 \
             OR user_id IN (SELECT id FROM {users} WHERE banned)",
            leaderboard = t.leaderboard,
            users = t.users,
        ),
        [],
    )?;
    Ok(pruned)
}

/// Rewrite every rank: equal points share a rank, the next distinct value
/// skips by the number of ties
pub fn update_ranks(conn: &Connection, t: &TableNames) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {leaderboard} SET rank = ranked.r FROM ( \
                 SELECT user_id, RANK() OVER (ORDER BY points DESC) AS r FROM {leaderboard} \
             ) AS ranked \
             WHERE {leaderboard}.user_id = ranked.user_id AND {leaderboard}.rank != ranked.r",
            leaderboard = t.leaderboard,
        ),
        [],
    )?;
    Ok(())
}

/// One page of the leaderboard, best first; ties ordered by user id
pub fn list_leaderboard(conn: &Connection, tables: &TableNames, limit: u32, offset: u32) -> Result<Vec<LeaderboardRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT user_id, points, rank FROM {} ORDER BY rank, user_id LIMIT ? OFFSET ?",
        tables.leaderboard
    ))?;
    let rows = stmt
        .query_map(params![limit, offset], LeaderboardRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Entry for one user, `None` when they are not on the board
pub fn get_entry(conn: &Connection, tables: &TableNames, user_id: &str) -> Result<Option<LeaderboardRow>> {
    use rusqlite::OptionalExtension;
    let row = conn
        .query_row(
            &format!("SELECT user_id, points, rank FROM {} WHERE user_id = ?", tables.leaderboard),
            params![user_id],
            LeaderboardRow::from_row,
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListConfig;
    use crate::db::ListDb;

    fn seed(db: &ListDb) {
        db.with_conn(|conn, t| {
            conn.execute_batch(&format!(
                "INSERT INTO {users} (id, username, global_name) VALUES ('a', 'a', 'A'), ('b', 'b', 'B'), ('c', 'c', 'C'), ('d', 'd', 'D');
                 INSERT INTO {levels} (id, name, position, legacy, points, created_at, updated_at) VALUES
                     ('l1', 'One', 1, 0, 10, '', ''), ('l2', 'Two', 2, 0, 5, '', '');
                 INSERT INTO {submissions} (id, level_id, submitted_by, status, placement_order, created_at, updated_at) VALUES
                     ('s1', 'l1', 'a', 'accepted', 1, '', ''),
                     ('s2', 'l1', 'b', 'accepted', 2, '', ''),
                     ('s3', 'l2', 'c', 'accepted', 1, '', ''),
                     ('s4', 'l2', 'd', 'pending', 2, '', '');",
                users = t.users,
                levels = t.levels,
                submissions = t.submissions,
            ))?;
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_ties_share_rank() {
        let db = ListDb::open_in_memory(ListConfig::default()).unwrap();
        seed(&db);
        db.run_in_transaction(|uow| update_leaderboard(uow, &LeaderboardScope::All))
            .unwrap();

        let board = db.with_conn(|conn, t| list_leaderboard(conn, t, 10, 0)).unwrap();
        let ranks: Vec<_> = board.iter().map(|r| (r.user_id.as_str(), r.points, r.rank)).collect();
        assert_eq!(ranks, vec![("a", 10.0, 1), ("b", 10.0, 1), ("c", 5.0, 3)]);
    }

    #[test]
    fn test_banned_users_are_pruned() {
        let db = ListDb::open_in_memory(ListConfig::default()).unwrap();
        seed(&db);
        db.run_in_transaction(|uow| {
            update_leaderboard(uow, &LeaderboardScope::All)?;
            uow.conn()
                .execute(&format!("UPDATE {} SET banned = 1 WHERE id = 'a'", uow.tables().users), [])?;
            update_leaderboard(uow, &LeaderboardScope::Users(&["a".to_string()]))
        })
        .unwrap();

        let board = db.with_conn(|conn, t| list_leaderboard(conn, t, 10, 0)).unwrap();
        let ranks: Vec<_> = board.iter().map(|r| (r.user_id.as_str(), r.rank)).collect();
        assert_eq!(ranks, vec![("b", 1), ("c", 2)]);
    }

    #[test]
    fn test_level_range_scope_only_touches_clearers() {
        let db = ListDb::open_in_memory(ListConfig::default()).unwrap();
        seed(&db);
        db.run_in_transaction(|uow| update_leaderboard(uow, &LeaderboardScope::LevelRange { min: 2, max: 2 }))
            .unwrap();

        let board = db.with_conn(|conn, t| list_leaderboard(conn, t, 10, 0)).unwrap();
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].user_id, "c");
        assert_eq!(board[0].rank, 1);
        assert!(db.with_conn(|conn, t| get_entry(conn, t, "d")).unwrap().is_none());
    }
}
