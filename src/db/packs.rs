//! Packs: point aggregation and completion maintenance
//!
//! A pack is worth `round(multiplier * sum(member level points), 1)`. A user
//! has completed a pack when their accepted clears cover every member level,
//! which is decided by comparing counts so that membership edits and
//! submission edits go through the same check.

use std::collections::HashSet;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::UnitOfWork;
use super::leaderboard::{self, LeaderboardScope};
use super::models::{new_id, PackRow};
use super::ordering::DenseOrder;
use super::tables::TableNames;
use crate::error::{ListError, Result};

/// Fewest levels a pack may hold
pub const MIN_PACK_LEVELS: usize = 2;

// ============================================================================
// Point aggregation
// ============================================================================

fn pack_points_sql(t: &TableNames, filter: &str) -> String {
    format!(
        "UPDATE {packs} SET points = MAX(0, ROUND(?1 * COALESCE(( \
             SELECT SUM(l.points) FROM {pack_levels} pl \
             JOIN {levels} l ON l.id = pl.level_id \
             WHERE pl.pack_id = {packs}.id \
         ), 0), 1)) WHERE {filter}",
        packs = t.packs,
        pack_levels = t.pack_levels,
        levels = t.levels,
        filter = filter,
    )
}

/// Recompute every pack holding a level positioned in `[min_pos, max_pos]`
pub fn update_pack_points_by_level_range(uow: &UnitOfWork<'_>, min_pos: i64, max_pos: i64) -> Result<usize> {
    let t = uow.tables();
    let filter = format!(
        "id IN (SELECT pl.pack_id FROM {pack_levels} pl JOIN {levels} l ON l.id = pl.level_id \
         WHERE l.position BETWEEN ?2 AND ?3)",
        pack_levels = t.pack_levels,
        levels = t.levels,
    );
    let changed = uow.conn().execute(
        &pack_points_sql(t, &filter),
        params![uow.list().pack_multiplier, min_pos, max_pos],
    )?;
    debug!(min_pos, max_pos, changed, "Updated pack points by level range");
    Ok(changed)
}

/// Recompute one pack unconditionally
pub fn update_pack_points_by_id(uow: &UnitOfWork<'_>, pack_id: &str) -> Result<()> {
    uow.conn().execute(
        &pack_points_sql(uow.tables(), "id = ?2"),
        params![uow.list().pack_multiplier, pack_id],
    )?;
    Ok(())
}

/// Recompute every pack
pub fn update_all_pack_points(uow: &UnitOfWork<'_>) -> Result<usize> {
    let changed = uow.conn().execute(
        &pack_points_sql(uow.tables(), "1"),
        params![uow.list().pack_multiplier],
    )?;
    Ok(changed)
}

// ============================================================================
// Completion maintenance
// ============================================================================

/// Which (user, pack) pairs a completion pass reconsiders
#[derive(Debug, Clone, Copy)]
pub enum CompletionScope<'a> {
    All,
    User(&'a str),
    Pack(&'a str),
}

impl CompletionScope<'_> {
    fn condition(&self, user_col: &str, pack_col: &str, params: &mut Vec<Value>) -> String {
        match self {
            CompletionScope::All => "1".to_string(),
            CompletionScope::User(id) => {
                params.push(Value::Text(id.to_string()));
                format!("{} = ?", user_col)
            }
            CompletionScope::Pack(id) => {
                params.push(Value::Text(id.to_string()));
                format!("{} = ?", pack_col)
            }
        }
    }
}

/// Bring `completed_packs` in line with the base tables for `scope`.
///
/// Returns the users who lost at least one completion; their leaderboard
/// totals are stale and the caller has to recompute them.
pub fn update_completed_packs(uow: &UnitOfWork<'_>, scope: CompletionScope<'_>) -> Result<Vec<String>> {
    let t = uow.tables();
    let conn = uow.conn();

    let level_count = |pack: &str| format!("(SELECT COUNT(*) FROM {} x WHERE x.pack_id = {})", t.pack_levels, pack);
    let cleared_count = |pack: &str, user: &str| {
        format!(
            "(SELECT COUNT(*) FROM {pack_levels} x JOIN {submissions} s ON s.level_id = x.level_id \
             WHERE x.pack_id = {pack} AND s.submitted_by = {user} AND s.status = 'accepted')",
            pack_levels = t.pack_levels,
            submissions = t.submissions,
            pack = pack,
            user = user,
        )
    };

    // Stale rows
    let mut params = Vec::new();
    let condition = scope.condition("cp.user_id", "cp.pack_id", &mut params);
    let stale = format!(
        "{condition} AND {levels} != {cleared}",
        condition = condition,
        levels = level_count("cp.pack_id"),
        cleared = cleared_count("cp.pack_id", "cp.user_id"),
    );

    let mut stmt = conn.prepare(&format!(
        "SELECT DISTINCT cp.user_id FROM {} cp WHERE {} ORDER BY cp.user_id",
        t.completed_packs, stale
    ))?;
    let lost = stmt
        .query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let removed = conn.execute(
        &format!(
            "DELETE FROM {completed_packs} WHERE rowid IN (SELECT cp.rowid FROM {completed_packs} cp WHERE {stale})",
            completed_packs = t.completed_packs,
            stale = stale,
        ),
        params_from_iter(params.iter()),
    )?;

    // Newly qualifying rows
    let mut params = Vec::new();
    let condition = scope.condition("u.id", "p.id", &mut params);
    let added = conn.execute(
        &format!(
            "INSERT INTO {completed_packs} (user_id, pack_id) \
             SELECT u.id, p.id FROM {users} u CROSS JOIN {packs} p \
             WHERE {condition} \
             AND u.id IN (SELECT submitted_by FROM {submissions} WHERE status = 'accepted') \
             AND {levels} > 0 AND {levels} = {cleared} \
             ON CONFLICT DO NOTHING",
            completed_packs = t.completed_packs,
            users = t.users,
            packs = t.packs,
            submissions = t.submissions,
            condition = condition,
            levels = level_count("p.id"),
            cleared = cleared_count("p.id", "u.id"),
        ),
        params_from_iter(params.iter()),
    )?;

    debug!(scope = ?scope, removed, added, "Updated completed packs");
    Ok(lost)
}

// ============================================================================
// Pack edits
// ============================================================================

/// Create (no `id`) or partially update (with `id`) a pack
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackUpsert {
    pub id: Option<String>,
    pub name: Option<String>,
    pub colour: Option<String>,
    pub placement_order: Option<i64>,
    /// Full replacement of the member set
    pub level_ids: Option<Vec<String>>,
}

fn validate_levels(conn: &Connection, t: &TableNames, level_ids: &[String]) -> Result<Vec<String>> {
    let mut seen = HashSet::new();
    let unique: Vec<String> = level_ids.iter().filter(|id| seen.insert(id.as_str())).cloned().collect();

    if unique.len() < MIN_PACK_LEVELS {
        return Err(ListError::validation(format!(
            "a pack needs at least {} distinct levels, got {}",
            MIN_PACK_LEVELS,
            unique.len()
        )));
    }

    let mut stmt = conn.prepare(&format!("SELECT 1 FROM {} WHERE id = ?", t.levels))?;
    for id in &unique {
        if !stmt.exists(params![id])? {
            return Err(ListError::not_found(format!("level {}", id)));
        }
    }
    Ok(unique)
}

/// Insert or update a pack and run the cascade for it
pub fn upsert_pack_in(uow: &UnitOfWork<'_>, input: PackUpsert) -> Result<PackRow> {
    let t = uow.tables();
    let conn = uow.conn();
    let order = DenseOrder::new(&t.packs, "placement_order");
    let max_order = order.max(conn)?;

    let level_ids = match &input.level_ids {
        Some(ids) => Some(validate_levels(conn, t, ids)?),
        None => None,
    };

    let pack_id = match &input.id {
        Some(id) => {
            let existing = get_pack_row(conn, t, id)?.ok_or_else(|| ListError::not_found(format!("pack {}", id)))?;

            if let Some(target) = input.placement_order {
                if target < 1 || target > max_order {
                    return Err(ListError::validation(format!(
                        "pack placement {} outside 1..={}",
                        target, max_order
                    )));
                }
                order.move_item(conn, id, existing.placement_order, target)?;
            }
            if let Some(name) = &input.name {
                conn.execute(&format!("UPDATE {} SET name = ? WHERE id = ?", t.packs), params![name, id])?;
            }
            if let Some(colour) = &input.colour {
                conn.execute(&format!("UPDATE {} SET colour = ? WHERE id = ?", t.packs), params![colour, id])?;
            }
            id.clone()
        }
        None => {
            let name = input
                .name
                .as_deref()
                .ok_or_else(|| ListError::validation("a new pack needs a name"))?;
            if level_ids.is_none() {
                return Err(ListError::validation("a new pack needs its levels"));
            }
            let target = input.placement_order.unwrap_or(max_order + 1);
            if target < 1 || target > max_order + 1 {
                return Err(ListError::validation(format!(
                    "pack placement {} outside 1..={}",
                    target,
                    max_order + 1
                )));
            }

            let id = new_id();
            order.open_gap(conn, target)?;
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, name, colour, placement_order, points) VALUES (?, ?, ?, ?, 0)",
                    t.packs
                ),
                params![id, name, input.colour, target],
            )?;
            id
        }
    };

    if let Some(level_ids) = level_ids {
        // Current completers first drop to totals without this pack, so the
        // ones who lose it below are already settled
        withdraw_pack_points(uow, &pack_id)?;
        replace_members(conn, t, &pack_id, &level_ids)?;

        update_pack_points_by_id(uow, &pack_id)?;
        update_completed_packs(uow, CompletionScope::Pack(&pack_id))?;
        leaderboard::update_leaderboard(uow, &LeaderboardScope::Pack(&pack_id))?;
    }

    get_pack(conn, t, &pack_id)?.ok_or_else(|| ListError::not_found(format!("pack {}", pack_id)))
}

/// Diff the member set: drop what is gone, add what is new
fn replace_members(conn: &Connection, t: &TableNames, pack_id: &str, level_ids: &[String]) -> Result<()> {
    let current: HashSet<String> = pack_level_ids(conn, t, pack_id)?.into_iter().collect();
    let wanted: HashSet<&str> = level_ids.iter().map(String::as_str).collect();

    for gone in current.iter().filter(|id| !wanted.contains(id.as_str())) {
        conn.execute(
            &format!("DELETE FROM {} WHERE pack_id = ? AND level_id = ?", t.pack_levels),
            params![pack_id, gone],
        )?;
    }
    for added in level_ids.iter().filter(|id| !current.contains(*id)) {
        conn.execute(
            &format!("INSERT INTO {} (pack_id, level_id) VALUES (?, ?)", t.pack_levels),
            params![pack_id, added],
        )?;
    }
    Ok(())
}

/// Delete a pack, close its placement slot and fix the totals of everyone
/// who had completed it
pub fn delete_pack_in(uow: &UnitOfWork<'_>, pack_id: &str) -> Result<PackRow> {
    let t = uow.tables();
    let conn = uow.conn();
    let pack = get_pack(conn, t, pack_id)?.ok_or_else(|| ListError::not_found(format!("pack {}", pack_id)))?;

    // Completers' totals lose the pack while the completion rows still name them
    withdraw_pack_points(uow, pack_id)?;

    conn.execute(&format!("DELETE FROM {} WHERE id = ?", t.packs), params![pack_id])?;
    DenseOrder::new(&t.packs, "placement_order").close_gap(conn, pack.placement_order)?;
    Ok(pack)
}

/// Zero the pack's value and recompute everyone who completed it
fn withdraw_pack_points(uow: &UnitOfWork<'_>, pack_id: &str) -> Result<()> {
    uow.conn()
        .execute(&format!("UPDATE {} SET points = 0 WHERE id = ?", uow.tables().packs), params![pack_id])?;
    leaderboard::update_leaderboard(uow, &LeaderboardScope::Pack(pack_id))
}

// ============================================================================
// Reads
// ============================================================================

fn get_pack_row(conn: &Connection, t: &TableNames, pack_id: &str) -> Result<Option<PackRow>> {
    let row = conn
        .query_row(
            &format!("SELECT id, name, colour, placement_order, points FROM {} WHERE id = ?", t.packs),
            params![pack_id],
            PackRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Member level ids, in list order
pub fn pack_level_ids(conn: &Connection, t: &TableNames, pack_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT pl.level_id FROM {pack_levels} pl JOIN {levels} l ON l.id = pl.level_id \
         WHERE pl.pack_id = ? ORDER BY l.position",
        pack_levels = t.pack_levels,
        levels = t.levels,
    ))?;
    let ids = stmt
        .query_map(params![pack_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn get_pack(conn: &Connection, t: &TableNames, pack_id: &str) -> Result<Option<PackRow>> {
    match get_pack_row(conn, t, pack_id)? {
        Some(mut pack) => {
            pack.level_ids = pack_level_ids(conn, t, pack_id)?;
            Ok(Some(pack))
        }
        None => Ok(None),
    }
}

/// Every pack in placement order
pub fn list_packs(conn: &Connection, t: &TableNames) -> Result<Vec<PackRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, name, colour, placement_order, points FROM {} ORDER BY placement_order",
        t.packs
    ))?;
    let mut packs = stmt
        .query_map([], PackRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for pack in &mut packs {
        pack.level_ids = pack_level_ids(conn, t, &pack.id)?;
    }
    Ok(packs)
}

/// Packs a user has completed
pub fn completed_by(conn: &Connection, t: &TableNames, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT cp.pack_id FROM {completed_packs} cp JOIN {packs} p ON p.id = cp.pack_id \
         WHERE cp.user_id = ? ORDER BY p.placement_order",
        completed_packs = t.completed_packs,
        packs = t.packs,
    ))?;
    let ids = stmt
        .query_map(params![user_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}
