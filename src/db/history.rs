//! Append-only position history
//!
//! Every position-changing operation writes one entry for the level it acted
//! on and one entry per level it pushed aside, all sharing the same cause,
//! actor and timestamp.

use rusqlite::{params, Connection};

use super::context::UnitOfWork;
use super::models::{HistoryAction, HistoryRow};
use super::tables::TableNames;
use crate::error::Result;

/// Entry for the level the operation acted on
pub fn record_level_event(
    uow: &UnitOfWork<'_>,
    level_id: &str,
    action: HistoryAction,
    new_position: i64,
    action_by: &str,
) -> Result<()> {
    uow.conn().execute(
        &format!(
            "INSERT INTO {} (level_id, action, new_position, cause_id, action_by, created_at) \
             VALUES (?1, ?2, ?3, ?1, ?4, ?5)",
            uow.tables().history
        ),
        params![level_id, action, new_position, action_by, uow.now()],
    )?;
    Ok(())
}

/// Bulk entries for every level now in `[min_pos, max_pos]` except the cause
pub fn record_shifted_range(
    uow: &UnitOfWork<'_>,
    cause_id: &str,
    action: HistoryAction,
    min_pos: i64,
    max_pos: i64,
    action_by: &str,
) -> Result<usize> {
    let t = uow.tables();
    let written = uow.conn().execute(
        &format!(
            "INSERT INTO {history} (level_id, action, new_position, cause_id, action_by, created_at) \
             SELECT id, ?1, position, ?2, ?3, ?4 FROM {levels} \
             WHERE position BETWEEN ?5 AND ?6 AND id != ?2 \
             ORDER BY position",
            history = t.history,
            levels = t.levels,
        ),
        params![action, cause_id, action_by, uow.now(), min_pos, max_pos],
    )?;
    Ok(written)
}

/// Bulk `placedAbove` entries for every level below a freshly placed one
pub fn record_shifted_above(uow: &UnitOfWork<'_>, cause_id: &str, position: i64, action_by: &str) -> Result<usize> {
    record_shifted_range(uow, cause_id, HistoryAction::PlacedAbove, position + 1, i64::MAX, action_by)
}

/// All entries for a level, oldest first
pub fn level_history(conn: &Connection, tables: &TableNames, level_id: &str) -> Result<Vec<HistoryRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, level_id, action, new_position, cause_id, action_by, created_at \
         FROM {} WHERE level_id = ? ORDER BY id",
        tables.history
    ))?;
    let rows = stmt
        .query_map(params![level_id], HistoryRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Entries caused by one level (its own plus the ones it pushed)
pub fn caused_by(conn: &Connection, tables: &TableNames, cause_id: &str) -> Result<Vec<HistoryRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, level_id, action, new_position, cause_id, action_by, created_at \
         FROM {} WHERE cause_id = ? ORDER BY id",
        tables.history
    ))?;
    let rows = stmt
        .query_map(params![cause_id], HistoryRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
