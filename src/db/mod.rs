//! SQLite storage and the consistency engine
//!
//! Base facts (positions, submissions, pack membership, bans) live in plain
//! tables. Everything derived from them (level points, pack points, completed
//! packs, the leaderboard) is rewritten by the engine inside the same
//! transaction as the mutation that invalidated it.
//!
//! ## Cascade
//!
//! ```text
//! position -> level points -> pack points -> completed packs -> leaderboard -> history
//! ```
//!
//! ## Tables
//!
//! - `levels`, `creators` - the ordered list and credits
//! - `submissions` - clears, with a per-level placement order
//! - `packs`, `pack_levels`, `completed_packs` - bundles and who finished them
//! - `leaderboard` - total points and rank per user
//! - `points_lookup`, `point_formula` - position to points curve
//! - `history` - append-only position log

pub mod schema;
pub mod tables;
pub mod context;
pub mod models;
pub mod ordering;
pub mod expression;
pub mod points;
pub mod levels;
pub mod history;
pub mod packs;
pub mod submissions;
pub mod leaderboard;
pub mod users;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::config::ListConfig;
use crate::error::Result;

pub use context::UnitOfWork;
pub use tables::TableNames;

/// SQLite database for one list
pub struct ListDb {
    conn: Mutex<Connection>,
    list: ListConfig,
}

impl ListDb {
    /// Open or create the list database
    pub fn open(db_path: &Path, list: ListConfig, busy_timeout: Duration) -> Result<Self> {
        list.validate()?;
        info!(path = ?db_path, list = %list.name, "Opening SQLite database");

        let conn = Connection::open(db_path)?;

        // WAL lets readers proceed while a writer holds the transaction
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(busy_timeout)?;

        Self::init(conn, list)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory(list: ListConfig) -> Result<Self> {
        list.validate()?;
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()?;
        Self::init(conn, list)
    }

    fn init(conn: Connection, list: ListConfig) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        schema::init_schema(&conn, &list.tables)?;

        Ok(Self {
            conn: Mutex::new(conn),
            list,
        })
    }

    /// Settings this database was opened with
    pub fn list(&self) -> &ListConfig {
        &self.list
    }

    pub fn tables(&self) -> &TableNames {
        &self.list.tables
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-operation dropped its transaction, which rolled back,
        // so the connection behind a poisoned lock is still consistent.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Read-only access outside any unit of work
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection, &TableNames) -> Result<T>,
    {
        let conn = self.lock();
        f(&conn, &self.list.tables)
    }

    /// Run `f` as one atomic unit.
    ///
    /// Commits when `f` returns `Ok`; any error drops the transaction and
    /// everything `f` wrote is rolled back. Helpers called from `f` receive
    /// the same `UnitOfWork` and never open a transaction of their own.
    pub fn run_in_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&UnitOfWork<'_>) -> Result<T>,
    {
        let mut conn = self.lock();
        let uow = UnitOfWork::begin(&mut conn, &self.list)?;
        let value = f(&uow)?;
        uow.commit()?;
        Ok(value)
    }

    /// Row counts for the base and derived tables
    pub fn stats(&self) -> Result<DbStats> {
        self.with_conn(|conn, t| {
            let count = |table: &str| -> Result<u64> {
                let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
                Ok(n as u64)
            };

            Ok(DbStats {
                user_count: count(&t.users)?,
                level_count: count(&t.levels)?,
                submission_count: count(&t.submissions)?,
                pack_count: count(&t.packs)?,
                leaderboard_count: count(&t.leaderboard)?,
                history_count: count(&t.history)?,
            })
        })
    }
}

/// Whether `table` has a row with this primary key
pub(crate) fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("SELECT 1 FROM {} WHERE id = ?", table))?;
    Ok(stmt.exists([id])?)
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub user_count: u64,
    pub level_count: u64,
    pub submission_count: u64,
    pub pack_count: u64,
    pub leaderboard_count: u64,
    pub history_count: u64,
}
