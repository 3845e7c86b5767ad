//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use super::tables::TableNames;
use crate::error::Result;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection, tables: &TableNames) -> Result<()> {
    // Check current schema version
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn, tables)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        migrate_schema(conn, current_version)?;
    } else {
        // Tables of a second list sharing this file may not exist yet
        create_tables(conn, tables)?;
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;

    Ok(version.unwrap_or(0))
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

/// Migrate schema from older version
fn migrate_schema(conn: &Connection, from_version: i32) -> Result<()> {
    match from_version {
        // 1 -> 2 goes here once there is a v2
        _ => {}
    }

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Create all tables (idempotent)
fn create_tables(conn: &Connection, t: &TableNames) -> Result<()> {
    conn.execute_batch(&users_schema(t))?;
    conn.execute_batch(&list_schema(t))?;
    conn.execute_batch(&derived_schema(t))?;
    conn.execute_batch(&indexes_schema(t))?;
    Ok(())
}

/// Accounts and the requests that reference them
fn users_schema(t: &TableNames) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {users} (
    id TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL UNIQUE,
    global_name TEXT NOT NULL,
    banned INTEGER NOT NULL DEFAULT 0,
    placeholder INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS {roles} (
    user_id TEXT NOT NULL REFERENCES {users}(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    PRIMARY KEY (user_id, role)
);

CREATE TABLE IF NOT EXISTS {name_change_requests} (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL UNIQUE REFERENCES {users}(id) ON DELETE CASCADE,
    new_name TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS {merge_requests} (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL UNIQUE REFERENCES {users}(id) ON DELETE CASCADE,
    to_merge_id TEXT NOT NULL REFERENCES {users}(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#,
        users = t.users,
        roles = t.roles,
        name_change_requests = t.name_change_requests,
        merge_requests = t.merge_requests,
    )
}

/// Base facts: levels, credits, clears, packs, history
///
/// Position columns are deliberately not UNIQUE: SQLite checks uniqueness row
/// by row inside an UPDATE, which would reject every range shift.
fn list_schema(t: &TableNames) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {levels} (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    game_level_id INTEGER,
    position INTEGER NOT NULL,
    legacy INTEGER NOT NULL DEFAULT 0,
    points REAL NOT NULL DEFAULT 0,
    publisher_id TEXT REFERENCES {users}(id),
    verification_id TEXT REFERENCES {submissions}(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS {creators} (
    level_id TEXT NOT NULL REFERENCES {levels}(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES {users}(id),
    PRIMARY KEY (level_id, user_id)
);

CREATE TABLE IF NOT EXISTS {submissions} (
    id TEXT PRIMARY KEY NOT NULL,
    level_id TEXT NOT NULL REFERENCES {levels}(id) ON DELETE CASCADE,
    submitted_by TEXT NOT NULL REFERENCES {users}(id),
    status TEXT NOT NULL DEFAULT 'pending',
    placement_order INTEGER NOT NULL,
    reviewer_id TEXT REFERENCES {users}(id),
    video_url TEXT,
    mobile INTEGER NOT NULL DEFAULT 0,
    fps INTEGER,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (level_id, submitted_by)
);

CREATE TABLE IF NOT EXISTS {packs} (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    colour TEXT,
    placement_order INTEGER NOT NULL,
    points REAL NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS {pack_levels} (
    pack_id TEXT NOT NULL REFERENCES {packs}(id) ON DELETE CASCADE,
    level_id TEXT NOT NULL REFERENCES {levels}(id) ON DELETE CASCADE,
    PRIMARY KEY (pack_id, level_id)
);

-- Append-only position log
CREATE TABLE IF NOT EXISTS {history} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    level_id TEXT NOT NULL REFERENCES {levels}(id) ON DELETE CASCADE,
    action TEXT NOT NULL,
    new_position INTEGER NOT NULL,
    cause_id TEXT NOT NULL REFERENCES {levels}(id) ON DELETE CASCADE,
    action_by TEXT NOT NULL REFERENCES {users}(id),
    created_at TEXT NOT NULL
);
"#,
        users = t.users,
        levels = t.levels,
        creators = t.creators,
        submissions = t.submissions,
        packs = t.packs,
        pack_levels = t.pack_levels,
        history = t.history,
    )
}

/// Derived state, owned by the engine
fn derived_schema(t: &TableNames) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS {completed_packs} (
    user_id TEXT NOT NULL REFERENCES {users}(id) ON DELETE CASCADE,
    pack_id TEXT NOT NULL REFERENCES {packs}(id) ON DELETE CASCADE,
    PRIMARY KEY (user_id, pack_id)
);

CREATE TABLE IF NOT EXISTS {leaderboard} (
    user_id TEXT PRIMARY KEY NOT NULL REFERENCES {users}(id) ON DELETE CASCADE,
    points REAL NOT NULL DEFAULT 0,
    rank INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS {points_lookup} (
    position INTEGER PRIMARY KEY NOT NULL,
    points REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS {point_formula} (
    list TEXT PRIMARY KEY NOT NULL,
    formula_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#,
        users = t.users,
        packs = t.packs,
        completed_packs = t.completed_packs,
        leaderboard = t.leaderboard,
        points_lookup = t.points_lookup,
        point_formula = t.point_formula,
    )
}

/// Index definitions for the range predicates the engine runs
fn indexes_schema(t: &TableNames) -> String {
    format!(
        r#"
CREATE INDEX IF NOT EXISTS idx_{levels}_position ON {levels}(position);
CREATE INDEX IF NOT EXISTS idx_{levels}_legacy ON {levels}(legacy, position);
CREATE INDEX IF NOT EXISTS idx_{submissions}_submitter ON {submissions}(submitted_by, status);
CREATE INDEX IF NOT EXISTS idx_{submissions}_order ON {submissions}(level_id, placement_order);
CREATE INDEX IF NOT EXISTS idx_{packs}_order ON {packs}(placement_order);
CREATE INDEX IF NOT EXISTS idx_{pack_levels}_level ON {pack_levels}(level_id);
CREATE INDEX IF NOT EXISTS idx_{completed_packs}_pack ON {completed_packs}(pack_id);
CREATE INDEX IF NOT EXISTS idx_{leaderboard}_rank ON {leaderboard}(rank);
CREATE INDEX IF NOT EXISTS idx_{history}_level ON {history}(level_id, id);
"#,
        levels = t.levels,
        submissions = t.submissions,
        packs = t.packs,
        pack_levels = t.pack_levels,
        completed_packs = t.completed_packs,
        leaderboard = t.leaderboard,
        history = t.history,
    )
}
