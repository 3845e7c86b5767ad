//! Demonlist Engine - consistency engine for a position-ranked level list
//!
//! Keeps the derived state of a demon list (level points, pack points,
//! completed packs, the leaderboard and its ranks) consistent with the base
//! facts callers edit (positions, submissions, pack membership, bans and
//! user merges).
//!
//! ## Architecture
//!
//! - **Services**: one transaction per public operation, events after commit
//! - **Engine** (`db`): base-table mutation plus the recomputation cascade
//! - **SQLite**: every table name comes from the injected `ListConfig`
//!
//! ## Cascade
//!
//! ```text
//! position -> level points -> pack points -> completed packs -> leaderboard -> history
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/demonlist-engine/
//! ├── demonlist.db           # SQLite database (WAL)
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod error;
pub mod db;
pub mod services;

// Re-exports
pub use config::{Config, ListConfig};
pub use db::{ListDb, TableNames, UnitOfWork};
pub use db::points::PointFormula;
pub use error::{ListError, Result};
pub use services::{EventBus, ListEvent, Services};
