//! Leaderboard service - standings and whole-list recomputation

use std::sync::Arc;

use tracing::info;

use crate::db::leaderboard;
use crate::db::levels;
use crate::db::models::LeaderboardRow;
use crate::db::points::{self, PointFormula};
use crate::db::ListDb;
use crate::error::Result;

use super::events::{EventBus, ListEvent};

pub struct LeaderboardService {
    db: Arc<ListDb>,
    events: Arc<EventBus>,
}

impl LeaderboardService {
    pub fn new(db: Arc<ListDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    /// One page of standings, best first
    pub fn page(&self, limit: u32, offset: u32) -> Result<Vec<LeaderboardRow>> {
        self.db
            .with_conn(|conn, t| leaderboard::list_leaderboard(conn, t, limit, offset))
    }

    pub fn entry(&self, user_id: &str) -> Result<Option<LeaderboardRow>> {
        self.db.with_conn(|conn, t| leaderboard::get_entry(conn, t, user_id))
    }

    /// The formula in effect
    pub fn formula(&self) -> Result<PointFormula> {
        self.db.with_conn(|conn, _| points::load_formula(conn, self.db.list()))
    }

    /// Replace the formula and move every level onto it
    pub fn set_point_formula(&self, formula: PointFormula) -> Result<()> {
        self.db
            .run_in_transaction(|uow| points::set_point_formula_in(uow, &formula))?;
        info!(formula = ?formula, "Point formula replaced");
        self.emit_full_range()
    }

    /// Recompute level, pack and user points for a position range
    pub fn recompute_range(&self, min_position: i64, max_position: i64) -> Result<()> {
        self.db
            .run_in_transaction(|uow| points::recompute_range_in(uow, min_position, max_position))?;
        info!(min_position, max_position, "Recomputed points");
        self.events.emit(ListEvent::PointsRecomputed {
            min_position,
            max_position,
        });
        Ok(())
    }

    /// Re-derive every derived table
    pub fn rebuild_all(&self) -> Result<()> {
        self.db.run_in_transaction(points::rebuild_all)?;
        info!("Rebuilt derived tables");
        self.emit_full_range()
    }

    fn emit_full_range(&self) -> Result<()> {
        let max_position = self.db.with_conn(|conn, t| levels::count_levels(conn, t, None))?;
        self.events.emit(ListEvent::PointsRecomputed {
            min_position: 1,
            max_position,
        });
        Ok(())
    }
}
