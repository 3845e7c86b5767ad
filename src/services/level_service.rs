//! Level service - placing, moving and editing levels

use std::sync::Arc;

use tracing::info;

use crate::db::levels::{self, LevelUpdate, MoveOutcome, NewLevel};
use crate::db::models::{HistoryRow, LevelRow};
use crate::db::{history, ListDb};
use crate::error::Result;

use super::events::{EventBus, ListEvent};

pub struct LevelService {
    db: Arc<ListDb>,
    events: Arc<EventBus>,
}

impl LevelService {
    pub fn new(db: Arc<ListDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, id: &str) -> Result<Option<LevelRow>> {
        self.db.with_conn(|conn, t| levels::get_level(conn, t, id))
    }

    /// The list in position order
    pub fn list(&self, include_legacy: bool) -> Result<Vec<LevelRow>> {
        self.db.with_conn(|conn, t| levels::list_levels(conn, t, include_legacy))
    }

    pub fn creators(&self, id: &str) -> Result<Vec<String>> {
        self.db.with_conn(|conn, t| levels::creators_of(conn, t, id))
    }

    /// Position history of one level, oldest first
    pub fn history(&self, id: &str) -> Result<Vec<HistoryRow>> {
        self.db.with_conn(|conn, t| history::level_history(conn, t, id))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    /// Place a new level, recording its verification when given
    pub fn place(&self, input: NewLevel, action_by: &str) -> Result<LevelRow> {
        let level = self
            .db
            .run_in_transaction(|uow| levels::place_level_in(uow, input, action_by))?;

        info!(id = %level.id, name = %level.name, position = level.position, legacy = level.legacy, "Placed level");
        self.events.emit(ListEvent::LevelPlaced {
            id: level.id.clone(),
            position: level.position,
            legacy: level.legacy,
            action_by: action_by.to_string(),
        });
        Ok(level)
    }

    /// Move a level and/or change its legacy flag
    pub fn move_level(
        &self,
        id: &str,
        position: Option<i64>,
        legacy: Option<bool>,
        action_by: &str,
    ) -> Result<Option<MoveOutcome>> {
        let outcome = self
            .db
            .run_in_transaction(|uow| levels::move_level_in(uow, id, position, legacy, action_by))?;

        if let Some(moved) = &outcome {
            self.announce_move(id, moved, action_by);
        }
        Ok(outcome)
    }

    /// Partial edit; a position or legacy change goes through the move path
    pub fn update(&self, id: &str, update: LevelUpdate, action_by: &str) -> Result<LevelRow> {
        let (level, moved) = self
            .db
            .run_in_transaction(|uow| levels::update_level_in(uow, id, update, action_by))?;

        info!(id = %id, moved = moved.is_some(), "Updated level");
        if let Some(moved) = &moved {
            self.announce_move(id, moved, action_by);
        }
        Ok(level)
    }

    fn announce_move(&self, id: &str, moved: &MoveOutcome, action_by: &str) {
        info!(
            id = %id,
            old_position = moved.old_position,
            new_position = moved.new_position,
            legacy = moved.new_legacy,
            shifted = moved.shifted,
            "Moved level"
        );
        self.events.emit(ListEvent::LevelMoved {
            id: id.to_string(),
            old_position: moved.old_position,
            new_position: moved.new_position,
            legacy: moved.new_legacy,
            action_by: action_by.to_string(),
        });
    }
}
