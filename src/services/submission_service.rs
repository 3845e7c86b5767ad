//! Submission service - clears, their review status and placement order

use std::sync::Arc;

use tracing::info;

use crate::db::models::{SubmissionRow, SubmissionStatus};
use crate::db::submissions::{self, SubmissionUpsert};
use crate::db::ListDb;
use crate::error::Result;

use super::events::{EventBus, ListEvent};

pub struct SubmissionService {
    db: Arc<ListDb>,
    events: Arc<EventBus>,
}

impl SubmissionService {
    pub fn new(db: Arc<ListDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    pub fn get(&self, id: &str) -> Result<Option<SubmissionRow>> {
        self.db.with_conn(|conn, t| submissions::get_submission(conn, t, id))
    }

    /// Submissions on a level in placement order
    pub fn for_level(&self, level_id: &str) -> Result<Vec<SubmissionRow>> {
        self.db.with_conn(|conn, t| submissions::submissions_for_level(conn, t, level_id))
    }

    /// Create or update a submission. `allowed_from` is the set of current
    /// statuses the caller may act on.
    pub fn upsert(&self, input: SubmissionUpsert, allowed_from: &[SubmissionStatus]) -> Result<SubmissionRow> {
        let status_changed = input.status.is_some();
        let row = self
            .db
            .run_in_transaction(|uow| submissions::upsert_submission_in(uow, input, allowed_from))?;

        info!(
            id = %row.id,
            level_id = %row.level_id,
            submitted_by = %row.submitted_by,
            status = %row.status,
            placement_order = row.placement_order,
            "Saved submission"
        );
        if status_changed {
            self.events.emit(ListEvent::SubmissionChanged {
                id: row.id.clone(),
                level_id: row.level_id.clone(),
                submitted_by: row.submitted_by.clone(),
                status: row.status,
            });
        }
        Ok(row)
    }

    /// Withdraw or remove a submission
    pub fn delete(&self, id: &str, allowed_from: &[SubmissionStatus]) -> Result<SubmissionRow> {
        let row = self
            .db
            .run_in_transaction(|uow| submissions::delete_submission_in(uow, id, allowed_from))?;

        info!(id = %id, level_id = %row.level_id, "Deleted submission");
        self.events.emit(ListEvent::SubmissionDeleted {
            id: row.id.clone(),
            submitted_by: row.submitted_by.clone(),
        });
        Ok(row)
    }
}
