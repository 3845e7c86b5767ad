//! User service - accounts, bans and identity merges

use std::sync::Arc;

use tracing::info;

use crate::db::models::UserRow;
use crate::db::users::{self, MergeOutcome, NewUser};
use crate::db::ListDb;
use crate::error::Result;

use super::events::{EventBus, ListEvent};

pub struct UserService {
    db: Arc<ListDb>,
    events: Arc<EventBus>,
}

impl UserService {
    pub fn new(db: Arc<ListDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    // =========================================================================
    // Read Operations
    // =========================================================================

    pub fn get(&self, id: &str) -> Result<Option<UserRow>> {
        self.db.with_conn(|conn, t| users::get_user(conn, t, id))
    }

    pub fn roles(&self, id: &str) -> Result<Vec<String>> {
        self.db.with_conn(|conn, t| users::roles_of(conn, t, id))
    }

    // =========================================================================
    // Write Operations
    // =========================================================================

    pub fn create(&self, input: NewUser) -> Result<UserRow> {
        let user = self.db.run_in_transaction(|uow| users::create_user_in(uow, input))?;
        info!(id = %user.id, username = %user.username, placeholder = user.placeholder, "Created user");
        Ok(user)
    }

    pub fn grant_role(&self, id: &str, role: &str) -> Result<()> {
        self.db.run_in_transaction(|uow| users::grant_role_in(uow, id, role))
    }

    pub fn request_merge(&self, id: &str, to_merge_id: &str) -> Result<String> {
        let request = self
            .db
            .run_in_transaction(|uow| users::request_merge_in(uow, id, to_merge_id))?;
        info!(request = %request, user = %id, to_merge = %to_merge_id, "Merge requested");
        Ok(request)
    }

    pub fn request_name_change(&self, id: &str, new_name: &str) -> Result<String> {
        self.db
            .run_in_transaction(|uow| users::request_name_change_in(uow, id, new_name))
    }

    /// Pending display name change as `(request_id, new_name)`
    pub fn pending_name_change(&self, id: &str) -> Result<Option<(String, String)>> {
        self.db.with_conn(|conn, t| users::pending_name_change(conn, t, id))
    }

    pub fn accept_name_change(&self, request_id: &str) -> Result<UserRow> {
        let user = self
            .db
            .run_in_transaction(|uow| users::accept_name_change_in(uow, request_id))?;
        info!(request = %request_id, user = %user.id, global_name = %user.global_name, "Name change accepted");
        Ok(user)
    }

    pub fn reject_name_change(&self, request_id: &str) -> Result<()> {
        self.db
            .run_in_transaction(|uow| users::reject_name_change_in(uow, request_id))?;
        info!(request = %request_id, "Name change rejected");
        Ok(())
    }

    pub fn reject_merge_request(&self, request_id: &str) -> Result<()> {
        self.db
            .run_in_transaction(|uow| users::reject_merge_request_in(uow, request_id))?;
        info!(request = %request_id, "Merge request rejected");
        Ok(())
    }

    pub fn ban(&self, id: &str) -> Result<()> {
        self.db.run_in_transaction(|uow| users::ban_user_in(uow, id))?;
        info!(id = %id, "Banned user");
        self.events.emit(ListEvent::UserBanned { id: id.to_string() });
        Ok(())
    }

    pub fn unban(&self, id: &str) -> Result<()> {
        self.db.run_in_transaction(|uow| users::unban_user_in(uow, id))?;
        info!(id = %id, "Unbanned user");
        self.events.emit(ListEvent::UserUnbanned { id: id.to_string() });
        Ok(())
    }

    /// Fold `secondary` into `primary`
    pub fn merge(&self, primary: &str, secondary: &str) -> Result<MergeOutcome> {
        let outcome = self
            .db
            .run_in_transaction(|uow| users::merge_users_in(uow, primary, secondary))?;
        self.announce_merge(primary, secondary, &outcome);
        Ok(outcome)
    }

    /// Run the merge a pending request asks for
    pub fn accept_merge_request(&self, request_id: &str) -> Result<MergeOutcome> {
        let (primary, secondary, outcome) = self
            .db
            .run_in_transaction(|uow| users::accept_merge_request_in(uow, request_id))?;
        self.announce_merge(&primary, &secondary, &outcome);
        Ok(outcome)
    }

    fn announce_merge(&self, primary: &str, secondary: &str, outcome: &MergeOutcome) {
        info!(
            primary = %primary,
            secondary = %secondary,
            reassigned = outcome.reassigned,
            conflicts = outcome.conflicts,
            "Merged users"
        );
        self.events.emit(ListEvent::UsersMerged {
            primary: primary.to_string(),
            secondary: secondary.to_string(),
            conflicts: outcome.conflicts,
        });
    }
}
