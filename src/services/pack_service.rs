//! Pack service - pack membership and placement

use std::sync::Arc;

use tracing::info;

use crate::db::models::PackRow;
use crate::db::packs::{self, PackUpsert};
use crate::db::ListDb;
use crate::error::Result;

use super::events::{EventBus, ListEvent};

pub struct PackService {
    db: Arc<ListDb>,
    events: Arc<EventBus>,
}

impl PackService {
    pub fn new(db: Arc<ListDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    pub fn get(&self, id: &str) -> Result<Option<PackRow>> {
        self.db.with_conn(|conn, t| packs::get_pack(conn, t, id))
    }

    pub fn list(&self) -> Result<Vec<PackRow>> {
        self.db.with_conn(packs::list_packs)
    }

    /// Pack ids a user has completed
    pub fn completed_by(&self, user_id: &str) -> Result<Vec<String>> {
        self.db.with_conn(|conn, t| packs::completed_by(conn, t, user_id))
    }

    pub fn upsert(&self, input: PackUpsert) -> Result<PackRow> {
        let pack = self.db.run_in_transaction(|uow| packs::upsert_pack_in(uow, input))?;

        info!(
            id = %pack.id,
            name = %pack.name,
            levels = pack.level_ids.len(),
            points = pack.points,
            "Saved pack"
        );
        self.events.emit(ListEvent::PackSaved {
            id: pack.id.clone(),
            points: pack.points,
        });
        Ok(pack)
    }

    pub fn delete(&self, id: &str) -> Result<PackRow> {
        let pack = self.db.run_in_transaction(|uow| packs::delete_pack_in(uow, id))?;

        info!(id = %id, name = %pack.name, "Deleted pack");
        self.events.emit(ListEvent::PackDeleted { id: id.to_string() });
        Ok(pack)
    }
}
