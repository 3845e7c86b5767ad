//! Unit of work shared by every step of one list operation

use rusqlite::{Connection, Transaction, TransactionBehavior};

use super::models::current_timestamp;
use super::tables::TableNames;
use crate::config::ListConfig;
use crate::error::Result;

/// An open transaction plus the settings the engine needs to run in it.
///
/// Every engine helper takes `&UnitOfWork`, so a helper invoked from inside
/// another operation writes into the caller's transaction and shares its
/// fate: one commit at the end, or a rollback of everything.
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
    list: &'conn ListConfig,
    now: String,
}

impl<'conn> UnitOfWork<'conn> {
    /// Begin an IMMEDIATE transaction so the write lock is taken up front
    /// rather than on the first UPDATE.
    pub(crate) fn begin(conn: &'conn mut Connection, list: &'conn ListConfig) -> Result<Self> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Self {
            tx,
            list,
            now: current_timestamp(),
        })
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.tx
    }

    pub fn tables(&self) -> &TableNames {
        &self.list.tables
    }

    pub fn list(&self) -> &ListConfig {
        self.list
    }

    /// Timestamp stamped on every row this unit of work writes
    pub fn now(&self) -> &str {
        &self.now
    }
}

impl std::fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("list", &self.list.name)
            .field("now", &self.now)
            .finish()
    }
}
