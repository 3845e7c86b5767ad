//! Service layer for demonlist-engine
//!
//! Services own the transaction boundary of every public operation. Each
//! write:
//! - opens one unit of work on the list database
//! - runs the engine function and its whole recomputation cascade inside it
//! - logs the committed result
//! - emits a `ListEvent` once the commit succeeded
//!
//! ## Architecture
//!
//! ```text
//! Request layer (external)
//!     ↓
//! Service Layer (transactions, events)
//!     ↓
//! Engine (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod events;
pub mod level_service;
pub mod submission_service;
pub mod pack_service;
pub mod user_service;
pub mod leaderboard_service;

pub use events::{spawn_logging_listener, EventBus, EventListener, ListEvent, LoggingEventListener};
pub use leaderboard_service::LeaderboardService;
pub use level_service::LevelService;
pub use pack_service::PackService;
pub use submission_service::SubmissionService;
pub use user_service::UserService;

use crate::db::ListDb;
use std::sync::Arc;

/// Service container for dependency injection
pub struct Services {
    pub levels: Arc<LevelService>,
    pub submissions: Arc<SubmissionService>,
    pub packs: Arc<PackService>,
    pub users: Arc<UserService>,
    pub leaderboard: Arc<LeaderboardService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services over one shared database
    pub fn new(db: Arc<ListDb>) -> Self {
        let events = Arc::new(EventBus::new());

        Self {
            levels: Arc::new(LevelService::new(db.clone(), events.clone())),
            submissions: Arc::new(SubmissionService::new(db.clone(), events.clone())),
            packs: Arc::new(PackService::new(db.clone(), events.clone())),
            users: Arc::new(UserService::new(db.clone(), events.clone())),
            leaderboard: Arc::new(LeaderboardService::new(db, events.clone())),
            events,
        }
    }
}
