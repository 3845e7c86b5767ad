//! Table identifiers for one list
//!
//! Queries are written once and rendered against these names, so several
//! lists can live in one database file, each with its own full set of
//! tables.

use serde::{Deserialize, Serialize};

use crate::error::{ListError, Result};

/// Names of every table the engine reads or writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableNames {
    pub users: String,
    pub roles: String,
    pub name_change_requests: String,
    pub merge_requests: String,
    pub levels: String,
    pub creators: String,
    pub submissions: String,
    pub packs: String,
    pub pack_levels: String,
    pub completed_packs: String,
    pub leaderboard: String,
    pub points_lookup: String,
    pub point_formula: String,
    pub history: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            users: "users".to_string(),
            roles: "roles".to_string(),
            name_change_requests: "name_change_requests".to_string(),
            merge_requests: "merge_requests".to_string(),
            levels: "levels".to_string(),
            creators: "creators".to_string(),
            submissions: "submissions".to_string(),
            packs: "packs".to_string(),
            pack_levels: "pack_levels".to_string(),
            completed_packs: "completed_packs".to_string(),
            leaderboard: "leaderboard".to_string(),
            points_lookup: "points_lookup".to_string(),
            point_formula: "point_formula".to_string(),
            history: "history".to_string(),
        }
    }
}

impl TableNames {
    /// Prefix every table, users included; lists in one file share no rows.
    pub fn prefixed(prefix: &str) -> Self {
        let base = Self::default();
        let p = |name: &str| format!("{}_{}", prefix, name);
        Self {
            users: p(&base.users),
            roles: p(&base.roles),
            name_change_requests: p(&base.name_change_requests),
            merge_requests: p(&base.merge_requests),
            levels: p(&base.levels),
            creators: p(&base.creators),
            submissions: p(&base.submissions),
            packs: p(&base.packs),
            pack_levels: p(&base.pack_levels),
            completed_packs: p(&base.completed_packs),
            leaderboard: p(&base.leaderboard),
            points_lookup: p(&base.points_lookup),
            point_formula: p(&base.point_formula),
            history: p(&base.history),
        }
    }

    fn all(&self) -> [(&'static str, &str); 14] {
        [
            ("users", &self.users),
            ("roles", &self.roles),
            ("name_change_requests", &self.name_change_requests),
            ("merge_requests", &self.merge_requests),
            ("levels", &self.levels),
            ("creators", &self.creators),
            ("submissions", &self.submissions),
            ("packs", &self.packs),
            ("pack_levels", &self.pack_levels),
            ("completed_packs", &self.completed_packs),
            ("leaderboard", &self.leaderboard),
            ("points_lookup", &self.points_lookup),
            ("point_formula", &self.point_formula),
            ("history", &self.history),
        ]
    }

    /// Reject anything that is not a plain SQL identifier, and duplicates.
    ///
    /// Table names are spliced into SQL text, so this is the only thing
    /// standing between the config file and the query string.
    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for (role, name) in self.all() {
            if !is_identifier(name) {
                return Err(ListError::Config(format!(
                    "invalid table name for {}: {:?}",
                    role, name
                )));
            }
            if !seen.insert(name.to_ascii_lowercase()) {
                return Err(ListError::Config(format!(
                    "table name {:?} is used twice",
                    name
                )));
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names_are_valid() {
        assert!(TableNames::default().validate().is_ok());
    }

    #[test]
    fn test_prefixed_owns_every_table() {
        let names = TableNames::prefixed("aredl");
        assert_eq!(names.levels, "aredl_levels");
        assert_eq!(names.leaderboard, "aredl_leaderboard");
        assert_eq!(names.users, "aredl_users");
        assert_eq!(names.merge_requests, "aredl_merge_requests");
        assert!(names.validate().is_ok());

        let other = TableNames::prefixed("pemonlist");
        let ours: Vec<_> = names.all().iter().map(|(_, n)| n.to_string()).collect();
        assert!(other.all().iter().all(|(_, n)| !ours.contains(&n.to_string())));
    }

    #[test]
    fn test_rejects_injection() {
        let names = TableNames {
            levels: "levels; DROP TABLE users".to_string(),
            ..Default::default()
        };
        assert!(matches!(names.validate(), Err(ListError::Config(_))));

        let names = TableNames {
            packs: "1packs".to_string(),
            ..Default::default()
        };
        assert!(names.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicates() {
        let names = TableNames {
            packs: "levels".to_string(),
            ..Default::default()
        };
        assert!(names.validate().is_err());
    }
}
