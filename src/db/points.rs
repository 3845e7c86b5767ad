//! Points curve and level point propagation
//!
//! `points_lookup` maps every position on the list to the points a clear at
//! that position is worth. It is regenerated wholesale from the stored
//! formula whenever the number of non-legacy levels or the formula itself
//! changes; level points are then copied out of it for a position range.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::context::UnitOfWork;
use super::expression::{self, ExpressionCurve, Precalc};
use super::levels;
use super::tables::TableNames;
use super::leaderboard::{self, LeaderboardScope};
use super::packs::{self, CompletionScope};
use crate::config::ListConfig;
use crate::error::{ListError, Result};

/// Curve from position to points.
///
/// The closed variants are expressed over `t = (x - 1) / (n - 1)`, the
/// relative position of `x` among the `n` non-legacy levels (`t = 0` when
/// `n <= 1`), so the curve stretches as the list grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PointFormula {
    /// `bottom + (top - bottom) * (1 - t)^exponent`
    Power { top: f64, bottom: f64, exponent: f64 },
    /// `bottom + (top - bottom) * e^(-decay * t)`
    Exponential { top: f64, bottom: f64, decay: f64 },
    /// Explicit values by position; positions past the end reuse the last one
    Fixed { values: Vec<f64> },
    /// Free-form formula over `x` and `level_count`, see [`expression`]
    Expression {
        formula: String,
        #[serde(default)]
        precalc: Vec<Precalc>,
    },
}

impl Default for PointFormula {
    fn default() -> Self {
        PointFormula::Exponential {
            top: 500.0,
            bottom: 15.0,
            decay: 3.5,
        }
    }
}

impl PointFormula {
    pub fn validate(&self) -> Result<()> {
        let finite = |values: &[f64]| values.iter().all(|v| v.is_finite());
        let ok = match self {
            PointFormula::Power { top, bottom, exponent } => finite(&[*top, *bottom, *exponent]) && *exponent >= 0.0,
            PointFormula::Exponential { top, bottom, decay } => finite(&[*top, *bottom, *decay]),
            PointFormula::Fixed { values } => !values.is_empty() && finite(values),
            PointFormula::Expression { formula, precalc } => {
                return expression::validate_expression(formula, precalc);
            }
        };
        if ok {
            Ok(())
        } else {
            Err(ListError::validation(format!("invalid point formula: {:?}", self)))
        }
    }

    /// Bind the curve to a list of `level_count` non-legacy levels
    pub fn curve(&self, level_count: i64) -> Result<Curve<'_>> {
        let expression = match self {
            PointFormula::Expression { formula, precalc } => {
                Some(ExpressionCurve::compile(formula, precalc, level_count)?)
            }
            _ => None,
        };
        Ok(Curve {
            formula: self,
            level_count,
            expression,
        })
    }

    /// One-off lookup value; prefer [`PointFormula::curve`] for a whole table
    pub fn points_at(&self, position: i64, level_count: i64) -> Result<f64> {
        self.curve(level_count)?.points_at(position)
    }

    /// Closed-form value, `None` for expressions
    fn closed_value(&self, position: i64, level_count: i64) -> Option<f64> {
        let t = if level_count <= 1 {
            0.0
        } else {
            ((position - 1) as f64 / (level_count - 1) as f64).clamp(0.0, 1.0)
        };
        let value = match self {
            PointFormula::Power { top, bottom, exponent } => bottom + (top - bottom) * (1.0 - t).powf(*exponent),
            PointFormula::Exponential { top, bottom, decay } => bottom + (top - bottom) * (-decay * t).exp(),
            PointFormula::Fixed { values } => {
                let index = (position.max(1) - 1) as usize;
                values.get(index).or(values.last()).copied().unwrap_or(0.0)
            }
            PointFormula::Expression { .. } => return None,
        };
        Some(value)
    }
}

/// A formula bound to one list length
pub struct Curve<'a> {
    formula: &'a PointFormula,
    level_count: i64,
    expression: Option<ExpressionCurve>,
}

impl Curve<'_> {
    /// Raw curve value at `position`
    pub fn evaluate(&mut self, position: i64) -> Result<f64> {
        match &mut self.expression {
            Some(curve) => curve.evaluate(position),
            None => Ok(self
                .formula
                .closed_value(position, self.level_count)
                .unwrap_or_default()),
        }
    }

    /// Value stored in the lookup table: one decimal, never negative
    pub fn points_at(&mut self, position: i64) -> Result<f64> {
        Ok(round_points(self.evaluate(position)?).max(0.0))
    }
}

/// Round half away from zero to one decimal, like SQL `ROUND(x, 1)`
pub fn round_points(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ============================================================================
// Formula storage
// ============================================================================

/// Stored formula for this list, or the configured default
pub fn load_formula(conn: &Connection, list: &ListConfig) -> Result<PointFormula> {
    let stored: Option<String> = conn
        .query_row(
            &format!("SELECT formula_json FROM {} WHERE list = ?", list.tables.point_formula),
            params![list.name],
            |row| row.get(0),
        )
        .optional()?;

    match stored {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(list.default_formula.clone()),
    }
}

/// Persist a new formula (does not regenerate anything)
pub fn store_formula(uow: &UnitOfWork<'_>, formula: &PointFormula) -> Result<()> {
    formula.validate()?;
    let t = uow.tables();
    uow.conn().execute(
        &format!(
            "INSERT INTO {} (list, formula_json, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(list) DO UPDATE SET formula_json = excluded.formula_json, updated_at = excluded.updated_at",
            t.point_formula
        ),
        params![uow.list().name, serde_json::to_string(formula)?, uow.now()],
    )?;
    Ok(())
}

// ============================================================================
// Lookup table
// ============================================================================

/// Rebuild `points_lookup` for the current list shape.
///
/// Positions `1..=n` (non-legacy) get the curve value, `n+1..=m` (legacy)
/// get 0.
pub fn regenerate_lookup(uow: &UnitOfWork<'_>) -> Result<()> {
    let t = uow.tables();
    let conn = uow.conn();
    let formula = load_formula(conn, uow.list())?;
    let level_count = levels::count_levels(conn, t, Some(false))?;
    let total_count = levels::count_levels(conn, t, None)?;

    conn.execute(&format!("DELETE FROM {}", t.points_lookup), [])?;

    let mut stmt = conn.prepare(&format!(
        "INSERT INTO {} (position, points) VALUES (?, ?)",
        t.points_lookup
    ))?;
    let mut curve = formula.curve(level_count)?;
    for position in 1..=level_count {
        stmt.execute(params![position, curve.points_at(position)?])?;
    }
    for position in (level_count + 1)..=total_count {
        stmt.execute(params![position, 0.0])?;
    }

    debug!(level_count, total_count, "Regenerated points lookup");
    Ok(())
}

/// Read the lookup value for one position
pub fn lookup(conn: &Connection, tables: &TableNames, position: i64) -> Result<Option<f64>> {
    let points = conn
        .query_row(
            &format!("SELECT points FROM {} WHERE position = ?", tables.points_lookup),
            params![position],
            |row| row.get(0),
        )
        .optional()?;
    Ok(points)
}

// ============================================================================
// Level point propagation
// ============================================================================

fn copy_level_points(uow: &UnitOfWork<'_>, min_pos: i64, max_pos: i64) -> Result<usize> {
    let t = uow.tables();
    let changed = uow.conn().execute(
        &format!(
            "UPDATE {levels} SET points = CASE WHEN legacy THEN 0 ELSE COALESCE(( \
                 SELECT p.points FROM {lookup} p WHERE p.position = {levels}.position \
             ), 0) END \
             WHERE position BETWEEN ?1 AND ?2",
            levels = t.levels,
            lookup = t.points_lookup,
        ),
        params![min_pos, max_pos],
    )?;
    Ok(changed)
}

/// Copy lookup values onto every level positioned in `[min_pos, max_pos]`
/// (legacy levels always get 0), then cascade to the packs and users that
/// depend on those levels.
pub fn update_level_points_by_range(uow: &UnitOfWork<'_>, min_pos: i64, max_pos: i64) -> Result<()> {
    let changed = copy_level_points(uow, min_pos, max_pos)?;
    debug!(min_pos, max_pos, changed, "Updated level points");

    packs::update_pack_points_by_level_range(uow, min_pos, max_pos)?;
    leaderboard::update_leaderboard(uow, &LeaderboardScope::LevelRange { min: min_pos, max: max_pos })?;
    Ok(())
}

/// Recompute a caller-chosen position range
pub fn recompute_range_in(uow: &UnitOfWork<'_>, min_pos: i64, max_pos: i64) -> Result<()> {
    if min_pos < 1 || max_pos < min_pos {
        return Err(ListError::validation(format!("invalid position range {}..={}", min_pos, max_pos)));
    }
    update_level_points_by_range(uow, min_pos, max_pos)
}

/// Regenerate the lookup and recompute every level
pub fn recompute_all_levels(uow: &UnitOfWork<'_>) -> Result<()> {
    regenerate_lookup(uow)?;
    let max = levels::count_levels(uow.conn(), uow.tables(), None)?;
    if max > 0 {
        update_level_points_by_range(uow, 1, max)?;
    }
    Ok(())
}

/// Store a new formula and move every level onto it
pub fn set_point_formula_in(uow: &UnitOfWork<'_>, formula: &PointFormula) -> Result<()> {
    store_formula(uow, formula)?;
    recompute_all_levels(uow)
}

/// Re-derive every derived table from the base tables
pub fn rebuild_all(uow: &UnitOfWork<'_>) -> Result<()> {
    regenerate_lookup(uow)?;
    let max = levels::count_levels(uow.conn(), uow.tables(), None)?;
    let level_rows = copy_level_points(uow, 1, max.max(1))?;
    let pack_rows = packs::update_all_pack_points(uow)?;
    let lost = packs::update_completed_packs(uow, CompletionScope::All)?;
    leaderboard::update_leaderboard(uow, &LeaderboardScope::All)?;

    debug!(level_rows, pack_rows, lost = lost.len(), "Rebuilt derived tables");
    Ok(())
}
