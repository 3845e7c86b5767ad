//! Free-form point curves
//!
//! An expression curve is a formula over `x` (the position) and
//! `level_count` (the number of non-legacy levels), plus any named values
//! computed once per regeneration from earlier ones. `sqrt` is available
//! next to the evaluator's own operators; `^` is exponentiation.

use evalexpr::{
    build_operator_tree, ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Node, Value,
};
use serde::{Deserialize, Serialize};

use crate::error::{ListError, Result};

const RESERVED: [&str; 3] = ["x", "level_count", "sqrt"];

/// A named value computed before the curve, e.g. `span = level_count - 1`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precalc {
    pub name: String,
    pub expression: String,
}

/// A parsed curve bound to one list length
pub struct ExpressionCurve {
    formula: Node,
    context: HashMapContext,
}

impl ExpressionCurve {
    /// Parse `formula`, then evaluate `precalc` in order against `level_count`
    pub fn compile(formula: &str, precalc: &[Precalc], level_count: i64) -> Result<Self> {
        validate_expression(formula, precalc)?;

        let mut context = HashMapContext::new();
        context
            .set_function(
                "sqrt".to_string(),
                Function::new(|argument| Ok(Value::Float(argument.as_number()?.sqrt()))),
            )
            .map_err(invalid)?;
        context
            .set_value("level_count".to_string(), Value::Float(level_count as f64))
            .map_err(invalid)?;

        for step in precalc {
            let value = build_operator_tree(&step.expression)
                .and_then(|node| node.eval_number_with_context(&context))
                .map_err(|e| ListError::validation(format!("precalc {}: {}", step.name, e)))?;
            context.set_value(step.name.clone(), Value::Float(value)).map_err(invalid)?;
        }

        let formula = build_operator_tree(formula).map_err(invalid)?;
        Ok(ExpressionCurve { formula, context })
    }

    /// Raw value at `position`; a non-finite result is an error
    pub fn evaluate(&mut self, position: i64) -> Result<f64> {
        self.context
            .set_value("x".to_string(), Value::Float(position as f64))
            .map_err(invalid)?;
        let value = self.formula.eval_number_with_context(&self.context).map_err(invalid)?;
        if !value.is_finite() {
            return Err(ListError::validation(format!(
                "point formula is not finite at position {}",
                position
            )));
        }
        Ok(value)
    }
}

/// Parse-only check, run before a formula is stored
pub fn validate_expression(formula: &str, precalc: &[Precalc]) -> Result<()> {
    for step in precalc {
        if !is_identifier(&step.name) || RESERVED.contains(&step.name.as_str()) {
            return Err(ListError::validation(format!("invalid precalc name {:?}", step.name)));
        }
        build_operator_tree(&step.expression)
            .map_err(|e| ListError::validation(format!("precalc {}: {}", step.name, e)))?;
    }
    build_operator_tree(formula).map_err(invalid)?;
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn invalid(err: EvalexprError) -> ListError {
    ListError::validation(format!("point formula: {}", err))
}
