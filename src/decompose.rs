//! Arithmetic expression decomposition.
//!
//! Nested arithmetic inside a constraint is flattened into a sequence of
//! atomic steps (`temp_1`, `temp_2`, ...) each performing one operation on
//! literals, field accesses, or earlier step results. The rewritten
//! constraint references step results instead of nested expressions, so a
//! join node executes the steps in dependency order and then runs a flat
//! comparison.
//!
//! Step dependencies form a DAG by construction when produced here, but
//! validation still runs a tricolor depth-first search: steps can also be
//! supplied by callers assembling networks programmatically, and the
//! walker doubles as the topological sort that fixes execution order.

use std::collections::HashMap;
use tracing::warn;

use crate::ast::{ArithOp, Condition};
use crate::error::ReteError;
use crate::eval::eval_value;
use crate::token::Token;
use crate::value::Value;

/// Nesting depth beyond which decomposition logs a warning. Deep chains
/// still work; the warning flags constraints that likely should be split
/// across rules.
pub const DEPTH_WARN_THRESHOLD: usize = 10;

/// Nesting depth at which decomposition gives up. A constraint this deep
/// is almost certainly generated by a runaway producer.
pub const DEPTH_HARD_LIMIT: usize = 100;

/// One atomic arithmetic operation.
#[derive(Clone, Debug, PartialEq)]
pub struct ArithmeticStep {
    pub name: String,
    pub operator: ArithOp,
    pub left: Condition,
    pub right: Condition,
    /// Names of earlier steps whose results this step consumes.
    pub dependencies: Vec<String>,
}

/// The result of decomposing a constraint.
#[derive(Clone, Debug, PartialEq)]
pub struct Decomposition {
    /// Steps in execution order.
    pub steps: Vec<ArithmeticStep>,
    /// The constraint with every arithmetic subtree replaced by a
    /// `TempResult` reference.
    pub rewritten: Condition,
}

impl Decomposition {
    /// Execute the steps against a token's bindings. Results the token
    /// already carries from upstream ride along; this decomposition's own
    /// steps are always recomputed, since step numbering restarts per
    /// condition and an inherited name may belong to a different
    /// expression. Steps whose operands cannot be produced leave no
    /// result, which makes any comparison that consumes them false.
    pub fn execute(&self, token: &Token) -> HashMap<String, Value> {
        let mut temps = token.results.clone();
        for step in &self.steps {
            temps.remove(&step.name);
        }
        for step in &self.steps {
            let l = eval_value(&step.left, token, &temps);
            let r = eval_value(&step.right, token, &temps);
            if let (Some(l), Some(r)) = (l, r) {
                if let Some(result) = Value::arith(step.operator, &l, &r) {
                    temps.insert(step.name.clone(), result);
                }
            }
        }
        temps
    }
}

/// Flatten nested arithmetic in `cond` into atomic steps. Step numbering
/// restarts at `temp_1` for each call so the same expression always
/// yields the same step names.
pub fn decompose(cond: &Condition) -> Result<Decomposition, ReteError> {
    let mut steps = Vec::new();
    let mut counter = 0usize;
    let rewritten = rewrite(cond, &mut steps, &mut counter, 0)?;
    let order = check_cycles(&steps)?;
    let by_name: HashMap<String, ArithmeticStep> =
        steps.into_iter().map(|s| (s.name.clone(), s)).collect();
    let mut ordered = Vec::with_capacity(by_name.len());
    for name in order {
        if let Some(step) = by_name.get(&name) {
            ordered.push(step.clone());
        }
    }
    Ok(Decomposition {
        steps: ordered,
        rewritten,
    })
}

fn rewrite(
    cond: &Condition,
    steps: &mut Vec<ArithmeticStep>,
    counter: &mut usize,
    depth: usize,
) -> Result<Condition, ReteError> {
    if depth == DEPTH_WARN_THRESHOLD {
        warn!(depth, "deeply nested arithmetic expression");
    }
    if depth > DEPTH_HARD_LIMIT {
        return Err(ReteError::validation(format!(
            "constraint nesting exceeds {} levels",
            DEPTH_HARD_LIMIT
        )));
    }
    Ok(match cond {
        Condition::BinaryOp {
            operator,
            left,
            right,
        } => {
            let left = rewrite(left, steps, counter, depth + 1)?;
            let right = rewrite(right, steps, counter, depth + 1)?;
            let mut dependencies = Vec::new();
            for side in [&left, &right] {
                if let Condition::TempResult { step_name } = side {
                    dependencies.push(step_name.clone());
                }
            }
            *counter += 1;
            let name = format!("temp_{}", counter);
            steps.push(ArithmeticStep {
                name: name.clone(),
                operator: *operator,
                left,
                right,
                dependencies,
            });
            Condition::temp(&name)
        }
        Condition::Comparison {
            operator,
            left,
            right,
        } => Condition::Comparison {
            operator: *operator,
            left: Box::new(rewrite(left, steps, counter, depth + 1)?),
            right: Box::new(rewrite(right, steps, counter, depth + 1)?),
        },
        Condition::And { operands } => Condition::And {
            operands: operands
                .iter()
                .map(|c| rewrite(c, steps, counter, depth + 1))
                .collect::<Result<Vec<_>, _>>()?,
        },
        Condition::Or { operands } => Condition::Or {
            operands: operands
                .iter()
                .map(|c| rewrite(c, steps, counter, depth + 1))
                .collect::<Result<Vec<_>, _>>()?,
        },
        Condition::Not { constraint } => Condition::Not {
            constraint: Box::new(rewrite(constraint, steps, counter, depth + 1)?),
        },
        other => other.clone(),
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Verify the step dependency graph is acyclic and return a topological
/// execution order. Dependencies on names outside the step set are
/// ignored; they refer to nothing executable and surface later as a
/// missing temp result.
pub fn check_cycles(steps: &[ArithmeticStep]) -> Result<Vec<String>, ReteError> {
    let index: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();
    let mut colors = vec![Color::White; steps.len()];
    let mut order = Vec::with_capacity(steps.len());

    fn visit(
        i: usize,
        steps: &[ArithmeticStep],
        index: &HashMap<&str, usize>,
        colors: &mut [Color],
        order: &mut Vec<String>,
        trail: &mut Vec<String>,
    ) -> Result<(), ReteError> {
        match colors[i] {
            Color::Black => return Ok(()),
            Color::Gray => {
                let mut cycle = trail.clone();
                cycle.push(steps[i].name.clone());
                return Err(ReteError::CircularDependency { steps: cycle });
            }
            Color::White => {}
        }
        colors[i] = Color::Gray;
        trail.push(steps[i].name.clone());
        for dep in &steps[i].dependencies {
            if let Some(&j) = index.get(dep.as_str()) {
                visit(j, steps, index, colors, order, trail)?;
            }
        }
        trail.pop();
        colors[i] = Color::Black;
        order.push(steps[i].name.clone());
        Ok(())
    }

    let mut trail = Vec::new();
    for i in 0..steps.len() {
        visit(i, steps, &index, &mut colors, &mut order, &mut trail)?;
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::CompareOp;
    use crate::fact::Fact;
    use std::sync::Arc;

    fn step(name: &str, deps: Vec<&str>) -> ArithmeticStep {
        ArithmeticStep {
            name: name.to_string(),
            operator: ArithOp::Add,
            left: Condition::literal(1i64),
            right: Condition::literal(1i64),
            dependencies: deps.into_iter().map(String::from).collect(),
        }
    }

    #[test]
    fn nested_expression_flattens_in_order() {
        // (qte * 23) + 5 >= 100
        let cond = Condition::compare(
            CompareOp::Ge,
            Condition::binary(
                ArithOp::Add,
                Condition::binary(
                    ArithOp::Mul,
                    Condition::field("c", "qte"),
                    Condition::literal(23i64),
                ),
                Condition::literal(5i64),
            ),
            Condition::literal(100i64),
        );
        let d = decompose(&cond).unwrap();
        assert_eq!(d.steps.len(), 2);
        assert_eq!(d.steps[0].name, "temp_1");
        assert_eq!(d.steps[1].name, "temp_2");
        assert_eq!(d.steps[1].dependencies, vec!["temp_1".to_string()]);

        let fact: Arc<Fact> = Fact::new("Commande", "1", vec![("qte", Value::from(5i64))]);
        let token = Token::of("c", fact);
        let temps = d.execute(&token);
        assert_eq!(temps.get("temp_2"), Some(&Value::from(120i64)));
        assert!(crate::eval::eval_bool(&d.rewritten, &token, &temps));
    }

    #[test]
    fn cycle_is_rejected() {
        let steps = vec![step("temp_1", vec!["temp_2"]), step("temp_2", vec!["temp_1"])];
        match check_cycles(&steps) {
            Err(ReteError::CircularDependency { steps }) => {
                assert!(steps.len() >= 2);
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn topological_order_respects_dependencies() {
        let steps = vec![
            step("temp_3", vec!["temp_1", "temp_2"]),
            step("temp_1", vec![]),
            step("temp_2", vec!["temp_1"]),
        ];
        let order = check_cycles(&steps).unwrap();
        let pos = |n: &str| order.iter().position(|s| s == n).unwrap();
        assert!(pos("temp_1") < pos("temp_2"));
        assert!(pos("temp_2") < pos("temp_3"));
    }

    #[test]
    fn runaway_nesting_is_rejected() {
        let mut expr = Condition::literal(1i64);
        for _ in 0..(DEPTH_HARD_LIMIT + 2) {
            expr = Condition::binary(ArithOp::Add, expr, Condition::literal(1i64));
        }
        let cond = Condition::compare(CompareOp::Eq, expr, Condition::literal(0i64));
        assert!(decompose(&cond).is_err());
    }

    #[test]
    fn counter_restarts_per_expression() {
        let cond = Condition::compare(
            CompareOp::Eq,
            Condition::binary(
                ArithOp::Add,
                Condition::field("a", "x"),
                Condition::literal(1i64),
            ),
            Condition::literal(2i64),
        );
        let first = decompose(&cond).unwrap();
        let second = decompose(&cond).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.steps[0].name, "temp_1");
    }
}
