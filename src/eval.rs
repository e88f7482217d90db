//! Condition evaluation against token bindings.
//!
//! Evaluation is total: a comparison whose operand cannot be produced
//! (missing field, unbound variable, division by zero, arithmetic on
//! non-numbers) is simply false rather than an error. Join tests must not
//! abort propagation; a fact that cannot satisfy a test does not match.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::Condition;
use crate::fact::Fact;
use crate::token::Token;
use crate::value::Value;

/// Evaluate a constraint to a boolean against a token's bindings.
/// `temps` carries the results of already-executed decomposed arithmetic
/// steps, keyed by step name.
pub fn eval_bool(cond: &Condition, token: &Token, temps: &HashMap<String, Value>) -> bool {
    match cond {
        Condition::Comparison {
            operator,
            left,
            right,
        } => match (eval_value(left, token, temps), eval_value(right, token, temps)) {
            (Some(l), Some(r)) => Value::compare(*operator, &l, &r),
            _ => false,
        },
        Condition::And { operands } => operands.iter().all(|c| eval_bool(c, token, temps)),
        Condition::Or { operands } => operands.iter().any(|c| eval_bool(c, token, temps)),
        Condition::Not { constraint } => !eval_bool(constraint, token, temps),
        Condition::Passthrough { .. } => true,
        Condition::Literal {
            value: Value::Bool(b),
        } => *b,
        // A non-boolean expression in boolean position never matches.
        _ => false,
    }
}

/// Evaluate an expression to a scalar, or `None` when it cannot be
/// produced from the given bindings.
pub fn eval_value(
    cond: &Condition,
    token: &Token,
    temps: &HashMap<String, Value>,
) -> Option<Value> {
    match cond {
        Condition::Literal { value } => Some(value.clone()),
        Condition::FieldAccess { object, field } => {
            let fact = token.get(object)?;
            fact.get(field).cloned().or_else(|| {
                // `id` resolves to the external id unless the type
                // declares a field of that name.
                (field == "id").then(|| Value::Str(fact.external_id.clone()))
            })
        }
        Condition::TempResult { step_name } => temps.get(step_name).cloned(),
        Condition::BinaryOp {
            operator,
            left,
            right,
        } => {
            let l = eval_value(left, token, temps)?;
            let r = eval_value(right, token, temps)?;
            Value::arith(*operator, &l, &r)
        }
        // A bare variable stands for the bound fact; its scalar rendition
        // is the internal identity.
        Condition::Variable { name } => token
            .get(name)
            .map(|f| Value::Str(f.internal_id().to_string())),
        Condition::Comparison { .. }
        | Condition::And { .. }
        | Condition::Or { .. }
        | Condition::Not { .. } => Some(Value::Bool(eval_bool(cond, token, temps))),
        Condition::Passthrough { .. } => Some(Value::Bool(true)),
    }
}

/// Evaluate a single-variable filter condition directly against a fact,
/// as alpha nodes do. The fact is bound under the condition's sole
/// variable name.
pub fn eval_filter(cond: &Condition, var: &str, fact: &Arc<Fact>) -> bool {
    if cond.is_passthrough() {
        return true;
    }
    let token = Token::of(var, fact.clone());
    eval_bool(cond, &token, &HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ArithOp, CompareOp};

    fn person(age: i64) -> Arc<Fact> {
        Fact::new("Person", "a", vec![("age", Value::from(age))])
    }

    #[test]
    fn comparison_on_missing_field_is_false() {
        let cond = Condition::compare(
            CompareOp::Gt,
            Condition::field("p", "height"),
            Condition::literal(2i64),
        );
        let token = Token::of("p", person(30));
        assert!(!eval_bool(&cond, &token, &HashMap::new()));
    }

    #[test]
    fn division_by_zero_fails_the_comparison() {
        let cond = Condition::compare(
            CompareOp::Eq,
            Condition::binary(
                ArithOp::Div,
                Condition::field("p", "age"),
                Condition::literal(0i64),
            ),
            Condition::literal(0i64),
        );
        let token = Token::of("p", person(30));
        assert!(!eval_bool(&cond, &token, &HashMap::new()));
    }

    #[test]
    fn temp_results_resolve() {
        let cond = Condition::compare(
            CompareOp::Ge,
            Condition::temp("temp_1"),
            Condition::literal(10i64),
        );
        let mut temps = HashMap::new();
        temps.insert("temp_1".to_string(), Value::from(12i64));
        assert!(eval_bool(&cond, &Token::new(), &temps));
    }

    #[test]
    fn filter_against_single_fact() {
        let cond = Condition::compare(
            CompareOp::Gt,
            Condition::field("p", "age"),
            Condition::literal(18i64),
        );
        assert!(eval_filter(&cond, "p", &person(30)));
        assert!(!eval_filter(&cond, "p", &person(10)));
    }
}
