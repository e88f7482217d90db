//! Typed condition AST and rule/type declarations.
//!
//! The surface parser (an external collaborator) produces a JSON-shaped
//! tree with a `type` discriminator on every node; this module gives that
//! tree a typed spine. `Condition::from_json` validates the incoming shape
//! and is the only place the engine touches raw `serde_json::Value`s for
//! constraints.
//!
//! Alias tags accepted for compatibility with the surface parser:
//! `number`/`string` for `literal`, `binaryOperation` for `binaryOp`,
//! `notConstraint` for `not`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ReteError;
use crate::value::Value;

/// Arithmetic operators allowed inside constraints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithOp {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
}

impl ArithOp {
    pub fn parse(s: &str) -> Option<ArithOp> {
        match s {
            "+" => Some(ArithOp::Add),
            "-" => Some(ArithOp::Sub),
            "*" => Some(ArithOp::Mul),
            "/" => Some(ArithOp::Div),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }

    /// Addition and multiplication commute; subtraction and division do not.
    pub fn is_commutative(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Mul)
    }
}

/// Comparison operators allowed inside constraints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl CompareOp {
    pub fn parse(s: &str) -> Option<CompareOp> {
        match s {
            "==" | "=" => Some(CompareOp::Eq),
            "!=" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Equality tests commute; orderings do not.
    pub fn is_commutative(self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }
}

/// A constraint expression. The tagged serde form mirrors the JSON shape
/// produced by the surface parser, so canonical serialization of a
/// `Condition` is stable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    /// A literal scalar.
    Literal { value: Value },
    /// A rule variable, denoting the fact bound to it.
    Variable { name: String },
    /// `obj.field` access on a bound variable.
    FieldAccess { object: String, field: String },
    /// Reference to the named result of a decomposed arithmetic step.
    TempResult { step_name: String },
    /// An arithmetic operation.
    BinaryOp {
        operator: ArithOp,
        left: Box<Condition>,
        right: Box<Condition>,
    },
    /// A comparison producing a boolean.
    Comparison {
        operator: CompareOp,
        left: Box<Condition>,
        right: Box<Condition>,
    },
    /// Conjunction.
    And { operands: Vec<Condition> },
    /// Disjunction.
    Or { operands: Vec<Condition> },
    /// Negation.
    Not { constraint: Box<Condition> },
    /// Always-true filter used by per-rule passthrough alphas.
    Passthrough {
        #[serde(skip_serializing_if = "Option::is_none")]
        side: Option<String>,
    },
}

impl Condition {
    pub fn literal(v: impl Into<Value>) -> Condition {
        Condition::Literal { value: v.into() }
    }

    pub fn field(object: &str, field: &str) -> Condition {
        Condition::FieldAccess {
            object: object.to_string(),
            field: field.to_string(),
        }
    }

    pub fn variable(name: &str) -> Condition {
        Condition::Variable {
            name: name.to_string(),
        }
    }

    pub fn temp(step_name: &str) -> Condition {
        Condition::TempResult {
            step_name: step_name.to_string(),
        }
    }

    pub fn binary(op: ArithOp, left: Condition, right: Condition) -> Condition {
        Condition::BinaryOp {
            operator: op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn compare(op: CompareOp, left: Condition, right: Condition) -> Condition {
        Condition::Comparison {
            operator: op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn and(operands: Vec<Condition>) -> Condition {
        Condition::And { operands }
    }

    pub fn passthrough() -> Condition {
        Condition::Passthrough { side: None }
    }

    /// True for the passthrough variant regardless of side annotation.
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Condition::Passthrough { .. })
    }

    /// Collect the distinct variable names this condition references, in
    /// first-mention order.
    pub fn variables(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_variables(&mut out);
        out
    }

    fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Condition::Variable { name } => {
                if !out.iter().any(|v| v == name) {
                    out.push(name.clone());
                }
            }
            Condition::FieldAccess { object, .. } => {
                if !out.iter().any(|v| v == object) {
                    out.push(object.clone());
                }
            }
            Condition::BinaryOp { left, right, .. }
            | Condition::Comparison { left, right, .. } => {
                left.collect_variables(out);
                right.collect_variables(out);
            }
            Condition::And { operands } | Condition::Or { operands } => {
                for op in operands {
                    op.collect_variables(out);
                }
            }
            Condition::Not { constraint } => constraint.collect_variables(out),
            Condition::Literal { .. }
            | Condition::TempResult { .. }
            | Condition::Passthrough { .. } => {}
        }
    }

    /// Whether this condition contains a nested arithmetic operation and is
    /// therefore a candidate for decomposition into atomic steps.
    pub fn has_arithmetic(&self) -> bool {
        match self {
            Condition::BinaryOp { .. } => true,
            Condition::Comparison { left, right, .. } => {
                left.has_arithmetic() || right.has_arithmetic()
            }
            Condition::And { operands } | Condition::Or { operands } => {
                operands.iter().any(Condition::has_arithmetic)
            }
            Condition::Not { constraint } => constraint.has_arithmetic(),
            _ => false,
        }
    }

    /// Validate and convert the JSON-shaped AST the surface parser emits.
    pub fn from_json(v: &serde_json::Value) -> Result<Condition, ReteError> {
        let obj = match v {
            serde_json::Value::Object(m) => m,
            // Bare scalars are accepted as literals.
            other => {
                return Value::from_json(other)
                    .map(|value| Condition::Literal { value })
                    .ok_or_else(|| {
                        ReteError::validation(format!("constraint node is not an object: {other}"))
                    });
            }
        };

        // Unwrap constraint wrappers produced by the surface parser.
        if let Some(inner) = obj.get("constraint") {
            let tag = obj.get("type").and_then(|t| t.as_str());
            if tag == Some("constraint") || tag.is_none() {
                return Condition::from_json(inner);
            }
        }

        let tag = obj
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ReteError::validation("constraint node missing 'type' tag"))?;

        match tag {
            "literal" | "number" | "string" | "boolean" => {
                let raw = obj
                    .get("value")
                    .ok_or_else(|| ReteError::validation("literal missing 'value'"))?;
                let value = Value::from_json(raw)
                    .ok_or_else(|| ReteError::validation("literal value is not a scalar"))?;
                Ok(Condition::Literal { value })
            }
            "variable" => {
                let name = require_str(obj, "name", "variable")?;
                Ok(Condition::Variable { name })
            }
            "fieldAccess" => Ok(Condition::FieldAccess {
                object: require_str(obj, "object", "fieldAccess")?,
                field: require_str(obj, "field", "fieldAccess")?,
            }),
            "tempResult" => Ok(Condition::TempResult {
                step_name: require_str(obj, "step_name", "tempResult")?,
            }),
            "binaryOp" | "binaryOperation" => {
                let op_str = require_str(obj, "operator", tag)?;
                let operator = ArithOp::parse(&op_str).ok_or_else(|| {
                    ReteError::validation(format!("unknown arithmetic operator '{op_str}'"))
                })?;
                Ok(Condition::BinaryOp {
                    operator,
                    left: Box::new(require_node(obj, "left", tag)?),
                    right: Box::new(require_node(obj, "right", tag)?),
                })
            }
            "comparison" => {
                let op_str = require_str(obj, "operator", "comparison")?;
                let operator = CompareOp::parse(&op_str).ok_or_else(|| {
                    ReteError::validation(format!("unknown comparison operator '{op_str}'"))
                })?;
                Ok(Condition::Comparison {
                    operator,
                    left: Box::new(require_node(obj, "left", "comparison")?),
                    right: Box::new(require_node(obj, "right", "comparison")?),
                })
            }
            "and" | "or" => {
                let raw = obj
                    .get("operands")
                    .and_then(|o| o.as_array())
                    .ok_or_else(|| ReteError::validation(format!("'{tag}' missing operands[]")))?;
                let operands = raw
                    .iter()
                    .map(Condition::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                if operands.is_empty() {
                    return Err(ReteError::validation(format!("'{tag}' with empty operands")));
                }
                if tag == "and" {
                    Ok(Condition::And { operands })
                } else {
                    Ok(Condition::Or { operands })
                }
            }
            "not" | "notConstraint" => {
                let inner = obj
                    .get("constraint")
                    .ok_or_else(|| ReteError::validation("'not' missing constraint"))?;
                Ok(Condition::Not {
                    constraint: Box::new(Condition::from_json(inner)?),
                })
            }
            "passthrough" => Ok(Condition::Passthrough {
                side: obj.get("side").and_then(|s| s.as_str()).map(String::from),
            }),
            other => Err(ReteError::validation(format!(
                "unknown constraint node type '{other}'"
            ))),
        }
    }
}

fn require_str(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    ctx: &str,
) -> Result<String, ReteError> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| ReteError::validation(format!("'{ctx}' missing string field '{key}'")))
}

fn require_node(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
    ctx: &str,
) -> Result<Condition, ReteError> {
    let raw = obj
        .get(key)
        .ok_or_else(|| ReteError::validation(format!("'{ctx}' missing '{key}'")))?;
    Condition::from_json(raw)
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Literal { value } => write!(f, "{}", value),
            Condition::Variable { name } => write!(f, "{}", name),
            Condition::FieldAccess { object, field } => write!(f, "{}.{}", object, field),
            Condition::TempResult { step_name } => write!(f, "${}", step_name),
            Condition::BinaryOp {
                operator,
                left,
                right,
            } => write!(f, "({} {} {})", left, operator.symbol(), right),
            Condition::Comparison {
                operator,
                left,
                right,
            } => write!(f, "({} {} {})", left, operator.symbol(), right),
            Condition::And { operands } => {
                let parts: Vec<String> = operands.iter().map(|o| o.to_string()).collect();
                write!(f, "({})", parts.join(" && "))
            }
            Condition::Or { operands } => {
                let parts: Vec<String> = operands.iter().map(|o| o.to_string()).collect();
                write!(f, "({})", parts.join(" || "))
            }
            Condition::Not { constraint } => write!(f, "!({})", constraint),
            Condition::Passthrough { .. } => write!(f, "<passthrough>"),
        }
    }
}

// ============================================================================
// TYPE AND RULE DECLARATIONS
// ============================================================================

/// Field types in a type declaration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Bool,
}

impl FieldType {
    pub fn parse(s: &str) -> Option<FieldType> {
        match s {
            "string" => Some(FieldType::String),
            "number" | "int" | "float" => Some(FieldType::Number),
            "bool" | "boolean" => Some(FieldType::Bool),
            _ => None,
        }
    }

    pub fn matches(self, v: &Value) -> bool {
        matches!(
            (self, v),
            (FieldType::String, Value::Str(_))
                | (FieldType::Number, Value::Num(_))
                | (FieldType::Bool, Value::Bool(_))
        )
    }
}

/// A declared fact type: name, ordered fields, optional primary keys.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub fields: Vec<(String, FieldType)>,
    /// Field names whose values synthesize a fact id when none is given.
    pub primary_keys: Vec<String>,
}

impl TypeDefinition {
    pub fn new(name: &str, fields: Vec<(&str, FieldType)>) -> TypeDefinition {
        TypeDefinition {
            name: name.to_string(),
            fields: fields
                .into_iter()
                .map(|(n, t)| (n.to_string(), t))
                .collect(),
            primary_keys: Vec::new(),
        }
    }

    pub fn with_primary_keys(mut self, keys: Vec<&str>) -> TypeDefinition {
        self.primary_keys = keys.into_iter().map(String::from).collect();
        self
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }
}

/// An action call attached to a rule: a job name plus argument expressions
/// evaluated against the firing token's bindings.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionCall {
    pub job: String,
    pub args: Vec<Condition>,
}

/// A rule: ordered typed variables, a constraint, and one or more actions.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub id: String,
    pub name: String,
    /// `(variable, type)` pairs in declaration order. The order fixes the
    /// join cascade.
    pub variables: Vec<(String, String)>,
    pub constraint: Condition,
    pub actions: Vec<ActionCall>,
}

impl Rule {
    pub fn variable_type(&self, var: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|(v, _)| v == var)
            .map(|(_, t)| t.as_str())
    }

    /// `variable -> type` mapping preserving declaration order.
    pub fn var_types(&self) -> IndexMap<String, String> {
        self.variables.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_comparison() {
        let ast = json!({
            "type": "comparison",
            "operator": ">",
            "left": {"type": "fieldAccess", "object": "p", "field": "age"},
            "right": {"type": "number", "value": 18}
        });
        let cond = Condition::from_json(&ast).unwrap();
        assert_eq!(
            cond,
            Condition::compare(
                CompareOp::Gt,
                Condition::field("p", "age"),
                Condition::literal(18i64)
            )
        );
        assert_eq!(cond.variables(), vec!["p".to_string()]);
    }

    #[test]
    fn from_json_rejects_unknown_tag() {
        let ast = json!({"type": "frobnicate"});
        assert!(Condition::from_json(&ast).is_err());
    }

    #[test]
    fn alias_tags_accepted() {
        let ast = json!({
            "type": "binaryOperation",
            "operator": "*",
            "left": {"type": "fieldAccess", "object": "c", "field": "qte"},
            "right": {"type": "number", "value": 23}
        });
        assert!(Condition::from_json(&ast).unwrap().has_arithmetic());
    }
}
