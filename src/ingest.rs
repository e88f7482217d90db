//! Program ingestion.
//!
//! A program document is the JSON the surface parser emits for a whole
//! source file: type declarations, rules, facts, and management commands,
//! in order. Applying a program replays it against a network. The only
//! command currently understood is `remove rule <id>`; removing a rule
//! the network does not have logs a warning and moves on, so a program
//! can be re-applied after a partial failure.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value as Json;
use tracing::{info, warn};

use crate::ast::{ActionCall, Condition, FieldType, Rule, TypeDefinition};
use crate::error::ReteError;
use crate::fact::Fact;
use crate::network::Network;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum ProgramItem {
    Type(TypeDefinition),
    Rule(Rule),
    Fact {
        type_name: String,
        external_id: Option<String>,
        fields: IndexMap<String, Value>,
    },
    RemoveRule(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Program {
    pub items: Vec<ProgramItem>,
}

impl Program {
    pub fn from_json(source: &str) -> Result<Program, ReteError> {
        let doc: Json = serde_json::from_str(source)
            .map_err(|e| ReteError::validation(format!("malformed program json: {e}")))?;
        let mut items = Vec::new();
        for raw in array(&doc, "types")? {
            items.push(ProgramItem::Type(parse_type(raw)?));
        }
        for raw in array(&doc, "rules")? {
            items.push(ProgramItem::Rule(parse_rule(raw)?));
        }
        for raw in array(&doc, "facts")? {
            items.push(parse_fact(raw)?);
        }
        for raw in array(&doc, "commands")? {
            items.push(parse_command(raw)?);
        }
        Ok(Program { items })
    }

    pub fn apply(&self, net: &mut Network) -> Result<(), ReteError> {
        for item in &self.items {
            match item {
                ProgramItem::Type(def) => net.add_type(def.clone())?,
                ProgramItem::Rule(rule) => net.add_rule(rule.clone())?,
                ProgramItem::Fact {
                    type_name,
                    external_id,
                    fields,
                } => {
                    let outcome = match external_id {
                        Some(id) => net.assert_fact(Arc::new(Fact {
                            type_name: type_name.clone(),
                            external_id: id.clone(),
                            fields: fields.clone(),
                        })),
                        None => net.assert_keyed(type_name, fields.clone()).map(|_| ()),
                    };
                    match outcome {
                        Ok(()) => {}
                        // Duplicates reject the one fact, not the program.
                        Err(ReteError::DuplicateFact(id)) => {
                            warn!(fact = %id, "duplicate fact skipped");
                        }
                        Err(e) => return Err(e),
                    }
                }
                ProgramItem::RemoveRule(id) => match net.remove_rule(id) {
                    Ok(()) => {}
                    Err(ReteError::UnknownRule(_)) => {
                        warn!(rule_id = %id, "remove command targets unknown rule");
                    }
                    Err(e) => return Err(e),
                },
            }
        }
        info!(items = self.items.len(), "program applied");
        Ok(())
    }
}

fn array<'a>(doc: &'a Json, key: &str) -> Result<Vec<&'a Json>, ReteError> {
    match doc.get(key) {
        None => Ok(Vec::new()),
        Some(Json::Array(items)) => Ok(items.iter().collect()),
        Some(_) => Err(ReteError::validation(format!("'{key}' must be an array"))),
    }
}

fn str_field(obj: &Json, key: &str, ctx: &str) -> Result<String, ReteError> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| ReteError::validation(format!("{ctx} missing string field '{key}'")))
}

fn parse_type(raw: &Json) -> Result<TypeDefinition, ReteError> {
    let name = str_field(raw, "name", "type declaration")?;
    let mut fields = Vec::new();
    for f in array(raw, "fields")? {
        let fname = str_field(f, "name", "field declaration")?;
        let ftype_str = str_field(f, "type", "field declaration")?;
        let ftype = FieldType::parse(&ftype_str).ok_or_else(|| {
            ReteError::validation(format!("unknown field type '{ftype_str}'"))
        })?;
        fields.push((fname, ftype));
    }
    let primary_keys = match raw.get("primaryKeys") {
        None => Vec::new(),
        Some(Json::Array(keys)) => keys
            .iter()
            .map(|k| {
                k.as_str().map(String::from).ok_or_else(|| {
                    ReteError::validation("primaryKeys entries must be strings")
                })
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ReteError::validation("'primaryKeys' must be an array"));
        }
    };
    Ok(TypeDefinition {
        name,
        fields,
        primary_keys,
    })
}

fn parse_rule(raw: &Json) -> Result<Rule, ReteError> {
    let id = str_field(raw, "id", "rule")?;
    let name = raw
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or(&id)
        .to_string();
    let mut variables = Vec::new();
    for v in array(raw, "variables")? {
        variables.push((
            str_field(v, "name", "rule variable")?,
            str_field(v, "type", "rule variable")?,
        ));
    }
    let when = raw
        .get("when")
        .ok_or_else(|| ReteError::validation(format!("rule '{id}' missing 'when'")))?;
    let constraint = Condition::from_json(when)?;
    let mut actions = Vec::new();
    for a in array(raw, "then")? {
        let job = str_field(a, "job", "action")?;
        let mut args = Vec::new();
        for arg in array(a, "args")? {
            args.push(Condition::from_json(arg)?);
        }
        actions.push(ActionCall { job, args });
    }
    Ok(Rule {
        id,
        name,
        variables,
        constraint,
        actions,
    })
}

fn parse_fact(raw: &Json) -> Result<ProgramItem, ReteError> {
    let type_name = str_field(raw, "type", "fact")?;
    let external_id = raw.get("id").and_then(|v| v.as_str()).map(String::from);
    let mut fields = IndexMap::new();
    match raw.get("fields") {
        Some(Json::Object(map)) => {
            for (k, v) in map {
                let value = Value::from_json(v).ok_or_else(|| {
                    ReteError::validation(format!("fact field '{k}' is not a scalar"))
                })?;
                fields.insert(k.clone(), value);
            }
        }
        _ => return Err(ReteError::validation("fact missing 'fields' object")),
    }
    Ok(ProgramItem::Fact {
        type_name,
        external_id,
        fields,
    })
}

fn parse_command(raw: &Json) -> Result<ProgramItem, ReteError> {
    let text = raw
        .as_str()
        .ok_or_else(|| ReteError::validation("commands must be strings"))?;
    match text.strip_prefix("remove rule ") {
        Some(id) if !id.trim().is_empty() => Ok(ProgramItem::RemoveRule(id.trim().to_string())),
        _ => Err(ReteError::validation(format!("unknown command '{text}'"))),
    }
}
