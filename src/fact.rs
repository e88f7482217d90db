//! Facts and their internal identities.
//!
//! A fact is an immutable bag of scalar fields tagged with a declared type
//! and an external id. Internally the engine keys everything by
//! `Type~id`, which disambiguates equal external ids across types. Facts
//! are shared by `Arc` throughout the network; memories hold clones of the
//! handle, never of the data.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::ast::TypeDefinition;
use crate::error::ReteError;
use crate::value::Value;

/// Separator between type name and external id in internal identities.
pub const ID_SEPARATOR: &str = "~";

/// Internal fact identity, `Type~id`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalId(pub String);

impl InternalId {
    pub fn new(type_name: &str, external_id: &str) -> InternalId {
        InternalId(format!("{}{}{}", type_name, ID_SEPARATOR, external_id))
    }

    pub fn type_name(&self) -> &str {
        self.0.split(ID_SEPARATOR).next().unwrap_or(&self.0)
    }

    pub fn external_id(&self) -> &str {
        match self.0.split_once(ID_SEPARATOR) {
            Some((_, id)) => id,
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InternalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable fact instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "id")]
    pub external_id: String,
    pub fields: IndexMap<String, Value>,
}

impl Fact {
    pub fn new(type_name: &str, external_id: &str, fields: Vec<(&str, Value)>) -> Arc<Fact> {
        Arc::new(Fact {
            type_name: type_name.to_string(),
            external_id: external_id.to_string(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        })
    }

    pub fn internal_id(&self) -> InternalId {
        InternalId::new(&self.type_name, &self.external_id)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Check the fact against its declared type: every declared field must
    /// be present with a matching kind, and no extra fields allowed.
    pub fn validate(&self, def: &TypeDefinition) -> Result<(), ReteError> {
        for (name, ftype) in &def.fields {
            match self.fields.get(name) {
                None => {
                    return Err(ReteError::validation(format!(
                        "fact '{}' missing field '{}'",
                        self.internal_id(),
                        name
                    )));
                }
                Some(v) if !ftype.matches(v) => {
                    return Err(ReteError::validation(format!(
                        "fact '{}' field '{}' has wrong kind",
                        self.internal_id(),
                        name
                    )));
                }
                Some(_) => {}
            }
        }
        for name in self.fields.keys() {
            if def.field_type(name).is_none() {
                return Err(ReteError::validation(format!(
                    "fact '{}' has undeclared field '{}'",
                    self.internal_id(),
                    name
                )));
            }
        }
        Ok(())
    }

    /// Synthesize an external id: the type's primary-key values rendered
    /// canonically and joined with `_`. A type without primary keys, or a
    /// fact missing one of them, gets a content hash over its fields in
    /// sorted name order instead, so equal content always maps to the
    /// same identity.
    pub fn synthesize_id(def: &TypeDefinition, fields: &IndexMap<String, Value>) -> String {
        if !def.primary_keys.is_empty() {
            let values: Option<Vec<String>> = def
                .primary_keys
                .iter()
                .map(|key| fields.get(key).map(Value::canonical))
                .collect();
            if let Some(parts) = values {
                return parts.join("_");
            }
        }
        let mut names: Vec<&String> = fields.keys().collect();
        names.sort();
        let mut hasher = Sha256::new();
        for name in names {
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            if let Some(v) = fields.get(name) {
                hasher.update(v.canonical().as_bytes());
            }
            hasher.update(b"_");
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(16);
        for byte in &digest[..8] {
            hex.push_str(&format!("{:02x}", byte));
        }
        hex
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.internal_id())?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}
