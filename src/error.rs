//! Error types shared across the engine.
//!
//! The engine reports failures through one enum rather than per-module
//! error types; callers that only care about success can `?` all the way
//! up, and the few callers that branch (transaction retry, network build)
//! match on the variant.

use std::fmt;

/// Engine-wide error type.
#[derive(Debug, Clone, PartialEq)]
pub enum ReteError {
    /// Malformed input: bad constraint AST, undeclared variable, unknown
    /// operator, schema violation.
    Validation(String),
    /// Reference to a type that was never declared.
    UnknownType(String),
    /// Reference to a rule id not present in the network.
    UnknownRule(String),
    /// A rule id was added twice.
    DuplicateRule(String),
    /// A fact with the same internal id is already in working memory.
    DuplicateFact(String),
    /// Arithmetic decomposition found a dependency cycle among steps.
    CircularDependency { steps: Vec<String> },
    /// Network construction failed.
    Build(String),
    /// Fact storage returned an inconsistent answer.
    Storage(String),
    /// A transaction fact never became visible within its deadline.
    VerifyTimeout { fact_id: String, attempts: u32 },
    /// A transaction was aborted and rolled back.
    TransactionAborted(String),
}

impl ReteError {
    pub fn validation(msg: impl Into<String>) -> ReteError {
        ReteError::Validation(msg.into())
    }

    pub fn build(msg: impl Into<String>) -> ReteError {
        ReteError::Build(msg.into())
    }
}

impl fmt::Display for ReteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReteError::Validation(msg) => write!(f, "validation error: {}", msg),
            ReteError::UnknownType(name) => write!(f, "unknown type '{}'", name),
            ReteError::UnknownRule(id) => write!(f, "unknown rule '{}'", id),
            ReteError::DuplicateRule(id) => write!(f, "rule '{}' already exists", id),
            ReteError::DuplicateFact(id) => write!(f, "fact '{}' already exists", id),
            ReteError::CircularDependency { steps } => {
                write!(f, "circular dependency among steps: {}", steps.join(" -> "))
            }
            ReteError::Build(msg) => write!(f, "network build error: {}", msg),
            ReteError::Storage(msg) => write!(f, "storage error: {}", msg),
            ReteError::VerifyTimeout { fact_id, attempts } => write!(
                f,
                "fact '{}' not visible after {} verification attempts",
                fact_id, attempts
            ),
            ReteError::TransactionAborted(reason) => {
                write!(f, "transaction aborted: {}", reason)
            }
        }
    }
}

impl std::error::Error for ReteError {}
