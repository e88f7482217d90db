//! # tsd-rete
//!
//! A forward-chaining RETE discrimination network for the TSD rule
//! language. Facts are typed bags of scalars; rules declare typed
//! variables, a constraint over them, and actions to fire when the
//! constraint is satisfied. The network compiles rules into a shared
//! graph of filter, join, and terminal nodes so that asserting or
//! retracting a single fact touches only the matches it affects.
//!
//! ## Architecture
//!
//! - [`ast`] holds the typed condition tree and rule declarations, built
//!   from the JSON the surface parser emits.
//! - [`network`] owns the node arena and drives propagation; the build
//!   phase compiles rules into alpha chains and join cascades, and
//!   teardown removes them with reference counting.
//! - [`hash`] and [`sharing`] implement structural sharing: filter
//!   alphas by condition fingerprint, joins by hashed signature,
//!   cascade prefixes scoped per rule.
//! - [`decompose`] flattens nested arithmetic into dependency-checked
//!   atomic steps executed at join time.
//! - [`txn`] layers transactional submission with storage visibility
//!   verification on top, reporting through [`metrics`].
//!
//! ## Example
//!
//! ```
//! use tsd_rete::{
//!     ast::{CompareOp, Condition, FieldType, Rule, TypeDefinition},
//!     fact::Fact,
//!     network::Network,
//!     value::Value,
//! };
//!
//! let mut net = Network::default();
//! net.add_type(TypeDefinition::new(
//!     "Person",
//!     vec![("name", FieldType::String), ("age", FieldType::Number)],
//! ))?;
//! net.add_rule(Rule {
//!     id: "adult".into(),
//!     name: "adult".into(),
//!     variables: vec![("p".into(), "Person".into())],
//!     constraint: Condition::compare(
//!         CompareOp::Ge,
//!         Condition::field("p", "age"),
//!         Condition::literal(18i64),
//!     ),
//!     actions: vec![],
//! })?;
//! net.assert_fact(Fact::new(
//!     "Person",
//!     "alice",
//!     vec![("name", Value::from("alice")), ("age", Value::from(30i64))],
//! ))?;
//! assert_eq!(net.matches_for_rule("adult").len(), 1);
//! # Ok::<(), tsd_rete::error::ReteError>(())
//! ```

pub mod ast;
pub(crate) mod build;
pub mod config;
pub mod decompose;
pub mod error;
pub mod eval;
pub mod fact;
pub mod hash;
pub mod ingest;
pub(crate) mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod network;
pub mod node;
pub mod shared;
pub mod sharing;
pub mod storage;
pub mod token;
pub mod txn;
pub mod value;

pub use ast::{ActionCall, ArithOp, CompareOp, Condition, FieldType, Rule, TypeDefinition};
pub use config::ReteConfig;
pub use error::ReteError;
pub use fact::{Fact, InternalId};
pub use network::{ActionExecutor, Activation, Network, ResolvedAction};
pub use shared::SharedNetwork;
pub use token::Token;
pub use value::Value;
