//! Join node signatures and structural hashing.
//!
//! Two joins are shareable when their signatures hash equal: same
//! condition shape, same variable sets and types, same cascade level. The
//! signature is canonicalized before hashing so that incidental
//! differences (temp step numbering, operand order of commutative
//! operators) do not defeat sharing, then run through SHA-256. Node ids
//! take the first sixteen hex digits: `beta_<16hex>`.
//!
//! Hashing is pure: the same signature always yields the same id, so
//! results are memoized in a bounded cache.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::ast::Condition;

/// Knobs controlling canonicalization, taken from the engine config.
#[derive(Clone, Copy, Debug)]
pub struct HashOptions {
    /// Order operands of commutative operators canonically.
    pub normalize_order: bool,
    /// Additionally sort conjunction and disjunction operand lists.
    pub advanced_normalization: bool,
}

impl Default for HashOptions {
    fn default() -> HashOptions {
        HashOptions {
            normalize_order: true,
            advanced_normalization: false,
        }
    }
}

/// Everything that determines whether two join nodes compute the same
/// thing at the same position in a cascade.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinSignature {
    pub condition: Condition,
    pub left_vars: Vec<String>,
    pub right_vars: Vec<String>,
    pub all_vars: Vec<String>,
    pub var_types: IndexMap<String, String>,
    pub cascade_level: usize,
}

impl JoinSignature {
    /// Render the signature to a canonical string. Variable lists are
    /// sorted, temp step names are renumbered by first appearance, and
    /// commutative operands are ordered per `opts`.
    pub fn canonical(&self, opts: &HashOptions) -> String {
        let mut temp_map = IndexMap::new();
        let cond = canonical_condition(&self.condition, opts, &mut temp_map);

        let mut left = self.left_vars.clone();
        let mut right = self.right_vars.clone();
        let mut all = self.all_vars.clone();
        left.sort();
        right.sort();
        all.sort();

        let mut types: Vec<String> = self
            .var_types
            .iter()
            .map(|(v, t)| format!("{}:{}", v, t))
            .collect();
        types.sort();

        format!(
            "cond={};left={};right={};all={};types={};level={}",
            cond,
            left.join(","),
            right.join(","),
            all.join(","),
            types.join(","),
            self.cascade_level
        )
    }

    /// SHA-256 of the canonical form, truncated to a node id.
    pub fn node_id(&self, opts: &HashOptions) -> String {
        let canonical = self.canonical(opts);
        let digest = Sha256::digest(canonical.as_bytes());
        let mut hex = String::with_capacity(16);
        for byte in digest.iter().take(8) {
            hex.push_str(&format!("{:02x}", byte));
        }
        format!("beta_{}", hex)
    }
}

/// Canonical fingerprint of a lone condition, used to key shared filter
/// alpha nodes under their parent.
pub fn condition_fingerprint(cond: &Condition, opts: &HashOptions) -> String {
    let mut temp_map = IndexMap::new();
    let canonical = canonical_condition(cond, opts, &mut temp_map);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Render a condition canonically. Temp step references are replaced by
/// `t<n>` in first-appearance order, which keys equality on dependency
/// structure rather than on the numbering any particular decomposition
/// run produced.
fn canonical_condition(
    cond: &Condition,
    opts: &HashOptions,
    temp_map: &mut IndexMap<String, usize>,
) -> String {
    match cond {
        Condition::Literal { value } => format!("lit({})", value.canonical()),
        Condition::Variable { name } => format!("var({})", name),
        Condition::FieldAccess { object, field } => format!("field({}.{})", object, field),
        Condition::TempResult { step_name } => {
            let next = temp_map.len() + 1;
            let n = *temp_map.entry(step_name.clone()).or_insert(next);
            format!("temp(t{})", n)
        }
        Condition::BinaryOp {
            operator,
            left,
            right,
        } => {
            let mut l = canonical_condition(left, opts, temp_map);
            let mut r = canonical_condition(right, opts, temp_map);
            if opts.normalize_order && operator.is_commutative() && r < l {
                std::mem::swap(&mut l, &mut r);
            }
            format!("op({},{},{})", operator.symbol(), l, r)
        }
        Condition::Comparison {
            operator,
            left,
            right,
        } => {
            let mut l = canonical_condition(left, opts, temp_map);
            let mut r = canonical_condition(right, opts, temp_map);
            if opts.normalize_order && operator.is_commutative() && r < l {
                std::mem::swap(&mut l, &mut r);
            }
            format!("cmp({},{},{})", operator.symbol(), l, r)
        }
        Condition::And { operands } => {
            let mut parts: Vec<String> = operands
                .iter()
                .map(|c| canonical_condition(c, opts, temp_map))
                .collect();
            if opts.advanced_normalization {
                parts.sort();
            }
            format!("and({})", parts.join(","))
        }
        Condition::Or { operands } => {
            let mut parts: Vec<String> = operands
                .iter()
                .map(|c| canonical_condition(c, opts, temp_map))
                .collect();
            if opts.advanced_normalization {
                parts.sort();
            }
            format!("or({})", parts.join(","))
        }
        Condition::Not { constraint } => {
            format!("not({})", canonical_condition(constraint, opts, temp_map))
        }
        Condition::Passthrough { .. } => "pass".to_string(),
    }
}

/// Bounded memo of canonical-form strings to node ids, evicting least
/// recently used entries. Hit counters feed the sharing statistics.
#[derive(Debug)]
pub struct HashCache {
    entries: IndexMap<String, String>,
    max_size: usize,
    pub hits: u64,
    pub misses: u64,
}

impl HashCache {
    pub fn new(max_size: usize) -> HashCache {
        HashCache {
            entries: IndexMap::new(),
            max_size: max_size.max(1),
            hits: 0,
            misses: 0,
        }
    }

    pub fn node_id(&mut self, sig: &JoinSignature, opts: &HashOptions) -> String {
        let canonical = sig.canonical(opts);
        if let Some(id) = self.entries.shift_remove(&canonical) {
            self.hits += 1;
            self.entries.insert(canonical, id.clone());
            return id;
        }
        self.misses += 1;
        let id = sig.node_id(opts);
        if self.entries.len() >= self.max_size {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(canonical, id.clone());
        id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }
}
