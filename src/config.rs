//! Engine configuration.

use std::time::Duration;

/// Tunables for network construction and transaction coordination.
#[derive(Clone, Debug, PartialEq)]
pub struct ReteConfig {
    /// Total budget for verifying a transaction's facts became visible.
    pub submission_timeout: Duration,
    /// Base delay between verification polls; doubles per attempt up to
    /// [`ReteConfig::verify_retry_max_delay`].
    pub verify_retry_delay: Duration,
    pub verify_retry_max_delay: Duration,
    pub max_verify_retries: u32,
    /// Run the verification loop at commit time.
    pub verify_on_commit: bool,
    /// Upper bound on memoized join signature hashes.
    pub beta_hash_cache_max_size: usize,
    /// Canonically order commutative operands before hashing.
    pub normalize_order: bool,
    /// Also sort conjunction/disjunction operand lists before hashing.
    pub enable_advanced_normalization: bool,
    /// Reuse shared join prefixes within a rule's cascade.
    pub prefix_sharing_enabled: bool,
}

impl Default for ReteConfig {
    fn default() -> ReteConfig {
        ReteConfig {
            submission_timeout: Duration::from_secs(30),
            verify_retry_delay: Duration::from_millis(10),
            verify_retry_max_delay: Duration::from_millis(500),
            max_verify_retries: 10,
            verify_on_commit: true,
            beta_hash_cache_max_size: 10_000,
            normalize_order: true,
            enable_advanced_normalization: false,
            prefix_sharing_enabled: true,
        }
    }
}

impl ReteConfig {
    /// Larger hash cache for deployments with many structurally similar
    /// rules.
    pub fn high_performance() -> ReteConfig {
        ReteConfig {
            beta_hash_cache_max_size: 100_000,
            ..ReteConfig::default()
        }
    }

    /// Small hash cache. Sharing stays on; it reduces memory rather than
    /// costing it.
    pub fn low_memory() -> ReteConfig {
        ReteConfig {
            beta_hash_cache_max_size: 1_000,
            ..ReteConfig::default()
        }
    }

    pub(crate) fn hash_options(&self) -> crate::hash::HashOptions {
        crate::hash::HashOptions {
            normalize_order: self.normalize_order,
            advanced_normalization: self.enable_advanced_normalization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_only_in_cache_size() {
        let d = ReteConfig::default();
        let hp = ReteConfig::high_performance();
        let lm = ReteConfig::low_memory();
        assert_eq!(d.beta_hash_cache_max_size, 10_000);
        assert_eq!(hp.beta_hash_cache_max_size, 100_000);
        assert_eq!(lm.beta_hash_cache_max_size, 1_000);
        assert!(lm.prefix_sharing_enabled);
    }
}
