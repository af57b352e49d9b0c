//! Seed management for reproducible simulations.

use braid_core::SiteId;
use fnv::FnvHasher;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::hash::Hasher;

/// Source of simulation seed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeedSource {
    /// From a literal value
    Literal(u64),
    /// From a string (hashed)
    FromString(String),
    /// From a site identifier
    FromSite(SiteId),
    /// Random seed (non-deterministic)
    Random,
}

impl SeedSource {
    /// Generate a seed value
    #[must_use]
    pub fn to_seed(&self) -> u64 {
        match self {
            SeedSource::Literal(seed) => *seed,
            SeedSource::FromString(s) => {
                let mut hasher = FnvHasher::default();
                hasher.write(s.as_bytes());
                hasher.finish()
            }
            SeedSource::FromSite(site) => {
                let mut hasher = FnvHasher::default();
                hasher.write(site.as_bytes());
                hasher.finish()
            }
            SeedSource::Random => rand::random(),
        }
    }
}

/// Simulation seed for reproducibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSeed {
    /// Base seed value
    pub seed: u64,
    /// Source of the seed
    pub source: SeedSource,
    /// Namespace for derived seeds
    pub namespace: String,
}

impl SimSeed {
    /// Create a new simulation seed
    #[must_use]
    pub fn new(source: SeedSource) -> Self {
        let seed = source.to_seed();
        Self {
            seed,
            source,
            namespace: String::new(),
        }
    }

    /// Create a seed from a literal value
    #[must_use]
    pub fn from_literal(seed: u64) -> Self {
        Self::new(SeedSource::Literal(seed))
    }

    /// Create a seed from a string
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::new(SeedSource::FromString(s.into()))
    }

    /// Create a random seed
    #[must_use]
    pub fn random() -> Self {
        Self::new(SeedSource::Random)
    }

    /// Set namespace
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Derive a seed for a specific context
    #[must_use]
    pub fn derive(&self, context: &str) -> Self {
        let mut hasher = FnvHasher::default();
        hasher.write_u64(self.seed);
        hasher.write(self.namespace.as_bytes());
        hasher.write(context.as_bytes());
        let derived_seed = hasher.finish();

        Self {
            seed: derived_seed,
            source: SeedSource::Literal(derived_seed),
            namespace: self.namespace.clone(),
        }
    }

    /// Create RNG from seed
    #[must_use]
    pub fn into_rng(self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }

    /// Create RNG borrowing seed
    #[must_use]
    pub fn rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed)
    }
}

impl Default for SimSeed {
    fn default() -> Self {
        Self::from_literal(42)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_seed_source_literal() {
        assert_eq!(SeedSource::Literal(123).to_seed(), 123);
    }

    #[test]
    fn test_seed_source_from_string_reproducible() {
        let a = SeedSource::FromString("braid".to_string());
        let b = SeedSource::FromString("braid".to_string());
        let c = SeedSource::FromString("other".to_string());
        assert_eq!(a.to_seed(), b.to_seed());
        assert_ne!(a.to_seed(), c.to_seed());
    }

    #[test]
    fn test_seed_source_from_site() {
        let site = SiteId::from_name("site-0");
        assert_eq!(
            SeedSource::FromSite(site).to_seed(),
            SeedSource::FromSite(site).to_seed()
        );
    }

    #[test]
    fn test_sim_seed_derive() {
        let base = SimSeed::from_literal(42);
        let derived1 = base.derive("latency");
        let derived2 = base.derive("faults");

        assert_ne!(derived1.seed, derived2.seed);
        assert_eq!(derived1.seed, base.derive("latency").seed);
        assert_ne!(derived1.seed, base.seed);
    }

    #[test]
    fn test_namespace_changes_derivation() {
        let plain = SimSeed::from_literal(7).derive("x");
        let scoped = SimSeed::from_literal(7).with_namespace("run-2").derive("x");
        assert_ne!(plain.seed, scoped.seed);
        assert_eq!(scoped.namespace, "run-2");
    }

    #[test]
    fn test_sim_seed_rng() {
        let seed = SimSeed::from_literal(42);
        let mut rng1 = seed.rng();
        let mut rng2 = seed.into_rng();

        let val1: u64 = rng1.r#gen();
        let val2: u64 = rng2.r#gen();
        assert_eq!(val1, val2);
    }

    #[test]
    fn test_sim_seed_default() {
        assert_eq!(SimSeed::default().seed, 42);
    }
}
