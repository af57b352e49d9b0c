//! Failure injection for testing fault tolerance.
//!
//! Three kinds of failure are simulated:
//! - faulty sites: reachable, but every action executed there fails;
//! - crashed sites: unreachable until recovered;
//! - transient failures: any execution fails with a seeded probability.

use crate::error::{SimError, SimResult};
use crate::seed::SimSeed;
use braid_core::{FaultSet, SiteId};
use rand::Rng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, PoisonError, RwLock};

/// Probabilistic failure model for action executions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureModel {
    /// Probability that an execution fails
    pub probability: f64,
    /// Maximum number of transient failures to inject
    pub max_failures: usize,
}

impl FailureModel {
    /// Create a new failure model
    #[must_use]
    pub fn new(probability: f64) -> Self {
        Self {
            probability,
            max_failures: usize::MAX,
        }
    }

    /// Set max failures
    #[must_use]
    pub fn with_max_failures(mut self, max: usize) -> Self {
        self.max_failures = max;
        self
    }

    /// Check if failure should occur
    #[must_use]
    pub fn should_fail(&self, rng: &mut ChaCha8Rng) -> bool {
        rng.r#gen::<f64>() < self.probability
    }
}

impl Default for FailureModel {
    fn default() -> Self {
        Self::new(0.0)
    }
}

struct Transient {
    model: FailureModel,
    rng: ChaCha8Rng,
    injected: usize,
}

/// Fault injector shared by all views of a fabric
pub struct FaultInjector {
    faulty: RwLock<FaultSet>,
    crashed: RwLock<HashSet<SiteId>>,
    transient: Mutex<Transient>,
}

impl FaultInjector {
    /// Create an injector with no faults
    #[must_use]
    pub fn new(seed: &SimSeed) -> Self {
        Self::with_model(seed, FailureModel::default())
    }

    /// Create with a transient failure model
    #[must_use]
    pub fn with_model(seed: &SimSeed, model: FailureModel) -> Self {
        Self {
            faulty: RwLock::new(FaultSet::new()),
            crashed: RwLock::new(HashSet::new()),
            transient: Mutex::new(Transient {
                model,
                rng: seed.derive("transient-failures").into_rng(),
                injected: 0,
            }),
        }
    }

    /// Replace the set of faulty sites
    pub fn set_faulty(&self, faulty: FaultSet) {
        tracing::debug!(sites = faulty.len(), "faulty sites set");
        *self.faulty.write().unwrap_or_else(PoisonError::into_inner) = faulty;
    }

    /// Check if a site is faulty
    #[must_use]
    pub fn is_faulty(&self, site: &SiteId) -> bool {
        self.faulty
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(site)
    }

    /// Crash a site
    pub fn crash(&self, site: SiteId) {
        tracing::debug!(site = %site, "site crashed");
        self.crashed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(site);
    }

    /// Recover a crashed site
    pub fn recover(&self, site: SiteId) {
        tracing::debug!(site = %site, "site recovered");
        self.crashed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&site);
    }

    /// Check if a site is crashed
    #[must_use]
    pub fn is_crashed(&self, site: &SiteId) -> bool {
        self.crashed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(site)
    }

    /// Draw whether the next execution fails transiently
    #[must_use]
    pub fn maybe_fail(&self) -> bool {
        let mut transient = self.transient.lock().unwrap_or_else(PoisonError::into_inner);
        let Transient { model, rng, injected } = &mut *transient;
        if *injected >= model.max_failures || !model.should_fail(rng) {
            return false;
        }
        *injected += 1;
        true
    }

    /// Number of transient failures injected so far
    #[must_use]
    pub fn transient_count(&self) -> usize {
        self.transient
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .injected
    }

    /// Clear every fault
    pub fn reset(&self) {
        self.set_faulty(FaultSet::new());
        self.crashed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.transient
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .injected = 0;
    }
}

/// Pick `count` distinct faulty sites out of `sites`
///
/// # Errors
///
/// Returns `TooManyFaulty` if `count` exceeds the number of sites
pub fn choose_faulty(sites: &[SiteId], count: usize, seed: &SimSeed) -> SimResult<FaultSet> {
    if count > sites.len() {
        return Err(SimError::TooManyFaulty {
            requested: count,
            available: sites.len(),
        });
    }
    let mut rng = seed.derive("faulty-sites").into_rng();
    Ok(sites.choose_multiple(&mut rng, count).copied().collect())
}
