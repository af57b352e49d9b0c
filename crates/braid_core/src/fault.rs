//! Sets of sites deliberately treated as failing.
//!
//! A `FaultSet` is owned by the caller that builds it (a test or a
//! fault-injection harness) and is read-only afterwards. It is serializable
//! so it can travel as part of an action's arguments.

use crate::id::SiteId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Read-only set of faulty sites
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultSet {
    sites: BTreeSet<SiteId>,
}

impl FaultSet {
    /// Create an empty fault set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a site is marked faulty
    #[must_use]
    pub fn contains(&self, site: &SiteId) -> bool {
        self.sites.contains(site)
    }

    /// Number of faulty sites
    #[must_use]
    pub fn len(&self) -> usize {
        self.sites.len()
    }

    /// Check if no site is faulty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// Iterate the faulty sites
    pub fn iter(&self) -> impl Iterator<Item = &SiteId> {
        self.sites.iter()
    }
}

impl FromIterator<SiteId> for FaultSet {
    fn from_iter<I: IntoIterator<Item = SiteId>>(iter: I) -> Self {
        Self {
            sites: iter.into_iter().collect(),
        }
    }
}
