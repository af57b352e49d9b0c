//! Round-robin placement of work over a list of target sites.
//!
//! The target list is either given up front or produced by a resolver on
//! first use. Resolution result and cursor share one lock, which is only
//! held while reading the list and advancing the cursor.

use crate::error::{ClusterError, ClusterResult};
use braid_core::SiteId;
use std::sync::{Mutex, PoisonError};

type Resolver = Box<dyn Fn() -> Vec<SiteId> + Send + Sync>;

#[derive(Default)]
struct Cursor {
    targets: Option<Vec<SiteId>>,
    next: usize,
}

/// Distributes work round-robin over a set of target sites
pub struct TargetDistribution {
    resolver: Option<Resolver>,
    partitions: usize,
    cursor: Mutex<Cursor>,
}

impl TargetDistribution {
    /// Distribution over an explicit target list
    #[must_use]
    pub fn new(targets: Vec<SiteId>) -> Self {
        Self {
            resolver: None,
            partitions: 0,
            cursor: Mutex::new(Cursor {
                targets: Some(targets),
                next: 0,
            }),
        }
    }

    /// Distribution whose targets are produced by `resolver` on first use
    #[must_use]
    pub fn lazy<F>(resolver: F) -> Self
    where
        F: Fn() -> Vec<SiteId> + Send + Sync + 'static,
    {
        Self {
            resolver: Some(Box::new(resolver)),
            partitions: 0,
            cursor: Mutex::new(Cursor::default()),
        }
    }

    /// Set the number of partitions; `0` means one per target
    #[must_use]
    pub fn with_partitions(mut self, partitions: usize) -> Self {
        self.partitions = partitions;
        self
    }

    fn with_targets<R>(&self, f: impl FnOnce(&[SiteId], &mut usize) -> R) -> ClusterResult<R> {
        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let Cursor { targets, next } = &mut *cursor;
        let targets =
            targets.get_or_insert_with(|| self.resolver.as_ref().map(|r| r()).unwrap_or_default());
        if targets.is_empty() {
            return Err(ClusterError::invalid_argument(
                "target distribution",
                "no targets",
            ));
        }
        Ok(f(targets, next))
    }

    /// Resolved target list
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if there are no targets
    pub fn targets(&self) -> ClusterResult<Vec<SiteId>> {
        self.with_targets(|targets, _| targets.to_vec())
    }

    /// Target for the next unit of work
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if there are no targets
    pub fn next_target(&self) -> ClusterResult<SiteId> {
        self.with_targets(|targets, next| {
            let target = targets[*next % targets.len()];
            *next = next.wrapping_add(1);
            target
        })
    }

    /// Target list starting at the next cursor position
    ///
    /// Advances the cursor by one, so consecutive calls hand out rotated
    /// pools that each start on a different site.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if there are no targets
    pub fn rotation(&self) -> ClusterResult<Vec<SiteId>> {
        self.with_targets(|targets, next| {
            let start = *next % targets.len();
            *next = next.wrapping_add(1);
            let mut rotated = targets.to_vec();
            rotated.rotate_left(start);
            rotated
        })
    }

    /// Number of partitions, never less than one
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if there are no targets
    pub fn num_partitions(&self) -> ClusterResult<usize> {
        let partitions = self.partitions;
        self.with_targets(|targets, _| {
            let parts = if partitions == 0 {
                targets.len()
            } else {
                partitions
            };
            parts.max(1)
        })
    }

    /// Number of `items` placed on `target`
    ///
    /// Items are split evenly and the last target takes the remainder. With
    /// fewer items than targets the first targets get one item each. A site
    /// outside the list gets nothing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if there are no targets
    pub fn num_items(&self, items: usize, target: SiteId) -> ClusterResult<usize> {
        self.with_targets(|targets, _| {
            let Some(position) = targets.iter().position(|t| *t == target) else {
                return 0;
            };
            let sites = targets.len();
            if items < sites {
                return usize::from(position < items);
            }
            let share = items / sites;
            if position == sites - 1 {
                share + items % sites
            } else {
                share
            }
        })
    }
}

impl std::fmt::Debug for TargetDistribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetDistribution")
            .field("lazy", &self.resolver.is_some())
            .field("partitions", &self.partitions)
            .finish_non_exhaustive()
    }
}
