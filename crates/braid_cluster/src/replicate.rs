//! Concurrent redundant execution.
//!
//! Replicate runs the same action on every given site at once. The race
//! variants settle with the first qualifying result; the vote variants wait
//! for every replica and reduce the qualifying results with a vote
//! function. A replica qualifies if it succeeded and, where a validator is
//! given, its result passed validation. Losing replicas are not cancelled.

use crate::action::Action;
use crate::error::{ClusterError, ClusterResult};
use crate::future::ResultFuture;
use crate::registry::ActionRegistry;
use crate::substrate::{ActionClient, Substrate};
use braid_core::SiteId;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;

/// Settled result of one replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaOutcome<T> {
    /// Site that ran the replica
    pub site: SiteId,
    /// What it produced
    pub outcome: ClusterResult<T>,
}

type Replicas<T> = Vec<(SiteId, ResultFuture<T>)>;

#[derive(Debug, Default)]
struct Tally {
    failed: usize,
    rejected: usize,
}

impl Tally {
    fn record<T>(&mut self, site: SiteId, outcome: ClusterResult<T>, validate: impl Fn(&T) -> bool) -> Option<T> {
        match outcome {
            Ok(value) if validate(&value) => Some(value),
            Ok(_) => {
                tracing::warn!(site = %site, "replica result rejected");
                self.rejected += 1;
                None
            }
            Err(err) => {
                tracing::warn!(site = %site, error = %err, "replica failed");
                self.failed += 1;
                None
            }
        }
    }

    fn into_error(self, replicas: usize) -> ClusterError {
        ClusterError::AllReplicasFailed {
            replicas,
            failed: self.failed,
            rejected: self.rejected,
        }
    }
}

/// Replicate executor
#[derive(Clone)]
pub struct Replicate {
    registry: Arc<ActionRegistry>,
    client: ActionClient,
}

impl Replicate {
    /// Create a replicate executor issuing calls through `substrate`
    #[must_use]
    pub fn new(registry: Arc<ActionRegistry>, substrate: Arc<dyn Substrate>) -> Self {
        Self {
            registry,
            client: ActionClient::new(substrate),
        }
    }

    /// Run `A` on every site; the first success wins
    pub fn replicate<A: Action>(&self, sites: &[SiteId], args: &A::Args) -> ResultFuture<A::Output> {
        self.replicate_validate::<A, _>(sites, |_: &A::Output| true, args)
    }

    /// Run `A` on every site; the first validated success wins
    pub fn replicate_validate<A, V>(
        &self,
        sites: &[SiteId],
        validate: V,
        args: &A::Args,
    ) -> ResultFuture<A::Output>
    where
        A: Action,
        V: Fn(&A::Output) -> bool + Send + 'static,
    {
        match self.launch::<A>(sites, args) {
            Ok(replicas) => ResultFuture::spawn(race(replicas, validate)),
            Err(err) => ResultFuture::failed(err),
        }
    }

    /// Run `A` on every site and vote on the successful results
    ///
    /// `vote` sees the successes in site order and returns `None` when
    /// they do not agree, which fails the operation with `NoConsensus`.
    pub fn replicate_vote<A, F>(&self, sites: &[SiteId], vote: F, args: &A::Args) -> ResultFuture<A::Output>
    where
        A: Action,
        F: FnOnce(Vec<A::Output>) -> Option<A::Output> + Send + 'static,
    {
        self.replicate_vote_validate::<A, _, F>(sites, |_: &A::Output| true, vote, args)
    }

    /// Run `A` on every site and vote on the validated successes
    pub fn replicate_vote_validate<A, V, F>(
        &self,
        sites: &[SiteId],
        validate: V,
        vote: F,
        args: &A::Args,
    ) -> ResultFuture<A::Output>
    where
        A: Action,
        V: Fn(&A::Output) -> bool + Send + 'static,
        F: FnOnce(Vec<A::Output>) -> Option<A::Output> + Send + 'static,
    {
        match self.launch::<A>(sites, args) {
            Ok(replicas) => ResultFuture::spawn(elect(replicas, validate, vote)),
            Err(err) => ResultFuture::failed(err),
        }
    }

    /// Run `A` on every site and report every outcome in site order
    pub fn replicate_all<A: Action>(
        &self,
        sites: &[SiteId],
        args: &A::Args,
    ) -> ResultFuture<Vec<ReplicaOutcome<A::Output>>> {
        match self.launch::<A>(sites, args) {
            Ok(replicas) => ResultFuture::spawn(async move { Ok(settle_all(replicas).await) }),
            Err(err) => ResultFuture::failed(err),
        }
    }

    fn launch<A: Action>(&self, sites: &[SiteId], args: &A::Args) -> ClusterResult<Replicas<A::Output>> {
        if sites.is_empty() {
            return Err(ClusterError::invalid_argument(
                "replicate",
                "empty list of sites",
            ));
        }
        self.registry.ensure_registered::<A>()?;
        tracing::debug!(action = A::NAME, replicas = sites.len(), "launching replicas");
        Ok(sites
            .iter()
            .map(|&site| (site, self.client.invoke::<A>(site, args)))
            .collect())
    }
}

async fn settle_all<T: Send + 'static>(replicas: Replicas<T>) -> Vec<ReplicaOutcome<T>> {
    join_all(
        replicas
            .into_iter()
            .map(|(site, handle)| async move {
                ReplicaOutcome {
                    site,
                    outcome: handle.await,
                }
            }),
    )
    .await
}

async fn race<T, V>(replicas: Replicas<T>, validate: V) -> ClusterResult<T>
where
    T: Send + 'static,
    V: Fn(&T) -> bool,
{
    let total = replicas.len();
    let mut pending: FuturesUnordered<_> = replicas
        .into_iter()
        .map(|(site, handle)| async move { (site, handle.await) })
        .collect();

    let mut tally = Tally::default();
    while let Some((site, outcome)) = pending.next().await {
        if let Some(value) = tally.record(site, outcome, &validate) {
            tracing::debug!(site = %site, "replica won the race");
            return Ok(value);
        }
    }
    Err(tally.into_error(total))
}

async fn elect<T, V, F>(replicas: Replicas<T>, validate: V, vote: F) -> ClusterResult<T>
where
    T: Send + 'static,
    V: Fn(&T) -> bool,
    F: FnOnce(Vec<T>) -> Option<T>,
{
    let total = replicas.len();
    let mut tally = Tally::default();
    let qualified: Vec<T> = settle_all(replicas)
        .await
        .into_iter()
        .filter_map(|r| tally.record(r.site, r.outcome, &validate))
        .collect();

    if qualified.is_empty() {
        return Err(tally.into_error(total));
    }
    let candidates = qualified.len();
    tracing::debug!(candidates, replicas = total, "voting on replica results");
    vote(qualified).ok_or(ClusterError::NoConsensus { candidates })
}
