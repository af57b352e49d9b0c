//! Sequential retry across a pool of sites.
//!
//! Replay tries the sites in order and stops at the first attempt whose
//! result is accepted. The next attempt is issued only once the previous
//! one settled, so at most one invocation is in flight per replay.

use crate::action::Action;
use crate::error::{ClusterError, ClusterResult};
use crate::future::ResultFuture;
use crate::registry::ActionRegistry;
use crate::substrate::{ActionClient, Substrate};
use braid_core::SiteId;
use std::sync::Arc;

/// Replay executor
#[derive(Clone)]
pub struct Replay {
    registry: Arc<ActionRegistry>,
    client: ActionClient,
}

impl Replay {
    /// Create a replay executor issuing calls through `substrate`
    #[must_use]
    pub fn new(registry: Arc<ActionRegistry>, substrate: Arc<dyn Substrate>) -> Self {
        Self {
            registry,
            client: ActionClient::new(substrate),
        }
    }

    /// Run `A` on `sites` in order until one attempt succeeds
    ///
    /// Fails with `Exhausted` once every site was tried.
    pub fn replay<A: Action>(&self, sites: &[SiteId], args: &A::Args) -> ResultFuture<A::Output> {
        self.run::<A, _>(sites, args, |_: &A::Output| true)
    }

    /// Run `A` on `sites` in order until one attempt succeeds and its
    /// result satisfies `validate`
    pub fn replay_validate<A, V>(
        &self,
        sites: &[SiteId],
        validate: V,
        args: &A::Args,
    ) -> ResultFuture<A::Output>
    where
        A: Action,
        V: Fn(&A::Output) -> bool + Send + 'static,
    {
        self.run::<A, V>(sites, args, validate)
    }

    fn run<A, V>(&self, sites: &[SiteId], args: &A::Args, validate: V) -> ResultFuture<A::Output>
    where
        A: Action,
        V: Fn(&A::Output) -> bool + Send + 'static,
    {
        if let Err(err) = self.registry.ensure_registered::<A>() {
            return ResultFuture::failed(err);
        }
        let sites = sites.to_vec();
        let args = args.clone();
        let client = self.client.clone();
        ResultFuture::spawn(async move { attempt_all::<A, V>(&client, &sites, &args, validate).await })
    }
}

async fn attempt_all<A, V>(
    client: &ActionClient,
    sites: &[SiteId],
    args: &A::Args,
    validate: V,
) -> ClusterResult<A::Output>
where
    A: Action,
    V: Fn(&A::Output) -> bool,
{
    let mut last_error = None;
    for (attempt, &site) in sites.iter().enumerate() {
        tracing::debug!(site = %site, attempt = attempt + 1, pool = sites.len(), "replay attempt");
        match client.invoke::<A>(site, args).await {
            Ok(output) if validate(&output) => return Ok(output),
            Ok(_) => {
                tracing::debug!(site = %site, "replay result rejected");
                last_error = Some(format!("result from {site} rejected by validator"));
            }
            Err(err) => {
                tracing::debug!(site = %site, error = %err, "replay attempt failed");
                last_error = Some(err.to_string());
            }
        }
    }

    tracing::warn!(attempts = sites.len(), action = A::NAME, "replay exhausted");
    Err(ClusterError::Exhausted {
        attempts: sites.len(),
        last_error,
    })
}
