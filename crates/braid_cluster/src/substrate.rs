//! The remote-invocation substrate consumed by the dispatcher and executors.
//!
//! The substrate delivers invocations to sites and reports their outcome as
//! a [`ResultFuture`]. It is external to this crate: transports implement
//! [`Substrate`], and everything here only talks to the trait. A remote
//! action's error, or a failed delivery, must come back as a failed handle.

use crate::action::Action;
use crate::broadcast::VoidCompletion;
use crate::future::ResultFuture;
use braid_core::{ActionId, Payload, SiteId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Registered dispatch routine, identified by tag rather than by reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Routine {
    /// Value broadcast; the subtree answers with its ordered results
    BroadcastValue,
    /// Void broadcast; the subtree answers once every branch settled
    BroadcastVoid,
    /// Fire-and-forget broadcast; the subtree answers once everything is issued
    BroadcastPost,
}

/// One recursive dispatch step, shipped to the head of a target chunk
///
/// Holds only plain data so it can be executed by any site that has the
/// action registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Routine to run
    pub routine: Routine,
    /// Action to broadcast
    pub action: ActionId,
    /// Targets covered by this step, in global order
    pub targets: Vec<SiteId>,
    /// Global index of `targets[0]`
    pub global_idx: usize,
    /// Pass global indices to the action
    pub with_index: bool,
    /// Encoded action arguments
    pub args: Payload,
    /// Maximum direct invocations per step
    pub local_fanout: usize,
    /// How void broadcasts treat failed branches
    pub completion: VoidCompletion,
}

impl DispatchRequest {
    /// Same step over a sub-slice of targets starting at `global_idx`
    #[must_use]
    pub fn subtree(&self, targets: Vec<SiteId>, global_idx: usize) -> Self {
        Self {
            routine: self.routine,
            action: self.action,
            targets,
            global_idx,
            with_index: self.with_index,
            args: self.args.clone(),
            local_fanout: self.local_fanout,
            completion: self.completion,
        }
    }
}

/// Asynchronous remote-invocation substrate
///
/// A substrate value is bound to the site it issues calls from
/// ([`Substrate::here`]). Every method returns without waiting for the
/// remote side.
pub trait Substrate: Send + Sync + 'static {
    /// Site this substrate issues calls from
    fn here(&self) -> SiteId;

    /// Invoke an action at `site`
    fn invoke(&self, site: SiteId, action: ActionId, args: Payload) -> ResultFuture<Payload>;

    /// Invoke an index-aware action at `site`
    fn invoke_with_index(
        &self,
        site: SiteId,
        action: ActionId,
        args: Payload,
        index: usize,
    ) -> ResultFuture<Payload>;

    /// Invoke an action at `site` without observing the result
    fn post(&self, site: SiteId, action: ActionId, args: Payload);

    /// Invoke an index-aware action at `site` without observing the result
    fn post_with_index(&self, site: SiteId, action: ActionId, args: Payload, index: usize);

    /// Run a dispatch routine at `site` instead of here
    fn colocated_spawn(&self, site: SiteId, request: DispatchRequest) -> ResultFuture<Payload>;
}

/// Typed front end over a substrate
///
/// Encodes arguments and decodes outputs so executors can work with action
/// types instead of payloads.
#[derive(Clone)]
pub struct ActionClient {
    substrate: Arc<dyn Substrate>,
}

impl ActionClient {
    /// Create a client over a substrate
    #[must_use]
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self { substrate }
    }

    /// Site this client issues calls from
    #[must_use]
    pub fn here(&self) -> SiteId {
        self.substrate.here()
    }

    /// Underlying substrate
    #[must_use]
    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.substrate
    }

    /// Invoke `A` at `site`
    pub fn invoke<A: Action>(&self, site: SiteId, args: &A::Args) -> ResultFuture<A::Output> {
        match Payload::encode(args) {
            Ok(payload) => decode_output::<A>(self.substrate.invoke(site, A::id(), payload)),
            Err(err) => ResultFuture::failed(err.into()),
        }
    }

    /// Invoke index-aware `A` at `site`
    pub fn invoke_with_index<A: Action>(
        &self,
        site: SiteId,
        args: &A::Args,
        index: usize,
    ) -> ResultFuture<A::Output> {
        match Payload::encode(args) {
            Ok(payload) => decode_output::<A>(
                self.substrate
                    .invoke_with_index(site, A::id(), payload, index),
            ),
            Err(err) => ResultFuture::failed(err.into()),
        }
    }

    /// Post `A` to `site`
    ///
    /// # Errors
    ///
    /// Returns error if the arguments cannot be encoded
    pub fn post<A: Action>(&self, site: SiteId, args: &A::Args) -> crate::ClusterResult<()> {
        let payload = Payload::encode(args)?;
        self.substrate.post(site, A::id(), payload);
        Ok(())
    }
}

fn decode_output<A: Action>(handle: ResultFuture<Payload>) -> ResultFuture<A::Output> {
    handle.map(|payload| Ok(payload.decode::<A::Output>()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ClusterError;
    use crate::registry::ActionRegistry;
    use crate::test_support::{Answer, Loopback, Probe};
    use braid_core::FaultSet;

    fn client() -> (Arc<Loopback>, ActionClient) {
        let registry = Arc::new(
            ActionRegistry::new()
                .with(Probe)
                .and_then(|r| r.with(Answer))
                .unwrap(),
        );
        let origin = Arc::new(Loopback::new(registry, SiteId::from_name("origin")));
        let client = ActionClient::new(origin.clone());
        (origin, client)
    }

    #[test]
    fn test_subtree_keeps_routine() {
        let request = DispatchRequest {
            routine: Routine::BroadcastVoid,
            action: Probe::id(),
            targets: vec![SiteId::from_name("a"), SiteId::from_name("b")],
            global_idx: 0,
            with_index: true,
            args: Payload::unit(),
            local_fanout: 4,
            completion: VoidCompletion::Structural,
        };
        let sub = request.subtree(vec![SiteId::from_name("b")], 1);
        assert_eq!(sub.routine, Routine::BroadcastVoid);
        assert_eq!(sub.global_idx, 1);
        assert_eq!(sub.targets.len(), 1);
        assert!(sub.with_index);
        assert_eq!(sub.completion, VoidCompletion::Structural);
    }

    #[tokio::test]
    async fn test_typed_invoke() {
        let (origin, client) = client();
        let site = SiteId::from_name("a");
        assert_eq!(client.here(), origin.here());

        let answer = client.invoke::<Answer>(site, &FaultSet::new()).await;
        assert_eq!(answer, Ok(42));

        let probe = client.invoke_with_index::<Probe>(site, &(), 7).await.unwrap();
        assert_eq!(probe, (site, Some(7)));
    }

    #[tokio::test]
    async fn test_typed_invoke_unreachable() {
        let (origin, client) = client();
        let site = SiteId::from_name("down");
        origin.mark_unreachable(site);
        let err = client.invoke::<Answer>(site, &FaultSet::new()).await;
        assert_eq!(err, Err(ClusterError::SiteUnreachable { site }));
    }

    #[tokio::test]
    async fn test_post_is_recorded() {
        let (origin, client) = client();
        let site = SiteId::from_name("a");
        client.post::<Answer>(site, &FaultSet::new()).unwrap();
        assert_eq!(origin.calls_from(origin.here()), 1);
    }
}
