//! Registry of actions and their dispatch routines.
//!
//! Every action must be registered, under its unique name, before it is
//! used across sites. The registry is built once at startup, frozen behind
//! an `Arc`, and handed to the substrate and to every executor. Registering
//! an action also registers its broadcast routines, so a site can run a
//! dispatch step for an action it never constructed.

use crate::action::{Action, ActionDescriptor, Invocation};
use crate::broadcast;
use crate::error::{ClusterError, ClusterResult};
use crate::substrate::{DispatchRequest, Substrate};
use async_trait::async_trait;
use braid_core::{ActionId, CoreError, CoreResult, Payload};
use indexmap::IndexMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

/// Type-erased entry point for one registered action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Descriptor of the action
    fn descriptor(&self) -> &ActionDescriptor;

    /// Decode arguments, run the action body, encode its output
    ///
    /// # Errors
    ///
    /// Returns `RemoteInvocation` if the body fails or panics, `Encoding`
    /// if arguments or output cannot be converted
    fn execute(&self, invocation: &Invocation, args: &Payload) -> ClusterResult<Payload>;

    /// Run a broadcast dispatch step for this action at the substrate's site
    ///
    /// # Errors
    ///
    /// Returns the aggregated error of the subtree
    async fn dispatch(
        &self,
        substrate: Arc<dyn Substrate>,
        request: DispatchRequest,
    ) -> ClusterResult<Payload>;
}

struct TypedHandler<A: Action> {
    action: A,
    descriptor: ActionDescriptor,
}

#[async_trait]
impl<A: Action> ActionHandler for TypedHandler<A> {
    fn descriptor(&self) -> &ActionDescriptor {
        &self.descriptor
    }

    fn execute(&self, invocation: &Invocation, args: &Payload) -> ClusterResult<Payload> {
        let args: A::Args = args.decode()?;
        let outcome = catch_unwind(AssertUnwindSafe(|| self.action.execute(invocation, args)));
        let remote_error = |message: String| ClusterError::RemoteInvocation {
            site: invocation.site,
            action: A::NAME.to_string(),
            message,
        };
        match outcome {
            Ok(Ok(output)) => Ok(Payload::encode(&output)?),
            Ok(Err(failure)) => Err(remote_error(failure.message)),
            Err(panic) => Err(remote_error(panic_message(panic.as_ref()))),
        }
    }

    async fn dispatch(
        &self,
        substrate: Arc<dyn Substrate>,
        request: DispatchRequest,
    ) -> ClusterResult<Payload> {
        broadcast::run_routine::<A>(substrate, request).await
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

/// Registry of actions by identifier
#[derive(Default)]
pub struct ActionRegistry {
    handlers: IndexMap<ActionId, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action
    ///
    /// # Errors
    ///
    /// Returns error if an action with the same name is already registered
    pub fn register<A: Action>(&mut self, action: A) -> CoreResult<ActionDescriptor> {
        let descriptor = ActionDescriptor::of::<A>();
        if self.handlers.contains_key(&descriptor.id) {
            return Err(CoreError::AlreadyExists {
                kind: "Action".to_string(),
                id: descriptor.name,
            });
        }

        tracing::debug!(action = %descriptor.name, id = %descriptor.id, "registered action");
        self.handlers.insert(
            descriptor.id,
            Arc::new(TypedHandler {
                action,
                descriptor: descriptor.clone(),
            }),
        );
        Ok(descriptor)
    }

    /// Register an action, builder style
    ///
    /// # Errors
    ///
    /// Returns error if an action with the same name is already registered
    pub fn with<A: Action>(mut self, action: A) -> CoreResult<Self> {
        self.register(action)?;
        Ok(self)
    }

    /// Get the handler for an action
    ///
    /// # Errors
    ///
    /// Returns `UnknownAction` if the action was never registered
    pub fn handler(&self, id: ActionId) -> ClusterResult<Arc<dyn ActionHandler>> {
        self.handlers
            .get(&id)
            .cloned()
            .ok_or(ClusterError::UnknownAction { action: id })
    }

    /// Check that action type `A` is registered
    ///
    /// # Errors
    ///
    /// Returns `UnknownAction` if it is not
    pub fn ensure_registered<A: Action>(&self) -> ClusterResult<()> {
        let id = A::id();
        if self.handlers.contains_key(&id) {
            Ok(())
        } else {
            Err(ClusterError::UnknownAction { action: id })
        }
    }

    /// Check if an action is registered
    #[must_use]
    pub fn contains(&self, id: ActionId) -> bool {
        self.handlers.contains_key(&id)
    }

    /// Execute a registered action body
    ///
    /// # Errors
    ///
    /// Returns `UnknownAction`, or the error of the action itself
    pub fn execute(
        &self,
        invocation: &Invocation,
        action: ActionId,
        args: &Payload,
    ) -> ClusterResult<Payload> {
        self.handler(action)?.execute(invocation, args)
    }

    /// Run a dispatch step for a registered action
    ///
    /// # Errors
    ///
    /// Returns `UnknownAction`, or the aggregated error of the subtree
    pub async fn dispatch(
        &self,
        substrate: Arc<dyn Substrate>,
        request: DispatchRequest,
    ) -> ClusterResult<Payload> {
        let handler = self.handler(request.action)?;
        handler.dispatch(substrate, request).await
    }

    /// Descriptors of all registered actions, in registration order
    #[must_use]
    pub fn descriptors(&self) -> Vec<ActionDescriptor> {
        self.handlers
            .values()
            .map(|h| h.descriptor().clone())
            .collect()
    }

    /// Number of registered actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ResultKind;
    use crate::test_support::{Answer, Panics, Probe};
    use braid_core::{FaultSet, SiteId};

    fn registry() -> ActionRegistry {
        ActionRegistry::new()
            .with(Probe)
            .and_then(|r| r.with(Answer))
            .unwrap()
    }

    #[test]
    fn test_register_and_list() {
        let registry = registry();
        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec![Probe::NAME.to_string(), Answer::NAME.to_string()]);
        assert!(registry.contains(Probe::id()));
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = registry();
        let err = registry.register(Probe).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists { .. }));
    }

    #[test]
    fn test_unknown_action() {
        let registry = ActionRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(
            registry.ensure_registered::<Probe>(),
            Err(ClusterError::UnknownAction { action: Probe::id() })
        );
    }

    #[test]
    fn test_execute_through_registry() {
        let registry = registry();
        let site = SiteId::from_name("s");
        let args = Payload::encode(&FaultSet::new()).unwrap();
        let out = registry
            .execute(&Invocation::at(site), Answer::id(), &args)
            .unwrap();
        assert_eq!(out.decode::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_execute_failure_is_remote_error() {
        let registry = registry();
        let site = SiteId::from_name("s");
        let faults: FaultSet = [site].into_iter().collect();
        let args = Payload::encode(&faults).unwrap();
        let err = registry
            .execute(&Invocation::at(site), Answer::id(), &args)
            .unwrap_err();
        assert!(matches!(err, ClusterError::RemoteInvocation { site: s, .. } if s == site));
    }

    #[test]
    fn test_panicking_action_is_caught() {
        let registry = ActionRegistry::new().with(Panics).unwrap();
        let site = SiteId::from_name("s");
        let err = registry
            .execute(&Invocation::at(site), Panics::id(), &Payload::unit())
            .unwrap_err();
        match err {
            ClusterError::RemoteInvocation { message, .. } => assert!(message.contains("panicked")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_bad_arguments() {
        let registry = registry();
        let site = SiteId::from_name("s");
        let err = registry
            .execute(&Invocation::at(site), Answer::id(), &Payload::from_bytes(vec![0xff]))
            .unwrap_err();
        assert!(matches!(err, ClusterError::Encoding { .. }));
    }

    #[test]
    fn test_descriptor_kind() {
        let registry = registry();
        let handler = registry.handler(Probe::id()).unwrap();
        assert_eq!(handler.descriptor().kind, ResultKind::Value);
    }
}
