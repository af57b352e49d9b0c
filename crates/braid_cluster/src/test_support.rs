//! In-process loopback substrate and small actions for unit tests.

use crate::action::{Action, ActionFailure, Invocation, Value, Void};
use crate::error::ClusterError;
use crate::future::ResultFuture;
use crate::registry::ActionRegistry;
use crate::substrate::{DispatchRequest, Substrate};
use braid_core::{ActionId, FaultSet, Payload, SiteId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Invoke,
    Post,
    Spawn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Call {
    pub from: SiteId,
    pub to: SiteId,
    pub kind: CallKind,
}

struct Shared {
    registry: Arc<ActionRegistry>,
    unreachable: Mutex<HashSet<SiteId>>,
    calls: Mutex<Vec<Call>>,
    executed: Mutex<Vec<SiteId>>,
}

/// Substrate that runs everything on the local tokio runtime
pub(crate) struct Loopback {
    here: SiteId,
    shared: Arc<Shared>,
}

impl Loopback {
    pub(crate) fn new(registry: Arc<ActionRegistry>, here: SiteId) -> Self {
        Self {
            here,
            shared: Arc::new(Shared {
                registry,
                unreachable: Mutex::new(HashSet::new()),
                calls: Mutex::new(Vec::new()),
                executed: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn at(&self, site: SiteId) -> Arc<dyn Substrate> {
        Arc::new(Self {
            here: site,
            shared: Arc::clone(&self.shared),
        })
    }

    pub(crate) fn mark_unreachable(&self, site: SiteId) {
        self.shared.unreachable.lock().unwrap().insert(site);
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_from(&self, site: SiteId) -> usize {
        self.calls().iter().filter(|c| c.from == site).count()
    }

    pub(crate) fn executed(&self) -> Vec<SiteId> {
        self.shared.executed.lock().unwrap().clone()
    }

    fn record(&self, to: SiteId, kind: CallKind) -> bool {
        self.shared.calls.lock().unwrap().push(Call {
            from: self.here,
            to,
            kind,
        });
        !self.shared.unreachable.lock().unwrap().contains(&to)
    }

    fn run(&self, site: SiteId, action: ActionId, args: Payload, index: Option<usize>) -> ResultFuture<Payload> {
        let shared = Arc::clone(&self.shared);
        ResultFuture::spawn(async move {
            tokio::task::yield_now().await;
            shared.executed.lock().unwrap().push(site);
            let invocation = Invocation { site, index };
            shared.registry.execute(&invocation, action, &args)
        })
    }
}

impl Substrate for Loopback {
    fn here(&self) -> SiteId {
        self.here
    }

    fn invoke(&self, site: SiteId, action: ActionId, args: Payload) -> ResultFuture<Payload> {
        if !self.record(site, CallKind::Invoke) {
            return ResultFuture::failed(ClusterError::SiteUnreachable { site });
        }
        self.run(site, action, args, None)
    }

    fn invoke_with_index(
        &self,
        site: SiteId,
        action: ActionId,
        args: Payload,
        index: usize,
    ) -> ResultFuture<Payload> {
        if !self.record(site, CallKind::Invoke) {
            return ResultFuture::failed(ClusterError::SiteUnreachable { site });
        }
        self.run(site, action, args, Some(index))
    }

    fn post(&self, site: SiteId, action: ActionId, args: Payload) {
        if self.record(site, CallKind::Post) {
            drop(self.run(site, action, args, None));
        }
    }

    fn post_with_index(&self, site: SiteId, action: ActionId, args: Payload, index: usize) {
        if self.record(site, CallKind::Post) {
            drop(self.run(site, action, args, Some(index)));
        }
    }

    fn colocated_spawn(&self, site: SiteId, request: DispatchRequest) -> ResultFuture<Payload> {
        if !self.record(site, CallKind::Spawn) {
            return ResultFuture::failed(ClusterError::SiteUnreachable { site });
        }
        let view = self.at(site);
        let registry = Arc::clone(&self.shared.registry);
        ResultFuture::spawn(async move { registry.dispatch(view, request).await })
    }
}

/// Returns the executing site and its global index
pub(crate) struct Probe;

impl Action for Probe {
    const NAME: &'static str = "test::probe";
    type Args = ();
    type Output = (SiteId, Option<usize>);
    type Mode = Value;

    fn execute(&self, invocation: &Invocation, _args: ()) -> Result<Self::Output, ActionFailure> {
        Ok((invocation.site, invocation.index))
    }
}

/// Answers 42 unless the executing site is in the fault set
pub(crate) struct Answer;

impl Action for Answer {
    const NAME: &'static str = "test::answer";
    type Args = FaultSet;
    type Output = u32;
    type Mode = Value;

    fn execute(&self, invocation: &Invocation, faults: FaultSet) -> Result<u32, ActionFailure> {
        if faults.contains(&invocation.site) {
            return Err(ActionFailure::new("runtime error occurred"));
        }
        Ok(42)
    }
}

/// Returns the value assigned to the executing site, fails if it has none
pub(crate) struct Lookup;

impl Action for Lookup {
    const NAME: &'static str = "test::lookup";
    type Args = Vec<(SiteId, i64)>;
    type Output = i64;
    type Mode = Value;

    fn execute(&self, invocation: &Invocation, table: Self::Args) -> Result<i64, ActionFailure> {
        table
            .iter()
            .find(|(site, _)| *site == invocation.site)
            .map(|(_, value)| *value)
            .ok_or_else(|| ActionFailure::new("no value for site"))
    }
}

/// Void action failing on sites in the fault set
pub(crate) struct Touch;

impl Action for Touch {
    const NAME: &'static str = "test::touch";
    type Args = FaultSet;
    type Output = ();
    type Mode = Void;

    fn execute(&self, invocation: &Invocation, faults: FaultSet) -> Result<(), ActionFailure> {
        if faults.contains(&invocation.site) {
            return Err(ActionFailure::new("touch failed"));
        }
        Ok(())
    }
}

/// Always panics
pub(crate) struct Panics;

impl Action for Panics {
    const NAME: &'static str = "test::panics";
    type Args = ();
    type Output = u32;
    type Mode = Value;

    fn execute(&self, _invocation: &Invocation, _args: ()) -> Result<u32, ActionFailure> {
        panic!("action body panicked")
    }
}

/// Registry holding every test action
pub(crate) fn registry() -> Arc<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    registry.register(Probe).unwrap();
    registry.register(Answer).unwrap();
    registry.register(Lookup).unwrap();
    registry.register(Touch).unwrap();
    Arc::new(registry)
}

/// `n` named sites
pub(crate) fn sites(n: usize) -> Vec<SiteId> {
    (0..n)
        .map(|i| SiteId::from_name(&format!("site-{i}")))
        .collect()
}
