//! Fan-out broadcast dispatcher.
//!
//! A broadcast invokes one action on every target while no site issues more
//! than `local_fanout` direct invocations plus at most `local_fanout`
//! co-located spawns. The first `local_fanout` targets are invoked directly;
//! the rest is cut into contiguous chunks, and each chunk is handed to its
//! first site, which runs the same dispatch step on it. Every step carries
//! the global index of its first target, so results come back in target
//! order whatever the shape of the tree.

use crate::action::{Action, Value, Void};
use crate::error::{ClusterError, ClusterResult};
use crate::future::ResultFuture;
use crate::registry::ActionRegistry;
use crate::substrate::{DispatchRequest, Routine, Substrate};
use braid_core::{Payload, SiteId};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

/// Default number of direct invocations per dispatch step
pub const DEFAULT_LOCAL_FANOUT: usize = 16;

/// Smallest usable local fan-out
pub const MIN_LOCAL_FANOUT: usize = 2;

/// How a void broadcast treats failed targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoidCompletion {
    /// Fail with the number of failed targets once every branch settled
    #[default]
    Strict,
    /// Succeed once every branch settled, whatever the outcomes
    Structural,
}

/// Broadcast configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// Maximum direct invocations per dispatch step
    pub local_fanout: usize,
    /// Void completion policy
    pub void_completion: VoidCompletion,
}

impl BroadcastConfig {
    /// Create a config with default values
    #[must_use]
    pub fn new() -> Self {
        Self {
            local_fanout: DEFAULT_LOCAL_FANOUT,
            void_completion: VoidCompletion::Strict,
        }
    }

    /// Set local fan-out
    #[must_use]
    pub fn with_local_fanout(mut self, fanout: usize) -> Self {
        self.local_fanout = fanout;
        self
    }

    /// Set void completion policy
    #[must_use]
    pub fn with_void_completion(mut self, completion: VoidCompletion) -> Self {
        self.void_completion = completion;
        self
    }

    /// Validate the config
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the local fan-out is below 2
    pub fn validate(&self) -> ClusterResult<()> {
        if self.local_fanout < MIN_LOCAL_FANOUT {
            return Err(ClusterError::invalid_argument(
                "broadcast config",
                format!(
                    "local_fanout must be at least {MIN_LOCAL_FANOUT}, got {}",
                    self.local_fanout
                ),
            ));
        }
        Ok(())
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Chunk size for `remainder` targets left after the direct batch
///
/// A complete subtree of depth 0 covers `fanout` targets, one of depth `d`
/// covers `fanout + fanout * cap(d - 1)`. The smallest such capacity `c`
/// with `fanout * c >= remainder` is chosen, which yields at most `fanout`
/// chunks and keeps the tree depth logarithmic in the number of targets.
#[must_use]
pub fn chunk_size(remainder: usize, fanout: usize) -> usize {
    let fanout = fanout.max(MIN_LOCAL_FANOUT);
    let mut capacity = fanout;
    while fanout.saturating_mul(capacity) < remainder {
        capacity = fanout.saturating_add(fanout.saturating_mul(capacity));
    }
    capacity
}

/// Shape of one dispatch step over `len` targets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutPlan {
    /// Targets invoked directly
    pub local: Range<usize>,
    /// Size of every chunk but possibly the last
    pub chunk_size: usize,
    /// Chunks delegated to their first site
    pub chunks: Vec<Range<usize>>,
}

impl FanoutPlan {
    /// Plan a step over `len` targets
    #[must_use]
    pub fn new(len: usize, fanout: usize) -> Self {
        let fanout = fanout.max(MIN_LOCAL_FANOUT);
        let local = 0..len.min(fanout);
        let remainder = len - local.end;
        if remainder == 0 {
            return Self {
                local,
                chunk_size: 0,
                chunks: Vec::new(),
            };
        }

        let size = chunk_size(remainder, fanout);
        let chunks = (local.end..len)
            .step_by(size)
            .map(|start| start..(start + size).min(len))
            .collect();
        Self {
            local,
            chunk_size: size,
            chunks,
        }
    }

    /// Whether the step delegates anything
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.chunks.is_empty()
    }
}

struct Branch {
    head: SiteId,
    len: usize,
    handle: ResultFuture<Payload>,
}

struct Issued {
    locals: Vec<ResultFuture<Payload>>,
    branches: Vec<Branch>,
}

fn plan_step(substrate: &dyn Substrate, request: &DispatchRequest) -> FanoutPlan {
    let plan = FanoutPlan::new(request.targets.len(), request.local_fanout);
    tracing::debug!(
        site = %substrate.here(),
        routine = ?request.routine,
        targets = request.targets.len(),
        global_idx = request.global_idx,
        local = plan.local.len(),
        chunks = plan.chunks.len(),
        chunk_size = plan.chunk_size,
        "dispatch step"
    );
    plan
}

fn delegate(substrate: &dyn Substrate, request: &DispatchRequest, chunk: &Range<usize>) -> Branch {
    let head = request.targets[chunk.start];
    let subtree = request.subtree(
        request.targets[chunk.clone()].to_vec(),
        request.global_idx + chunk.start,
    );
    tracing::trace!(site = %head, targets = chunk.len(), "co-located spawn");
    Branch {
        head,
        len: chunk.len(),
        handle: substrate.colocated_spawn(head, subtree),
    }
}

/// Issue every invocation of one step without waiting for any of them
fn issue(substrate: &dyn Substrate, request: &DispatchRequest) -> Issued {
    let plan = plan_step(substrate, request);
    let locals = request.targets[plan.local.clone()]
        .iter()
        .enumerate()
        .map(|(i, &site)| {
            tracing::trace!(site = %site, index = request.global_idx + i, "invoke");
            if request.with_index {
                substrate.invoke_with_index(
                    site,
                    request.action,
                    request.args.clone(),
                    request.global_idx + i,
                )
            } else {
                substrate.invoke(site, request.action, request.args.clone())
            }
        })
        .collect();
    let branches = plan
        .chunks
        .iter()
        .map(|chunk| delegate(substrate, request, chunk))
        .collect();
    Issued { locals, branches }
}

/// Issue a fire-and-forget step; branch handles are dropped unobserved
fn issue_posts(substrate: &dyn Substrate, request: &DispatchRequest) {
    let plan = plan_step(substrate, request);
    for (i, &site) in request.targets[plan.local.clone()].iter().enumerate() {
        if request.with_index {
            substrate.post_with_index(
                site,
                request.action,
                request.args.clone(),
                request.global_idx + i,
            );
        } else {
            substrate.post(site, request.action, request.args.clone());
        }
    }
    for chunk in &plan.chunks {
        drop(delegate(substrate, request, chunk).handle);
    }
}

async fn collect_values<A: Action>(issued: Issued) -> ClusterResult<Vec<A::Output>> {
    let local_results = join_all(issued.locals).await;
    let branch_results = join_all(issued.branches.into_iter().map(|b| b.handle)).await;

    let mut values = Vec::with_capacity(local_results.len());
    for result in local_results {
        values.push(result?.decode::<A::Output>()?);
    }
    for result in branch_results {
        values.extend(result?.decode::<Vec<A::Output>>()?);
    }
    Ok(values)
}

async fn collect_void(
    issued: Issued,
    total: usize,
    completion: VoidCompletion,
) -> ClusterResult<()> {
    let mut failed = 0;
    let mut first: Option<String> = None;

    for result in join_all(issued.locals).await {
        if let Err(err) = result {
            tracing::warn!(error = %err, "void target failed");
            failed += 1;
            first.get_or_insert_with(|| err.to_string());
        }
    }

    let (heads, handles): (Vec<_>, Vec<_>) = issued
        .branches
        .into_iter()
        .map(|b| ((b.head, b.len), b.handle))
        .unzip();
    for ((head, len), result) in heads.into_iter().zip(join_all(handles).await) {
        match result {
            Ok(_) => {}
            Err(ClusterError::Aggregation {
                failed: inner,
                first: message,
                ..
            }) => {
                failed += inner;
                first.get_or_insert(message);
            }
            Err(err) => {
                tracing::warn!(site = %head, targets = len, error = %err, "void branch failed");
                failed += len;
                first.get_or_insert_with(|| err.to_string());
            }
        }
    }

    if failed == 0 || completion == VoidCompletion::Structural {
        return Ok(());
    }
    Err(ClusterError::Aggregation {
        failed,
        total,
        first: first.unwrap_or_default(),
    })
}

/// Run one dispatch step for action `A` at the substrate's site
pub(crate) async fn run_routine<A: Action>(
    substrate: Arc<dyn Substrate>,
    request: DispatchRequest,
) -> ClusterResult<Payload> {
    match request.routine {
        Routine::BroadcastValue => {
            let values = collect_values::<A>(issue(&*substrate, &request)).await?;
            Ok(Payload::encode(&values)?)
        }
        Routine::BroadcastVoid => {
            let issued = issue(&*substrate, &request);
            collect_void(issued, request.targets.len(), request.completion).await?;
            Ok(Payload::unit())
        }
        Routine::BroadcastPost => {
            issue_posts(&*substrate, &request);
            Ok(Payload::unit())
        }
    }
}

/// Entry point for broadcasts issued from one site
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ActionRegistry>,
    substrate: Arc<dyn Substrate>,
    config: BroadcastConfig,
}

impl Broadcaster {
    /// Create a broadcaster
    ///
    /// # Errors
    ///
    /// Returns error if the config is invalid
    pub fn new(
        registry: Arc<ActionRegistry>,
        substrate: Arc<dyn Substrate>,
        config: BroadcastConfig,
    ) -> ClusterResult<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            substrate,
            config,
        })
    }

    /// Get the config
    #[must_use]
    pub fn config(&self) -> &BroadcastConfig {
        &self.config
    }

    /// Invoke `A` on every target and collect the results in target order
    ///
    /// Fails with the first error in target order.
    pub fn broadcast<A>(&self, targets: &[SiteId], args: &A::Args) -> ResultFuture<Vec<A::Output>>
    where
        A: Action<Mode = Value>,
    {
        self.values::<A>(targets, 0, false, args)
    }

    /// As [`Broadcaster::broadcast`], passing each target its global index
    /// starting at `global_idx`
    pub fn broadcast_with_index<A>(
        &self,
        targets: &[SiteId],
        global_idx: usize,
        args: &A::Args,
    ) -> ResultFuture<Vec<A::Output>>
    where
        A: Action<Mode = Value>,
    {
        self.values::<A>(targets, global_idx, true, args)
    }

    /// Invoke void action `A` on every target
    ///
    /// Settles once every branch settled; failures are reported according
    /// to the configured [`VoidCompletion`].
    pub fn broadcast_void<A>(&self, targets: &[SiteId], args: &A::Args) -> ResultFuture<()>
    where
        A: Action<Mode = Void>,
    {
        self.void::<A>(targets, 0, false, args)
    }

    /// As [`Broadcaster::broadcast_void`], passing each target its global
    /// index starting at `global_idx`
    pub fn broadcast_void_with_index<A>(
        &self,
        targets: &[SiteId],
        global_idx: usize,
        args: &A::Args,
    ) -> ResultFuture<()>
    where
        A: Action<Mode = Void>,
    {
        self.void::<A>(targets, global_idx, true, args)
    }

    /// Fire-and-forget broadcast of `A`
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty target list, `UnknownAction`
    /// if `A` is not registered
    pub fn broadcast_post<A: Action>(&self, targets: &[SiteId], args: &A::Args) -> ClusterResult<()> {
        self.posts::<A>(targets, 0, false, args)
    }

    /// Fire-and-forget broadcast passing each target its global index
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty target list, `UnknownAction`
    /// if `A` is not registered
    pub fn broadcast_post_with_index<A: Action>(
        &self,
        targets: &[SiteId],
        global_idx: usize,
        args: &A::Args,
    ) -> ClusterResult<()> {
        self.posts::<A>(targets, global_idx, true, args)
    }

    fn values<A: Action>(
        &self,
        targets: &[SiteId],
        global_idx: usize,
        with_index: bool,
        args: &A::Args,
    ) -> ResultFuture<Vec<A::Output>> {
        match self.prepare::<A>(Routine::BroadcastValue, targets, global_idx, with_index, args) {
            Ok(request) => {
                let issued = issue(&*self.substrate, &request);
                ResultFuture::spawn(collect_values::<A>(issued))
            }
            Err(err) => ResultFuture::failed(err),
        }
    }

    fn void<A: Action>(
        &self,
        targets: &[SiteId],
        global_idx: usize,
        with_index: bool,
        args: &A::Args,
    ) -> ResultFuture<()> {
        match self.prepare::<A>(Routine::BroadcastVoid, targets, global_idx, with_index, args) {
            Ok(request) => {
                let issued = issue(&*self.substrate, &request);
                ResultFuture::spawn(collect_void(issued, targets.len(), request.completion))
            }
            Err(err) => ResultFuture::failed(err),
        }
    }

    fn posts<A: Action>(
        &self,
        targets: &[SiteId],
        global_idx: usize,
        with_index: bool,
        args: &A::Args,
    ) -> ClusterResult<()> {
        let request =
            self.prepare::<A>(Routine::BroadcastPost, targets, global_idx, with_index, args)?;
        issue_posts(&*self.substrate, &request);
        Ok(())
    }

    fn prepare<A: Action>(
        &self,
        routine: Routine,
        targets: &[SiteId],
        global_idx: usize,
        with_index: bool,
        args: &A::Args,
    ) -> ClusterResult<DispatchRequest> {
        if targets.is_empty() {
            return Err(ClusterError::invalid_argument(
                "broadcast",
                "empty list of targets",
            ));
        }
        if global_idx.checked_add(targets.len()).is_none() {
            return Err(ClusterError::invalid_argument(
                "broadcast",
                format!(
                    "global index {global_idx} overflows over {} targets",
                    targets.len()
                ),
            ));
        }
        self.registry.ensure_registered::<A>()?;
        Ok(DispatchRequest {
            routine,
            action: A::id(),
            targets: targets.to_vec(),
            global_idx,
            with_index,
            args: Payload::encode(args)?,
            local_fanout: self.config.local_fanout,
            completion: self.config.void_completion,
        })
    }
}
