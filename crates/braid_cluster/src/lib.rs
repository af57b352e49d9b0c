//! BRAID Cluster
//!
//! Distributed execution primitives over an asynchronous remote-invocation
//! substrate: a fan-out broadcast dispatcher with bounded per-site fan-out,
//! and replay/replicate executors for computations that may fail.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod broadcast;
pub mod distribution;
pub mod error;
pub mod future;
pub mod registry;
pub mod replay;
pub mod replicate;
pub mod substrate;
pub mod vote;

#[cfg(test)]
pub(crate) mod test_support;

pub use action::{
    Action, ActionDescriptor, ActionFailure, Invocation, ResultKind, ResultMode, Value, Void,
};
pub use broadcast::{
    BroadcastConfig, Broadcaster, DEFAULT_LOCAL_FANOUT, FanoutPlan, VoidCompletion,
};
pub use distribution::TargetDistribution;
pub use error::{ClusterError, ClusterResult};
pub use future::{Promise, ResultFuture};
pub use registry::{ActionHandler, ActionRegistry};
pub use replay::Replay;
pub use replicate::{ReplicaOutcome, Replicate};
pub use substrate::{ActionClient, DispatchRequest, Routine, Substrate};
