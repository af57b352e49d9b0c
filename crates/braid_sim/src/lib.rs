//! BRAID Deterministic Simulation
//!
//! An in-process substrate of named sites with seeded latency, fault
//! injection and a call log, plus the demo workloads and scenarios run by
//! the tests and the CLI.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fabric;
pub mod failure;
pub mod harness;
pub mod record;
pub mod seed;
pub mod workload;

pub use error::{SimError, SimResult};
pub use fabric::{SimConfig, SimFabric, SimSite, site_name};
pub use failure::{FailureModel, FaultInjector, choose_faulty};
pub use harness::{ReplicateMode, ScenarioReport, SimHarness};
pub use record::{CallKind, CallLog, CallRecord, ExecutionRecord, LogSnapshot};
pub use seed::{SeedSource, SimSeed};
pub use workload::{AnswerArgs, SiteProbe, Touch, UniversalAnswer, is_universal_answer};
