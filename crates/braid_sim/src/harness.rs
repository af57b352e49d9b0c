//! Scenario harness running the demo workloads on a fabric.

use crate::error::{SimError, SimResult};
use crate::fabric::{SimConfig, SimFabric};
use crate::failure::choose_faulty;
use crate::workload::{self, AnswerArgs, SiteProbe, UniversalAnswer, is_universal_answer};
use braid_cluster::{
    BroadcastConfig, Broadcaster, ClusterResult, Replay, Replicate, ResultFuture, Substrate,
    TargetDistribution, vote,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

/// How replicate tasks pick their result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplicateMode {
    /// First success wins
    #[default]
    Race,
    /// First validated success wins
    Validate,
    /// Majority vote over successes
    Vote,
    /// Majority vote over validated successes
    VoteValidate,
}

impl ReplicateMode {
    /// All modes
    pub const ALL: [ReplicateMode; 4] = [
        ReplicateMode::Race,
        ReplicateMode::Validate,
        ReplicateMode::Vote,
        ReplicateMode::VoteValidate,
    ];

    /// Mode name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicateMode::Race => "race",
            ReplicateMode::Validate => "validate",
            ReplicateMode::Vote => "vote",
            ReplicateMode::VoteValidate => "vote-validate",
        }
    }
}

impl std::fmt::Display for ReplicateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicateMode {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| SimError::Config(format!("unknown replicate mode: {s}")))
    }
}

/// Outcome of one scenario
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    /// Scenario name
    pub scenario: String,
    /// Number of tasks run
    pub tasks: usize,
    /// Tasks that produced the expected result
    pub succeeded: usize,
    /// Wall-clock duration in milliseconds
    pub elapsed_ms: u64,
    /// Substrate calls issued
    pub calls: usize,
    /// Executions failed by the transient failure model
    pub transient_failures: usize,
}

impl ScenarioReport {
    /// Whether every task succeeded
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.tasks
    }
}

/// Runs scenarios against a fabric
///
/// Every scenario starts by clearing the fault injector and the call log,
/// so a report only covers its own scenario and the log does not grow
/// across scenarios.
pub struct SimHarness {
    fabric: SimFabric,
    broadcast: BroadcastConfig,
}

impl SimHarness {
    /// Create a harness with `num_sites` sites and every workload registered
    ///
    /// # Errors
    ///
    /// Returns error if the fabric or the broadcast config is invalid
    pub fn new(num_sites: usize, sim: SimConfig, broadcast: BroadcastConfig) -> SimResult<Self> {
        broadcast.validate()?;
        let registry = workload::workload_registry()?;
        Ok(Self {
            fabric: SimFabric::new(num_sites, registry, sim)?,
            broadcast,
        })
    }

    /// Underlying fabric
    #[must_use]
    pub fn fabric(&self) -> &SimFabric {
        &self.fabric
    }

    fn origin(&self) -> Arc<dyn Substrate> {
        self.fabric.origin()
    }

    /// Reset faults and the call log, then start the clock
    fn begin(&self) -> Instant {
        self.fabric.faults().reset();
        self.fabric.log().clear();
        Instant::now()
    }

    fn report(&self, scenario: String, tasks: usize, succeeded: usize, started: Instant) -> ScenarioReport {
        let report = ScenarioReport {
            scenario,
            tasks,
            succeeded,
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            calls: self.fabric.log().call_count(),
            transient_failures: self.fabric.faults().transient_count(),
        };
        tracing::debug!(
            scenario = %report.scenario,
            tasks,
            succeeded,
            elapsed_ms = report.elapsed_ms,
            "scenario finished"
        );
        report
    }

    /// Broadcast [`SiteProbe`] to every site and count in-order results
    ///
    /// # Errors
    ///
    /// Returns error if the broadcast fails
    pub async fn broadcast(&self, with_index: bool) -> SimResult<ScenarioReport> {
        let broadcaster = Broadcaster::new(
            Arc::clone(self.fabric.registry()),
            self.origin(),
            self.broadcast,
        )?;
        let sites = self.fabric.sites().to_vec();
        let started = self.begin();

        let results = if with_index {
            broadcaster.broadcast_with_index::<SiteProbe>(&sites, 0, &()).await?
        } else {
            broadcaster.broadcast::<SiteProbe>(&sites, &()).await?
        };
        let succeeded = results
            .iter()
            .enumerate()
            .filter(|(i, (site, index))| {
                *site == sites[*i] && (!with_index || *index == Some(*i))
            })
            .count();

        let name = format!("broadcast fanout={}", self.broadcast.local_fanout);
        Ok(self.report(name, sites.len(), succeeded, started))
    }

    /// Run `tasks` replays of [`UniversalAnswer`] with `faulty` failing sites
    ///
    /// Each task gets the site list rotated to a different start.
    ///
    /// # Errors
    ///
    /// Returns error if more sites are faulty than exist
    pub async fn replay(
        &self,
        faulty: usize,
        tasks: usize,
        grain_us: u64,
        validate: bool,
    ) -> SimResult<ScenarioReport> {
        let args = self.answer_args(faulty, grain_us)?;
        let replay = Replay::new(Arc::clone(self.fabric.registry()), self.origin());
        let distribution = TargetDistribution::new(self.fabric.sites().to_vec());
        let started = self.begin();

        let mut handles = Vec::with_capacity(tasks);
        for _ in 0..tasks {
            let pool = distribution.rotation()?;
            handles.push(if validate {
                replay.replay_validate::<UniversalAnswer, _>(&pool, is_universal_answer, &args)
            } else {
                replay.replay::<UniversalAnswer>(&pool, &args)
            });
        }
        let succeeded = count_answers(handles).await;

        let name = format!("replay faulty={faulty} validate={validate}");
        Ok(self.report(name, tasks, succeeded, started))
    }

    /// Run `tasks` replicates of [`UniversalAnswer`] with `faulty` failing
    /// sites
    ///
    /// # Errors
    ///
    /// Returns error if more sites are faulty than exist
    pub async fn replicate(
        &self,
        faulty: usize,
        tasks: usize,
        grain_us: u64,
        mode: ReplicateMode,
    ) -> SimResult<ScenarioReport> {
        let args = self.answer_args(faulty, grain_us)?;
        let replicate = Replicate::new(Arc::clone(self.fabric.registry()), self.origin());
        let distribution = TargetDistribution::new(self.fabric.sites().to_vec());
        let started = self.begin();

        let mut handles = Vec::with_capacity(tasks);
        for _ in 0..tasks {
            let pool = distribution.rotation()?;
            handles.push(match mode {
                ReplicateMode::Race => replicate.replicate::<UniversalAnswer>(&pool, &args),
                ReplicateMode::Validate => {
                    replicate.replicate_validate::<UniversalAnswer, _>(&pool, is_universal_answer, &args)
                }
                ReplicateMode::Vote => {
                    replicate.replicate_vote::<UniversalAnswer, _>(&pool, vote::majority, &args)
                }
                ReplicateMode::VoteValidate => replicate
                    .replicate_vote_validate::<UniversalAnswer, _, _>(
                        &pool,
                        is_universal_answer,
                        vote::majority,
                        &args,
                    ),
            });
        }
        let succeeded = count_answers(handles).await;

        let name = format!("replicate faulty={faulty} mode={mode}");
        Ok(self.report(name, tasks, succeeded, started))
    }

    fn answer_args(&self, faulty: usize, grain_us: u64) -> SimResult<AnswerArgs> {
        let seed = &self.fabric.config().seed;
        let faults = choose_faulty(self.fabric.sites(), faulty, seed)?;
        Ok(AnswerArgs::new(faults, grain_us))
    }
}

async fn count_answers(handles: Vec<ResultFuture<u32>>) -> usize {
    join_all(handles)
        .await
        .iter()
        .filter(|r: &&ClusterResult<u32>| matches!(r, Ok(v) if is_universal_answer(v)))
        .count()
}
