//! In-process fabric of simulated sites.
//!
//! All sites share one registry, one fault injector and one call log. A
//! [`SimSite`] is the substrate view bound to one site: calls issued through
//! it are logged with that site as origin, and a co-located spawn runs the
//! dispatch routine under the view of the receiving site.

use crate::error::{SimError, SimResult};
use crate::failure::{FailureModel, FaultInjector};
use crate::record::{CallKind, CallLog};
use crate::seed::SimSeed;
use braid_cluster::{
    ActionRegistry, ClusterError, ClusterResult, DispatchRequest, Invocation, ResultFuture,
    Substrate,
};
use braid_core::{ActionId, Payload, SiteId};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Fabric configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed for reproducibility
    pub seed: SimSeed,
    /// Delivery latency applied to every call, in milliseconds
    pub base_latency_ms: u64,
    /// Upper bound of random extra latency, in milliseconds
    pub jitter_ms: u64,
    /// Extra latency per site index, in milliseconds
    pub site_latency_ms: BTreeMap<usize, u64>,
    /// Transient failure model
    pub failure: FailureModel,
}

impl SimConfig {
    /// Create a new config
    #[must_use]
    pub fn new(seed: SimSeed) -> Self {
        Self {
            seed,
            base_latency_ms: 0,
            jitter_ms: 0,
            site_latency_ms: BTreeMap::new(),
            failure: FailureModel::default(),
        }
    }

    /// Set base latency
    #[must_use]
    pub fn with_base_latency(mut self, ms: u64) -> Self {
        self.base_latency_ms = ms;
        self
    }

    /// Set jitter
    #[must_use]
    pub fn with_jitter(mut self, ms: u64) -> Self {
        self.jitter_ms = ms;
        self
    }

    /// Add latency to one site
    #[must_use]
    pub fn with_site_latency(mut self, index: usize, ms: u64) -> Self {
        self.site_latency_ms.insert(index, ms);
        self
    }

    /// Set transient failure model
    #[must_use]
    pub fn with_failure_model(mut self, model: FailureModel) -> Self {
        self.failure = model;
        self
    }

    /// Validate the config
    ///
    /// # Errors
    ///
    /// Returns error if the failure probability is outside `[0, 1]`
    pub fn validate(&self) -> SimResult<()> {
        if !(0.0..=1.0).contains(&self.failure.probability) {
            return Err(SimError::Config(format!(
                "failure probability must be within [0, 1], got {}",
                self.failure.probability
            )));
        }
        Ok(())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(SimSeed::default())
    }
}

struct FabricInner {
    config: SimConfig,
    sites: Vec<SiteId>,
    index_of: HashMap<SiteId, usize>,
    registry: Arc<ActionRegistry>,
    faults: FaultInjector,
    log: CallLog,
    jitter: Mutex<ChaCha8Rng>,
}

impl FabricInner {
    fn latency(&self, target: usize) -> Duration {
        let mut ms = self.config.base_latency_ms;
        if self.config.jitter_ms > 0 {
            let mut rng = self.jitter.lock().unwrap_or_else(PoisonError::into_inner);
            ms += rng.gen_range(0..=self.config.jitter_ms);
        }
        ms += self.config.site_latency_ms.get(&target).copied().unwrap_or(0);
        Duration::from_millis(ms)
    }

    fn action_name(&self, action: ActionId) -> String {
        self.registry
            .handler(action)
            .map(|h| h.descriptor().name.clone())
            .unwrap_or_else(|_| action.to_string())
    }

    fn execute(&self, invocation: Invocation, action: ActionId, args: &Payload) -> ClusterResult<Payload> {
        let site = invocation.site;
        let result = if self.faults.is_faulty(&site) {
            Err(ClusterError::RemoteInvocation {
                site,
                action: self.action_name(action),
                message: "injected fault".to_string(),
            })
        } else if self.faults.maybe_fail() {
            Err(ClusterError::RemoteInvocation {
                site,
                action: self.action_name(action),
                message: "transient failure".to_string(),
            })
        } else {
            self.registry.execute(&invocation, action, args)
        };
        self.log
            .record_execution(site, action, invocation.index, result.is_ok());
        result
    }
}

/// Simulated fabric of named sites
#[derive(Clone)]
pub struct SimFabric {
    inner: Arc<FabricInner>,
}

impl SimFabric {
    /// Create a fabric of `num_sites` sites named `site-0`, `site-1`, ...
    ///
    /// # Errors
    ///
    /// Returns error if `num_sites` is zero or the config is invalid
    pub fn new(num_sites: usize, registry: Arc<ActionRegistry>, config: SimConfig) -> SimResult<Self> {
        if num_sites == 0 {
            return Err(SimError::NoSites);
        }
        config.validate()?;

        let sites: Vec<SiteId> = (0..num_sites).map(|i| SiteId::from_name(&site_name(i))).collect();
        let index_of = sites.iter().enumerate().map(|(i, s)| (*s, i)).collect();
        let faults = FaultInjector::with_model(&config.seed, config.failure.clone());
        let jitter = Mutex::new(config.seed.derive("latency").into_rng());
        tracing::debug!(sites = num_sites, seed = config.seed.seed, "fabric created");

        Ok(Self {
            inner: Arc::new(FabricInner {
                config,
                sites,
                index_of,
                registry,
                faults,
                log: CallLog::new(),
                jitter,
            }),
        })
    }

    /// All sites, in index order
    #[must_use]
    pub fn sites(&self) -> &[SiteId] {
        &self.inner.sites
    }

    /// Site at `index`
    #[must_use]
    pub fn site(&self, index: usize) -> Option<SiteId> {
        self.inner.sites.get(index).copied()
    }

    /// Index of a site
    #[must_use]
    pub fn index_of(&self, site: SiteId) -> Option<usize> {
        self.inner.index_of.get(&site).copied()
    }

    /// Config
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.inner.config
    }

    /// Shared registry
    #[must_use]
    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.inner.registry
    }

    /// Fault injector
    #[must_use]
    pub fn faults(&self) -> &FaultInjector {
        &self.inner.faults
    }

    /// Call log
    #[must_use]
    pub fn log(&self) -> &CallLog {
        &self.inner.log
    }

    /// Substrate view bound to `site`
    #[must_use]
    pub fn at(&self, site: SiteId) -> Arc<SimSite> {
        Arc::new(SimSite {
            site,
            fabric: Arc::clone(&self.inner),
        })
    }

    /// Substrate view bound to the first site
    #[must_use]
    pub fn origin(&self) -> Arc<SimSite> {
        self.at(self.inner.sites[0])
    }
}

/// Name of the site at `index`
#[must_use]
pub fn site_name(index: usize) -> String {
    format!("site-{index}")
}

/// Substrate view of one simulated site
pub struct SimSite {
    site: SiteId,
    fabric: Arc<FabricInner>,
}

impl SimSite {
    /// Log the call and decide whether it is delivered
    fn deliver(
        &self,
        target: SiteId,
        kind: CallKind,
        action: ActionId,
        index: Option<usize>,
    ) -> ClusterResult<Duration> {
        let position = self.fabric.index_of.get(&target).copied();
        let delivered = position.is_some() && !self.fabric.faults.is_crashed(&target);
        self.fabric
            .log
            .record_call(self.site, target, kind, action, index, delivered);
        match position {
            Some(position) if delivered => Ok(self.fabric.latency(position)),
            _ => Err(ClusterError::SiteUnreachable { site: target }),
        }
    }

    fn call(
        &self,
        target: SiteId,
        action: ActionId,
        args: Payload,
        index: Option<usize>,
    ) -> ResultFuture<Payload> {
        let latency = match self.deliver(target, CallKind::Invoke, action, index) {
            Ok(latency) => latency,
            Err(err) => return ResultFuture::failed(err),
        };
        run_remote(Arc::clone(&self.fabric), target, action, args, index, latency)
    }

    fn post_call(&self, target: SiteId, action: ActionId, args: Payload, index: Option<usize>) {
        if let Ok(latency) = self.deliver(target, CallKind::Post, action, index) {
            drop(run_remote(
                Arc::clone(&self.fabric),
                target,
                action,
                args,
                index,
                latency,
            ));
        }
    }
}

fn run_remote(
    fabric: Arc<FabricInner>,
    site: SiteId,
    action: ActionId,
    args: Payload,
    index: Option<usize>,
    latency: Duration,
) -> ResultFuture<Payload> {
    ResultFuture::spawn(async move {
        delay(latency).await;
        let invocation = Invocation { site, index };
        // Action bodies may spin; keep them off the async workers.
        tokio::task::spawn_blocking(move || fabric.execute(invocation, action, &args))
            .await
            .unwrap_or(Err(ClusterError::Abandoned))
    })
}

async fn delay(latency: Duration) {
    if latency.is_zero() {
        tokio::task::yield_now().await;
    } else {
        tokio::time::sleep(latency).await;
    }
}

impl Substrate for SimSite {
    fn here(&self) -> SiteId {
        self.site
    }

    fn invoke(&self, site: SiteId, action: ActionId, args: Payload) -> ResultFuture<Payload> {
        self.call(site, action, args, None)
    }

    fn invoke_with_index(
        &self,
        site: SiteId,
        action: ActionId,
        args: Payload,
        index: usize,
    ) -> ResultFuture<Payload> {
        self.call(site, action, args, Some(index))
    }

    fn post(&self, site: SiteId, action: ActionId, args: Payload) {
        self.post_call(site, action, args, None);
    }

    fn post_with_index(&self, site: SiteId, action: ActionId, args: Payload, index: usize) {
        self.post_call(site, action, args, Some(index));
    }

    fn colocated_spawn(&self, site: SiteId, request: DispatchRequest) -> ResultFuture<Payload> {
        let latency = match self.deliver(site, CallKind::Spawn, request.action, None) {
            Ok(latency) => latency,
            Err(err) => return ResultFuture::failed(err),
        };
        let fabric = Arc::clone(&self.fabric);
        ResultFuture::spawn(async move {
            delay(latency).await;
            let registry = Arc::clone(&fabric.registry);
            let view: Arc<dyn Substrate> = Arc::new(SimSite { site, fabric });
            registry.dispatch(view, request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::{self, AnswerArgs, SiteProbe, UniversalAnswer};
    use braid_cluster::{Action, ActionClient};
    use braid_core::FaultSet;

    fn fabric(n: usize) -> SimFabric {
        SimFabric::new(n, workload::workload_registry().unwrap(), SimConfig::default()).unwrap()
    }

    #[test]
    fn test_needs_sites() {
        let registry = workload::workload_registry().unwrap();
        assert!(matches!(
            SimFabric::new(0, registry, SimConfig::default()),
            Err(SimError::NoSites)
        ));
    }

    #[test]
    fn test_invalid_failure_probability() {
        let registry = workload::workload_registry().unwrap();
        let config = SimConfig::default().with_failure_model(FailureModel::new(1.5));
        assert!(matches!(
            SimFabric::new(2, registry, config),
            Err(SimError::Config(_))
        ));
    }

    #[test]
    fn test_sites_are_named() {
        let fabric = fabric(3);
        assert_eq!(fabric.site(2), Some(SiteId::from_name("site-2")));
        assert_eq!(fabric.index_of(fabric.sites()[1]), Some(1));
        assert_eq!(fabric.site(3), None);
    }

    #[tokio::test]
    async fn test_invoke_logs_origin() {
        let fabric = fabric(3);
        let client = ActionClient::new(fabric.at(fabric.sites()[1]));
        let target = fabric.sites()[2];

        let (site, index) = client.invoke_with_index::<SiteProbe>(target, &(), 5).await.unwrap();
        assert_eq!((site, index), (target, Some(5)));

        let calls = fabric.log().calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].origin, fabric.sites()[1]);
        assert_eq!(calls[0].action, SiteProbe::id());
        assert_eq!(fabric.log().executed_sites(), vec![target]);
    }

    #[tokio::test]
    async fn test_crashed_and_unknown_sites_are_unreachable() {
        let fabric = fabric(2);
        let client = ActionClient::new(fabric.origin());
        let crashed = fabric.sites()[1];
        fabric.faults().crash(crashed);

        let err = client.invoke::<SiteProbe>(crashed, &()).await;
        assert_eq!(err, Err(ClusterError::SiteUnreachable { site: crashed }));

        let stranger = SiteId::from_name("elsewhere");
        let err = client.invoke::<SiteProbe>(stranger, &()).await;
        assert_eq!(err, Err(ClusterError::SiteUnreachable { site: stranger }));

        assert!(fabric.log().calls().iter().all(|c| !c.delivered));
        assert!(fabric.log().executions().is_empty());

        fabric.faults().recover(crashed);
        assert!(client.invoke::<SiteProbe>(crashed, &()).await.is_ok());
    }

    #[tokio::test]
    async fn test_faulty_site_fails_execution() {
        let fabric = fabric(2);
        let faulty = fabric.sites()[1];
        fabric.faults().set_faulty([faulty].into_iter().collect());
        let client = ActionClient::new(fabric.origin());

        let err = client.invoke::<SiteProbe>(faulty, &()).await.unwrap_err();
        match err {
            ClusterError::RemoteInvocation { site, action, .. } => {
                assert_eq!(site, faulty);
                assert_eq!(action, SiteProbe::NAME);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!fabric.log().executions()[0].ok);
    }

    #[tokio::test]
    async fn test_transient_failures() {
        let registry = workload::workload_registry().unwrap();
        let config = SimConfig::default().with_failure_model(FailureModel::new(1.0).with_max_failures(1));
        let fabric = SimFabric::new(1, registry, config).unwrap();
        let client = ActionClient::new(fabric.origin());
        let site = fabric.sites()[0];

        assert!(client.invoke::<SiteProbe>(site, &()).await.is_err());
        assert!(client.invoke::<SiteProbe>(site, &()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let registry = workload::workload_registry().unwrap();
        let config = SimConfig::default()
            .with_base_latency(5)
            .with_jitter(3)
            .with_site_latency(1, 100);
        let fabric = SimFabric::new(2, registry, config).unwrap();
        let client = ActionClient::new(fabric.origin());

        let start = tokio::time::Instant::now();
        let args = AnswerArgs::new(FaultSet::new(), 0);
        assert_eq!(client.invoke::<UniversalAnswer>(fabric.sites()[1], &args).await, Ok(42));
        assert!(start.elapsed() >= Duration::from_millis(105));
    }

    #[test]
    fn test_config_json() {
        let config = SimConfig::new(SimSeed::from_literal(9)).with_site_latency(3, 20);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: SimConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);

        let partial: SimConfig = serde_json::from_str(r#"{"jitter_ms": 4}"#).unwrap();
        assert_eq!(partial.jitter_ms, 4);
        assert_eq!(partial.seed, SimSeed::default());
    }
}
