//! Demo workloads run by the tests and the CLI.

use braid_cluster::{Action, ActionFailure, ActionRegistry, Invocation, Value, Void};
use braid_core::{CoreResult, FaultSet, SiteId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The universal answer
pub const UNIVERSAL_ANSWER: u32 = 42;

/// Arguments of [`UniversalAnswer`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerArgs {
    /// Sites that fail instead of answering
    pub faults: FaultSet,
    /// Busy-work per call, in microseconds
    pub grain_us: u64,
}

impl AnswerArgs {
    /// Create arguments
    #[must_use]
    pub fn new(faults: FaultSet, grain_us: u64) -> Self {
        Self { faults, grain_us }
    }
}

/// Spins for the grain, then answers 42 unless the site is faulty
pub struct UniversalAnswer;

impl Action for UniversalAnswer {
    const NAME: &'static str = "braid::universal_answer";
    type Args = AnswerArgs;
    type Output = u32;
    type Mode = Value;

    fn execute(&self, invocation: &Invocation, args: AnswerArgs) -> Result<u32, ActionFailure> {
        spin(Duration::from_micros(args.grain_us));
        if args.faults.contains(&invocation.site) {
            return Err(ActionFailure::new("runtime error occurred"));
        }
        Ok(UNIVERSAL_ANSWER)
    }
}

/// Reports where it ran and under which global index
pub struct SiteProbe;

impl Action for SiteProbe {
    const NAME: &'static str = "braid::site_probe";
    type Args = ();
    type Output = (SiteId, Option<usize>);
    type Mode = Value;

    fn execute(&self, invocation: &Invocation, _args: ()) -> Result<Self::Output, ActionFailure> {
        Ok((invocation.site, invocation.index))
    }
}

/// Void action that fails on the sites of its fault set
pub struct Touch;

impl Action for Touch {
    const NAME: &'static str = "braid::touch";
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

/// Validator accepting only the universal answer
#[must_use]
pub fn is_universal_answer(value: &u32) -> bool {
    *value == UNIVERSAL_ANSWER
}

/// Register every workload
///
/// # Errors
///
/// Returns error if a workload is already registered
pub fn register_workloads(registry: &mut ActionRegistry) -> CoreResult<()> {
    registry.register(UniversalAnswer)?;
    registry.register(SiteProbe)?;
    registry.register(Touch)?;
    Ok(())
}

/// Frozen registry holding every workload
///
/// # Errors
///
/// Returns error if registration fails
pub fn workload_registry() -> CoreResult<Arc<ActionRegistry>> {
    let mut registry = ActionRegistry::new();
    register_workloads(&mut registry)?;
    Ok(Arc::new(registry))
}

fn spin(grain: Duration) {
    if grain.is_zero() {
        return;
    }
    let start = Instant::now();
    while start.elapsed() < grain {
        std::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_universal_answer() {
        let site = SiteId::from_name("a");
        let args = AnswerArgs::new(FaultSet::new(), 10);
        assert_eq!(UniversalAnswer.execute(&Invocation::at(site), args), Ok(42));

        let faulty = AnswerArgs::new([site].into_iter().collect(), 0);
        assert!(UniversalAnswer.execute(&Invocation::at(site), faulty).is_err());
    }

    #[test]
    fn test_validator() {
        assert!(is_universal_answer(&42));
        assert!(!is_universal_answer(&41));
    }

    #[test]
    fn test_registry_holds_workloads() {
        let registry = workload_registry().unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains(SiteProbe::id()));

        let mut registry = ActionRegistry::new();
        register_workloads(&mut registry).unwrap();
        assert!(register_workloads(&mut registry).is_err());
    }
}
