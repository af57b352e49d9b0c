//! Recording of simulated calls and executions.
//!
//! Every invocation, post and co-located spawn is logged with the site that
//! issued it, so tests can check which site talked to which. Action bodies
//! that actually ran are logged separately.

use braid_core::{ActionId, CallId, SiteId};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Kind of substrate call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    /// Invocation whose result is observed
    Invoke,
    /// Fire-and-forget invocation
    Post,
    /// Dispatch routine shipped to another site
    Spawn,
}

/// One call issued through the substrate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Call identifier
    pub id: CallId,
    /// Position in the log
    pub seq: u64,
    /// Site that issued the call
    pub origin: SiteId,
    /// Site the call was addressed to
    pub target: SiteId,
    /// Kind of call
    pub kind: CallKind,
    /// Action involved
    pub action: ActionId,
    /// Global index passed along, if any
    pub index: Option<usize>,
    /// Whether the call was delivered
    pub delivered: bool,
}

/// One action body that ran
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Position in the log
    pub seq: u64,
    /// Site that ran the action
    pub site: SiteId,
    /// Action that ran
    pub action: ActionId,
    /// Global index, if any
    pub index: Option<usize>,
    /// Whether it succeeded
    pub ok: bool,
}

/// Serializable copy of a call log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSnapshot {
    /// Calls in issue order
    pub calls: Vec<CallRecord>,
    /// Executions in completion order
    pub executions: Vec<ExecutionRecord>,
}

impl LogSnapshot {
    /// Serialize to JSON
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Deserialize from JSON
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[derive(Default)]
struct LogState {
    next_seq: u64,
    snapshot: LogSnapshot,
}

impl LogState {
    fn seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Thread-safe log of calls and executions
///
/// Keeps every record until [`CallLog::clear`] is called, so memory grows
/// with the number of calls. `SimHarness` clears it at the start of each
/// scenario.
#[derive(Default)]
pub struct CallLog {
    state: Mutex<LogState>,
}

impl CallLog {
    /// Create an empty log
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LogState) -> R) -> R {
        f(&mut self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Record a call
    pub fn record_call(
        &self,
        origin: SiteId,
        target: SiteId,
        kind: CallKind,
        action: ActionId,
        index: Option<usize>,
        delivered: bool,
    ) -> CallId {
        let id = CallId::new();
        tracing::trace!(call = %id, origin = %origin, target = %target, ?kind, delivered, "call");
        self.with_state(|state| {
            let seq = state.seq();
            state.snapshot.calls.push(CallRecord {
                id,
                seq,
                origin,
                target,
                kind,
                action,
                index,
                delivered,
            });
        });
        id
    }

    /// Record an executed action body
    pub fn record_execution(&self, site: SiteId, action: ActionId, index: Option<usize>, ok: bool) {
        self.with_state(|state| {
            let seq = state.seq();
            state.snapshot.executions.push(ExecutionRecord {
                seq,
                site,
                action,
                index,
                ok,
            });
        });
    }

    /// All calls in issue order
    #[must_use]
    pub fn calls(&self) -> Vec<CallRecord> {
        self.with_state(|state| state.snapshot.calls.clone())
    }

    /// All executions in completion order
    #[must_use]
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.with_state(|state| state.snapshot.executions.clone())
    }

    /// Calls issued by `origin`
    #[must_use]
    pub fn calls_from(&self, origin: SiteId) -> Vec<CallRecord> {
        self.with_state(|state| {
            state
                .snapshot
                .calls
                .iter()
                .filter(|c| c.origin == origin)
                .cloned()
                .collect()
        })
    }

    /// Number of calls of a kind
    #[must_use]
    pub fn count(&self, kind: CallKind) -> usize {
        self.with_state(|state| state.snapshot.calls.iter().filter(|c| c.kind == kind).count())
    }

    /// Number of calls of any kind
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.with_state(|state| state.snapshot.calls.len())
    }

    /// Sites that ran an action body, in completion order
    #[must_use]
    pub fn executed_sites(&self) -> Vec<SiteId> {
        self.with_state(|state| state.snapshot.executions.iter().map(|e| e.site).collect())
    }

    /// Copy of the whole log
    #[must_use]
    pub fn snapshot(&self) -> LogSnapshot {
        self.with_state(|state| state.snapshot.clone())
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.with_state(|state| *state = LogState::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_calls() {
        let log = CallLog::new();
        let a = SiteId::from_name("a");
        let b = SiteId::from_name("b");
        let action = ActionId::from_name("act");

        log.record_call(a, b, CallKind::Invoke, action, Some(3), true);
        log.record_call(b, a, CallKind::Spawn, action, None, false);

        assert_eq!(log.call_count(), 2);
        assert_eq!(log.count(CallKind::Spawn), 1);
        let from_a = log.calls_from(a);
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_a[0].index, Some(3));
        assert!(!log.calls_from(b)[0].delivered);
    }

    #[test]
    fn test_sequence_spans_calls_and_executions() {
        let log = CallLog::new();
        let a = SiteId::from_name("a");
        let action = ActionId::from_name("act");

        log.record_call(a, a, CallKind::Post, action, None, true);
        log.record_execution(a, action, None, true);

        assert_eq!(log.calls()[0].seq, 0);
        assert_eq!(log.executions()[0].seq, 1);
        assert_eq!(log.executed_sites(), vec![a]);
    }

    #[test]
    fn test_snapshot_json() {
        let log = CallLog::new();
        let a = SiteId::from_name("a");
        log.record_call(a, a, CallKind::Invoke, ActionId::from_name("act"), None, true);

        let snapshot = log.snapshot();
        let restored = LogSnapshot::from_json(&snapshot.to_json()).unwrap();
        assert_eq!(restored, snapshot);
    }

    #[test]
    fn test_clear() {
        let log = CallLog::new();
        let a = SiteId::from_name("a");
        log.record_execution(a, ActionId::from_name("act"), None, false);
        log.clear();
        assert!(log.executions().is_empty());
    }
}
