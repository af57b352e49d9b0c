//! Error taxonomy shared by the dispatcher and the resiliency executors.

use braid_core::{ActionId, CoreError, SiteId};

/// Cluster result type
pub type ClusterResult<T> = Result<T, ClusterError>;

/// Errors surfaced through result futures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// Caller passed arguments the operation cannot work with
    #[error("Invalid argument to {operation}: {reason}")]
    InvalidArgument {
        /// Operation that rejected the call
        operation: String,
        /// What was wrong
        reason: String,
    },

    /// Action body raised an error on the remote site
    #[error("Action {action} failed on {site}: {message}")]
    RemoteInvocation {
        /// Site that ran the action
        site: SiteId,
        /// Action name
        action: String,
        /// Error raised by the action
        message: String,
    },

    /// Invocation could not be delivered
    #[error("Site unreachable: {site}")]
    SiteUnreachable {
        /// Target site
        site: SiteId,
    },

    /// Replay ran out of sites
    #[error("Replay exhausted after {attempts} attempts")]
    Exhausted {
        /// Number of attempts made
        attempts: usize,
        /// Error of the last attempt, if any attempt was made
        last_error: Option<String>,
    },

    /// No replica produced a qualifying result
    #[error("All {replicas} replicas failed ({failed} errors, {rejected} rejected)")]
    AllReplicasFailed {
        /// Number of replicas launched
        replicas: usize,
        /// Replicas that raised an error
        failed: usize,
        /// Replicas whose result failed validation
        rejected: usize,
    },

    /// Vote function found no value to agree on
    #[error("No consensus among {candidates} replica results")]
    NoConsensus {
        /// Number of outcomes that were voted on
        candidates: usize,
    },

    /// Void broadcast finished with failed targets
    #[error("Broadcast failed on {failed} of {total} targets: {first}")]
    Aggregation {
        /// Number of failed targets
        failed: usize,
        /// Number of targets in the broadcast
        total: usize,
        /// First failure in target order
        first: String,
    },

    /// Action was never registered
    #[error("Action not registered: {action}")]
    UnknownAction {
        /// Action identifier
        action: ActionId,
    },

    /// Arguments or results could not be encoded
    #[error("Encoding error: {reason}")]
    Encoding {
        /// Underlying reason
        reason: String,
    },

    /// The producer of a result future went away without settling it
    #[error("Result abandoned before completion")]
    Abandoned,

    /// No async runtime to drive a continuation
    #[error("No async runtime available")]
    NoRuntime,

    /// Internal error
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl ClusterError {
    /// Shorthand for an `InvalidArgument` error
    #[must_use]
    pub fn invalid_argument(operation: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<CoreError> for ClusterError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidEncoding { reason } => Self::Encoding { reason },
            CoreError::Validation { field, reason } => Self::InvalidArgument {
                operation: field,
                reason,
            },
            other => Self::Internal {
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_display() {
        let err = ClusterError::invalid_argument("broadcast", "empty list of targets");
        assert_eq!(
            err.to_string(),
            "Invalid argument to broadcast: empty list of targets"
        );
    }

    #[test]
    fn test_exhausted_carries_attempts() {
        let err = ClusterError::Exhausted {
            attempts: 4,
            last_error: Some("boom".to_string()),
        };
        assert!(err.to_string().contains('4'));
    }

    #[test]
    fn test_all_replicas_failed_display() {
        let err = ClusterError::AllReplicasFailed {
            replicas: 5,
            failed: 3,
            rejected: 2,
        };
        let s = err.to_string();
        assert!(s.contains("5 replicas"));
        assert!(s.contains("3 errors"));
        assert!(s.contains("2 rejected"));
    }

    #[test]
    fn test_from_core_error() {
        let err: ClusterError = CoreError::InvalidEncoding {
            reason: "eof".to_string(),
        }
        .into();
        assert_eq!(
            err,
            ClusterError::Encoding {
                reason: "eof".to_string()
            }
        );

        let err: ClusterError = CoreError::NotFound {
            kind: "Action".to_string(),
            id: "x".to_string(),
        }
        .into();
        assert!(matches!(err, ClusterError::Internal { .. }));
    }
}
