//! Simulation errors.

use braid_cluster::ClusterError;
use braid_core::CoreError;

/// Simulation result type
pub type SimResult<T> = Result<T, SimError>;

/// Errors raised while setting up or running a simulation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    /// Fabric needs at least one site
    #[error("Simulation needs at least one site")]
    NoSites,

    /// More faulty sites requested than exist
    #[error("Cannot mark {requested} of {available} sites faulty")]
    TooManyFaulty {
        /// Requested number of faulty sites
        requested: usize,
        /// Number of sites available
        available: usize,
    },

    /// Invalid simulation config
    #[error("Invalid config: {0}")]
    Config(String),

    /// Action registration failed
    #[error("Registry error: {0}")]
    Registry(#[from] CoreError),

    /// Cluster operation failed
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
}
