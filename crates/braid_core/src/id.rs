//! Identifiers for BRAID entities.
//!
//! Site and call IDs are random UUIDs. Action IDs are name-derived (v5) so
//! that every process computes the same identifier for the same action.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace for action identifiers
const ACTION_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6b, 0x2f, 0x1e, 0x90, 0x4c, 0x3d, 0x5a, 0x77, 0x9e, 0x41, 0x08, 0xd2, 0x35, 0xc7, 0xa1, 0x5f,
]);

/// Site identifier - identifies an addressable execution site
///
/// Issued externally and compared by equality only. Sites carry no
/// ordering semantics; the `Ord` impl exists so sites can live in sorted
/// sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiteId(Uuid);

impl SiteId {
    /// Create a new random SiteId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from name (for named sites)
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_DNS, name.as_bytes()))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Get as bytes
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for SiteId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "site_{}", self.0)
    }
}

/// Action identifier - process-wide unique identifier of a registered action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Derive the identifier for an action name
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&ACTION_NAMESPACE, name.as_bytes()))
    }

    /// Get as UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "act_{}", self.0)
    }
}

/// Call identifier - tags a single invocation for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallId(Uuid);

impl CallId {
    /// Create a new random CallId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CallId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "call_{}", self.0)
    }
}
