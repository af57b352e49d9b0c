//! Remote-invocable actions.
//!
//! An action is a stateless procedure value: it carries no captured data, so
//! any site holding the same registry can run it given only its identifier
//! and encoded arguments.

use braid_core::{ActionId, SiteId};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Declared result kind of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultKind {
    /// Produces a value per invocation
    Value,
    /// Produces nothing; only completion is observed
    Void,
}

/// Type-level result kind, selecting the broadcast variant at compile time
pub trait ResultMode: Send + Sync + 'static {
    /// Runtime view of the mode
    const KIND: ResultKind;
}

/// Marker for value-returning actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Value;

impl ResultMode for Value {
    const KIND: ResultKind = ResultKind::Value;
}

/// Marker for void actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Void;

impl ResultMode for Void {
    const KIND: ResultKind = ResultKind::Void;
}

/// Registered reference to an action
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionDescriptor {
    /// Process-wide identifier
    pub id: ActionId,
    /// Unique action name
    pub name: String,
    /// Declared result kind
    pub kind: ResultKind,
}

impl ActionDescriptor {
    /// Create a descriptor for a named action
    #[must_use]
    pub fn new(name: &str, kind: ResultKind) -> Self {
        Self {
            id: ActionId::from_name(name),
            name: name.to_string(),
            kind,
        }
    }

    /// Descriptor of action type `A`
    #[must_use]
    pub fn of<A: Action>() -> Self {
        Self::new(A::NAME, <A::Mode as ResultMode>::KIND)
    }
}

/// Where and as what an action body is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    /// Site executing the action
    pub site: SiteId,
    /// Global target index, set for index-aware broadcasts
    pub index: Option<usize>,
}

impl Invocation {
    /// Plain invocation at `site`
    #[must_use]
    pub fn at(site: SiteId) -> Self {
        Self { site, index: None }
    }

    /// Index-aware invocation at `site`
    #[must_use]
    pub fn indexed(site: SiteId, index: usize) -> Self {
        Self {
            site,
            index: Some(index),
        }
    }
}

/// Error raised by an action body
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ActionFailure {
    /// Error message
    pub message: String,
}

impl ActionFailure {
    /// Create a failure with a message
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// A remote-invocable procedure
///
/// Implementors are stateless values. `NAME` must be unique across the
/// registry; the action identifier is derived from it.
pub trait Action: Send + Sync + 'static {
    /// Unique action name
    const NAME: &'static str;

    /// Argument type
    type Args: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Result type (`()` for void actions)
    type Output: Serialize + DeserializeOwned + Send + 'static;

    /// Declared result kind
    type Mode: ResultMode;

    /// Run the action body
    ///
    /// # Errors
    ///
    /// Returns the failure raised by the body
    fn execute(&self, invocation: &Invocation, args: Self::Args)
    -> Result<Self::Output, ActionFailure>;

    /// Process-wide identifier of this action
    #[must_use]
    fn id() -> ActionId
    where
        Self: Sized,
    {
        ActionId::from_name(Self::NAME)
    }
}
