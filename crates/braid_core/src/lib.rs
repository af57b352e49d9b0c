//! BRAID Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! Everything that crosses a site boundary is serializable with a stable,
//! cross-platform encoding.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fault;
pub mod id;
pub mod payload;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use fault::FaultSet;
pub use id::{ActionId, CallId, SiteId};
pub use payload::Payload;
