//! Encoded arguments and results crossing site boundaries.
//!
//! Uses postcard for byte-stable encoding.

use crate::error::CoreResult;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Opaque encoded value
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Payload(Vec<u8>);

impl Payload {
    /// Encode a value
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be encoded
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> CoreResult<Self> {
        Ok(Self(postcard::to_allocvec(value)?))
    }

    /// Decode the payload into a value
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a valid encoding of `T`
    pub fn decode<T: DeserializeOwned>(&self) -> CoreResult<T> {
        Ok(postcard::from_bytes(&self.0)?)
    }

    /// Payload of the unit value
    #[must_use]
    pub fn unit() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw bytes
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded length
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
