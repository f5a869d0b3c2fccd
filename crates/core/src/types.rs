//! Identity types
//!
//! Instances and type definitions are addressed by opaque string GUIDs.
//! Members mint their own, so the federation layer never parses them; it only
//! compares and orders them.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique identifier of an instance or type definition
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(String);

impl Guid {
    /// Wrap an existing identifier
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Create a new random Guid using UUID v4
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the identifier is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Guid {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Guid {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a member repository's metadata collection
pub type MetadataCollectionId = String;
