//! Cohort membership
//!
//! The registry is the ordered set of members a federated request fans out
//! to. Requests take a snapshot with [`CohortRegistry::members`]; members
//! that join or leave afterwards do not affect a request already running.

use std::sync::Arc;

use cohort_core::MetadataCollection;
use parking_lot::RwLock;
use tracing::info;

/// One registered member
#[derive(Clone)]
pub struct CohortMember {
    id: String,
    collection: Arc<dyn MetadataCollection>,
}

impl CohortMember {
    /// Metadata collection id the member registered under
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The member's repository surface
    pub fn collection(&self) -> &Arc<dyn MetadataCollection> {
        &self.collection
    }
}

impl std::fmt::Debug for CohortMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CohortMember").field("id", &self.id).finish()
    }
}

/// Registered members in registration order
#[derive(Debug, Default)]
pub struct CohortRegistry {
    members: RwLock<Vec<CohortMember>>,
}

impl CohortRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member under its own metadata collection id.
    ///
    /// Re-registering an id replaces the member in place and keeps its
    /// position. Returns true if the id was new.
    pub fn register(&self, collection: Arc<dyn MetadataCollection>) -> bool {
        let id = collection.metadata_collection_id().to_string();
        let mut members = self.members.write();
        if let Some(existing) = members.iter_mut().find(|m| m.id == id) {
            existing.collection = collection;
            info!(target: "cohort::registry", member = %id, "member re-registered");
            return false;
        }
        info!(target: "cohort::registry", member = %id, "member registered");
        members.push(CohortMember { id, collection });
        true
    }

    /// Remove a member. Returns true if it was registered.
    pub fn unregister(&self, id: &str) -> bool {
        let mut members = self.members.write();
        let before = members.len();
        members.retain(|m| m.id != id);
        let removed = members.len() != before;
        if removed {
            info!(target: "cohort::registry", member = %id, "member unregistered");
        }
        removed
    }

    /// Snapshot of the current members
    pub fn members(&self) -> Vec<CohortMember> {
        self.members.read().clone()
    }

    /// Ids of the current members, in registration order
    pub fn ids(&self) -> Vec<String> {
        self.members.read().iter().map(|m| m.id.clone()).collect()
    }

    /// Look up one member
    pub fn get(&self, id: &str) -> Option<CohortMember> {
        self.members.read().iter().find(|m| m.id == id).cloned()
    }

    /// True if `id` is registered
    pub fn contains(&self, id: &str) -> bool {
        self.members.read().iter().any(|m| m.id == id)
    }

    /// Number of members
    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    /// True if nobody is registered
    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }
}
