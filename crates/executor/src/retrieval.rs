//! Single-instance retrieval executors
//!
//! Entity retrieval runs in two phases:
//!
//! ```text
//! phase 1  GetEntityDetailExecutor         every member
//!          └─ EntityProxyOnly ──▶ get_home_classifications on the same member
//! phase 2  GetHomeClassificationsExecutor  members neither contributing nor checked
//! ```
//!
//! Phase two only runs when phase one found a copy; its failures are logged
//! by the accumulator and never surface.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use cohort_concurrency::{
    AccumulatorBase, EntityDetailAccumulator, PrecedenceTable, RelationshipAccumulator,
};
use cohort_core::{CohortError, Guid, MetadataCollection};
use tracing::debug;

use crate::executor::{captured, RepositoryExecutor};

/// How a retrieval treats a member that does not hold the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalMode {
    /// `get_*`: the member must return the instance or fail
    Get,
    /// `is_*_known`: a member without the instance answers `None`
    IsKnown,
}

/// Phase one of entity retrieval
#[derive(Debug, Clone)]
pub struct GetEntityDetailExecutor {
    user_id: String,
    guid: Guid,
    as_of_time: Option<DateTime<Utc>>,
    mode: RetrievalMode,
    accumulator: Arc<EntityDetailAccumulator>,
}

impl GetEntityDetailExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        guid: Guid,
        as_of_time: Option<DateTime<Utc>>,
        mode: RetrievalMode,
        accumulator: Arc<EntityDetailAccumulator>,
    ) -> Self {
        GetEntityDetailExecutor {
            user_id: user_id.into(),
            guid,
            as_of_time,
            mode,
            accumulator,
        }
    }

    fn check_home_classifications(&self, member: &str, collection: &dyn MetadataCollection) {
        match collection.get_home_classifications(&self.user_id, &self.guid, self.as_of_time) {
            Ok(classifications) => self
                .accumulator
                .record_home_classifications(member, classifications),
            Err(error) => self.accumulator.record_classification_failure(member, error),
        }
    }
}

impl RepositoryExecutor for GetEntityDetailExecutor {
    fn operation(&self) -> &'static str {
        match self.mode {
            RetrievalMode::Get => "get_entity_detail",
            RetrievalMode::IsKnown => "is_entity_known",
        }
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let result = match self.mode {
            RetrievalMode::Get => collection
                .get_entity_detail(&self.user_id, &self.guid, self.as_of_time)
                .map(Some),
            RetrievalMode::IsKnown => collection.is_entity_known(&self.user_id, &self.guid),
        };
        match result {
            Ok(Some(entity)) => self.accumulator.record_entity(member, entity),
            Ok(None) => {
                debug!(member, guid = %self.guid, "entity not known");
                false
            }
            Err(error @ CohortError::EntityProxyOnly { .. }) => {
                self.accumulator.record_proxy_only(member, error);
                self.check_home_classifications(member, collection);
                false
            }
            Err(error) => {
                self.base().capture_error(member, error);
                false
            }
        }
    }
}

/// Phase two of entity retrieval
///
/// Looks up home classifications for one entity, or for every entity of a
/// query page in one scatter. Each member is asked only about entities it
/// neither returned nor was already checked for.
///
/// Phase two has its own base and completion tracker: phase one's is
/// already satisfied or fully reported by the time phase two starts.
#[derive(Debug, Clone)]
pub struct GetHomeClassificationsExecutor {
    user_id: String,
    as_of_time: Option<DateTime<Utc>>,
    targets: Vec<Arc<EntityDetailAccumulator>>,
    base: Arc<AccumulatorBase>,
}

impl GetHomeClassificationsExecutor {
    /// Create the executor; the entity is the accumulator's
    pub fn new(
        user_id: impl Into<String>,
        as_of_time: Option<DateTime<Utc>>,
        accumulator: Arc<EntityDetailAccumulator>,
    ) -> Self {
        Self::for_entities(user_id, as_of_time, vec![accumulator])
    }

    /// Create one executor covering several entities
    pub fn for_entities(
        user_id: impl Into<String>,
        as_of_time: Option<DateTime<Utc>>,
        targets: Vec<Arc<EntityDetailAccumulator>>,
    ) -> Self {
        GetHomeClassificationsExecutor {
            user_id: user_id.into(),
            as_of_time,
            targets,
            base: Arc::new(AccumulatorBase::new(
                "get_home_classifications",
                PrecedenceTable::RETRIEVAL,
            )),
        }
    }

    fn wanted_from<'a>(&'a self, member: &'a str) -> impl Iterator<Item = &'a Arc<EntityDetailAccumulator>> + 'a {
        self.targets
            .iter()
            .filter(move |target| target.needs_classifications_from(member))
    }
}

impl RepositoryExecutor for GetHomeClassificationsExecutor {
    fn operation(&self) -> &'static str {
        "get_home_classifications"
    }

    fn base(&self) -> &AccumulatorBase {
        &self.base
    }

    fn capture_failure(&self, member: &str, error: CohortError) {
        for target in self.wanted_from(member) {
            target.record_classification_failure(member, error.clone());
        }
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        for target in self.wanted_from(member) {
            let guid = target.guid();
            let result = collection.get_home_classifications(&self.user_id, guid, self.as_of_time);
            let Ok(_admitted) = self.base.tracker().admit(member) else {
                debug!(member, guid = %guid, "dropping late home classifications");
                return false;
            };
            match result {
                Ok(classifications) => target.record_home_classifications(member, classifications),
                Err(error) => target.record_classification_failure(member, error),
            }
        }
        false
    }
}

/// Relationship retrieval
#[derive(Debug, Clone)]
pub struct GetRelationshipExecutor {
    user_id: String,
    guid: Guid,
    as_of_time: Option<DateTime<Utc>>,
    mode: RetrievalMode,
    accumulator: Arc<RelationshipAccumulator>,
}

impl GetRelationshipExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        guid: Guid,
        as_of_time: Option<DateTime<Utc>>,
        mode: RetrievalMode,
        accumulator: Arc<RelationshipAccumulator>,
    ) -> Self {
        GetRelationshipExecutor {
            user_id: user_id.into(),
            guid,
            as_of_time,
            mode,
            accumulator,
        }
    }
}

impl RepositoryExecutor for GetRelationshipExecutor {
    fn operation(&self) -> &'static str {
        match self.mode {
            RetrievalMode::Get => "get_relationship",
            RetrievalMode::IsKnown => "is_relationship_known",
        }
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let result = match self.mode {
            RetrievalMode::Get => collection
                .get_relationship(&self.user_id, &self.guid, self.as_of_time)
                .map(Some),
            RetrievalMode::IsKnown => collection.is_relationship_known(&self.user_id, &self.guid),
        };
        match captured(self.base(), member, result) {
            Some(Some(relationship)) => self.accumulator.record_instance(member, relationship),
            _ => false,
        }
    }
}
