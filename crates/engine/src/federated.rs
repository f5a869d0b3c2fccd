//! The federated repository facade
//!
//! [`FederatedMetadataCollection`] presents the cohort as one repository.
//! Each operation builds one executor bound to a fresh accumulator, hands
//! it to [`FederationControl`] and materializes the accumulator's answer.
//!
//! ## Operation families
//!
//! | Family | Dispatch | Answer |
//! |--------|----------|--------|
//! | Maintenance | in turn, local member first | first success, else best error |
//! | Verification | scatter | any member confirming |
//! | Retrieval | scatter, then phase-two scatter for entities | merged copy, else best error |
//! | Query | scatter | merged page; error only if every member failed |
//! | Types | scatter | merged by guid |
//!
//! ## Entity retrieval
//!
//! ```text
//! phase 1: GetEntityDetailExecutor ──▶ every member
//!            │ copy found?
//!            ▼
//! phase 2: GetHomeClassificationsExecutor ──▶ members that neither returned
//!                                             a copy nor were checked, minus
//!                                             members that timed out
//!            ▼
//! seal ──▶ merged entity
//! ```
//!
//! Entity query results get the same phase-two treatment, one batched
//! scatter per page, when `augment_query_classifications` is set.
//!
//! ## Query pages
//!
//! Members answer a widened window of their own ordering. When a copy inside
//! the merged window came from a member other than its home, while the home
//! member answered without it, the home copy may have sorted past the home
//! member's window. Stale copies can also push a member's own copies out of
//! its window, so the merged order is only trusted up to the earliest member
//! cut. Otherwise the query is repeated for whole member results.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use cohort_concurrency::{
    EntityDetailAccumulator, HistoryAccumulator, InstancesAccumulator, MaintenanceAccumulator,
    RelationshipAccumulator, TypeDefAccumulator, VerificationAccumulator, WaitOutcome,
};
use cohort_core::{
    AttributeTypeDef, CohortError, CohortResult, EntityDetail, EntityProxy, Guid, HistoryParams,
    Instance, InstanceProperties, InstanceStatus, MetadataCollection, NewEntity, NewRelationship,
    Page, PagingParams, PropertyMatch, Relationship, TypeDef, TypeDefCategory, TypeDefGallery,
};
use cohort_executor::{
    AddEntityExecutor, AddRelationshipExecutor, EntityChange, EntityMaintenanceExecutor,
    EntityQuery, FindEntitiesExecutor, FindRelationshipsExecutor, GetEntityDetailExecutor,
    GetEntityHistoryExecutor, GetHomeClassificationsExecutor, GetRelationshipExecutor,
    GetRelationshipHistoryExecutor, PurgeExecutor, PurgeTarget, RelationshipChange,
    RelationshipMaintenanceExecutor, RelationshipQuery, RepositoryExecutor, RetrievalMode,
    TypeDefQuery, TypeDefQueryExecutor, TypeVerification, VerifyTypeExecutor,
};
use tracing::{debug, warn};

use crate::config::FederationConfig;
use crate::control::FederationControl;
use crate::registry::{CohortMember, CohortRegistry};

/// One logical repository over every registered member
#[derive(Debug)]
pub struct FederatedMetadataCollection {
    config: FederationConfig,
    registry: Arc<CohortRegistry>,
    control: FederationControl,
}

impl FederatedMetadataCollection {
    /// Create a facade with an empty registry
    ///
    /// # Errors
    ///
    /// Returns `InvalidParameter` for an invalid config and `RepositoryError`
    /// if the worker pool cannot be started.
    pub fn new(config: FederationConfig) -> CohortResult<Self> {
        Self::with_registry(config, Arc::new(CohortRegistry::new()))
    }

    /// Create a facade over an existing, possibly shared, registry
    pub fn with_registry(config: FederationConfig, registry: Arc<CohortRegistry>) -> CohortResult<Self> {
        let control = FederationControl::new(&config)?;
        debug!(
            target: "cohort::federation",
            workers = config.worker_threads,
            max_wait_ms = config.max_wait_ms,
            parallel = config.parallel_queries,
            "federation started"
        );
        Ok(FederatedMetadataCollection {
            config,
            registry,
            control,
        })
    }

    /// Create a facade configured from a `cohort.toml` file
    pub fn from_config_file(path: &Path) -> CohortResult<Self> {
        Self::new(FederationConfig::from_file(path)?)
    }

    /// Active configuration
    pub fn config(&self) -> &FederationConfig {
        &self.config
    }

    /// Cohort membership
    pub fn registry(&self) -> &Arc<CohortRegistry> {
        &self.registry
    }

    /// Dispatch layer, for metrics
    pub fn control(&self) -> &FederationControl {
        &self.control
    }

    /// Add a member to the cohort
    pub fn register(&self, member: Arc<dyn MetadataCollection>) -> bool {
        self.registry.register(member)
    }

    /// Remove a member from the cohort
    pub fn unregister(&self, id: &str) -> bool {
        self.registry.unregister(id)
    }

    // =========================================================================
    // Types
    // =========================================================================

    /// Every type definition known to the cohort, merged by guid
    pub fn get_all_types(&self, user_id: &str) -> CohortResult<TypeDefGallery> {
        let accumulator = self.gather_types(user_id, TypeDefQuery::All);
        let (gallery, conflicts) = accumulator.gallery()?;
        if !conflicts.is_empty() {
            debug!(
                target: "cohort::federation",
                conflicts = conflicts.len(),
                "type name conflicts resolved in gallery"
            );
        }
        Ok(gallery)
    }

    /// Type definitions of one category
    pub fn find_type_defs_by_category(
        &self,
        user_id: &str,
        category: TypeDefCategory,
    ) -> CohortResult<Vec<TypeDef>> {
        self.gather_types(user_id, TypeDefQuery::ByCategory(category))
            .type_defs()
    }

    /// Look up a type definition by guid
    pub fn get_type_def_by_guid(&self, user_id: &str, guid: &Guid) -> CohortResult<TypeDef> {
        require_guid(guid, "type guid")?;
        self.gather_types(user_id, TypeDefQuery::ByGuid(guid.clone()))
            .type_def()?
            .ok_or_else(|| CohortError::type_def_not_known(format!("no type with guid {}", guid)))
    }

    /// Look up a type definition by name
    pub fn get_type_def_by_name(&self, user_id: &str, name: &str) -> CohortResult<TypeDef> {
        if name.is_empty() {
            return Err(CohortError::invalid_parameter("type name must not be empty"));
        }
        self.gather_types(user_id, TypeDefQuery::ByName(name.to_string()))
            .type_def()?
            .ok_or_else(|| CohortError::type_def_not_known(format!("no type named {}", name)))
    }

    /// True if any member holds a matching definition
    pub fn verify_type_def(&self, user_id: &str, type_def: &TypeDef) -> CohortResult<bool> {
        self.verify(
            user_id,
            "verify_type_def",
            TypeVerification::TypeDef(type_def.clone()),
        )
    }

    /// True if any member holds a matching attribute definition
    pub fn verify_attribute_type_def(
        &self,
        user_id: &str,
        attribute_type_def: &AttributeTypeDef,
    ) -> CohortResult<bool> {
        self.verify(
            user_id,
            "verify_attribute_type_def",
            TypeVerification::AttributeTypeDef(attribute_type_def.clone()),
        )
    }

    fn gather_types(&self, user_id: &str, query: TypeDefQuery) -> Arc<TypeDefAccumulator> {
        let members = self.registry.members();
        let accumulator = Arc::new(TypeDefAccumulator::new(operation_of_type_query(&query)));
        let executor = TypeDefQueryExecutor::new(user_id, query, Arc::clone(&accumulator));
        self.control.scatter(Arc::new(executor), &members);
        accumulator.base().tracker().seal();
        accumulator
    }

    fn verify(
        &self,
        user_id: &str,
        operation: &'static str,
        definition: TypeVerification,
    ) -> CohortResult<bool> {
        let members = self.registry.members();
        let accumulator = Arc::new(VerificationAccumulator::new(operation));
        let executor = VerifyTypeExecutor::new(user_id, definition, Arc::clone(&accumulator));
        self.control.scatter(Arc::new(executor), &members);
        accumulator.base().tracker().seal();
        Ok(accumulator.result()?.unwrap_or(false))
    }

    // =========================================================================
    // Entity retrieval
    // =========================================================================

    /// The entity if any member holds it
    pub fn is_entity_known(&self, user_id: &str, guid: &Guid) -> CohortResult<Option<EntityDetail>> {
        require_guid(guid, "entity guid")?;
        match self.retrieve_entity(user_id, guid, None, RetrievalMode::IsKnown) {
            Err(error) if error.is_not_known() => Ok(None),
            other => other,
        }
    }

    /// The merged entity with every classification the cohort holds for it
    ///
    /// # Errors
    ///
    /// `EntityNotKnown` if no member holds it; otherwise the highest
    /// precedence error captured when no copy was found.
    pub fn get_entity_detail(
        &self,
        user_id: &str,
        guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
    ) -> CohortResult<EntityDetail> {
        require_guid(guid, "entity guid")?;
        self.retrieve_entity(user_id, guid, as_of_time, RetrievalMode::Get)?
            .ok_or_else(|| CohortError::entity_not_known(guid))
    }

    fn retrieve_entity(
        &self,
        user_id: &str,
        guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
        mode: RetrievalMode,
    ) -> CohortResult<Option<EntityDetail>> {
        let members = self.registry.members();
        let operation = match mode {
            RetrievalMode::Get => "get_entity_detail",
            RetrievalMode::IsKnown => "is_entity_known",
        };
        let accumulator = Arc::new(EntityDetailAccumulator::new(operation, guid.clone()));
        let executor = GetEntityDetailExecutor::new(
            user_id,
            guid.clone(),
            as_of_time,
            mode,
            Arc::clone(&accumulator),
        );
        let outcome = self.control.scatter(Arc::new(executor), &members);
        self.top_up_classifications(user_id, as_of_time, &accumulator, &members, &outcome);
        accumulator.base().tracker().seal();
        accumulator.result()
    }

    /// Phase two: ask the remaining members for classifications homed there
    fn top_up_classifications(
        &self,
        user_id: &str,
        as_of_time: Option<DateTime<Utc>>,
        accumulator: &Arc<EntityDetailAccumulator>,
        members: &[CohortMember],
        phase_one: &WaitOutcome,
    ) {
        self.top_up_many(
            user_id,
            as_of_time,
            std::slice::from_ref(accumulator),
            members,
            phase_one,
        );
    }

    /// Phase two for several entities at once. Members that timed out in
    /// phase one are not asked again.
    fn top_up_many(
        &self,
        user_id: &str,
        as_of_time: Option<DateTime<Utc>>,
        targets: &[Arc<EntityDetailAccumulator>],
        members: &[CohortMember],
        phase_one: &WaitOutcome,
    ) {
        let timed_out: &[String] = match phase_one {
            WaitOutcome::TimedOut { outstanding } => outstanding,
            _ => &[],
        };
        let phase_two: Vec<CohortMember> = members
            .iter()
            .filter(|m| !timed_out.iter().any(|t| t == m.id()))
            .filter(|m| targets.iter().any(|t| t.needs_classifications_from(m.id())))
            .cloned()
            .collect();
        if phase_two.is_empty() {
            return;
        }
        debug!(
            target: "cohort::federation",
            entities = targets.len(),
            members = phase_two.len(),
            "looking up home classifications"
        );
        let executor =
            GetHomeClassificationsExecutor::for_entities(user_id, as_of_time, targets.to_vec());
        self.control.scatter(Arc::new(executor), &phase_two);
    }

    /// Version history of an entity, merged across members
    pub fn get_entity_detail_history(
        &self,
        user_id: &str,
        guid: &Guid,
        history: &HistoryParams,
    ) -> CohortResult<Page<EntityDetail>> {
        require_guid(guid, "entity guid")?;
        let members = self.registry.members();
        let accumulator = Arc::new(HistoryAccumulator::new(
            "get_entity_detail_history",
            history.clone(),
        ));
        let executor = GetEntityHistoryExecutor::new(
            user_id,
            guid.clone(),
            history.clone(),
            Arc::clone(&accumulator),
        );
        self.control.scatter(Arc::new(executor), &members);
        accumulator.base().tracker().seal();
        accumulator.results()
    }

    // =========================================================================
    // Entity queries
    // =========================================================================

    /// Entities matching property values, as one merged page
    pub fn find_entities_by_property(
        &self,
        user_id: &str,
        entity_type_guid: Option<&Guid>,
        match_properties: Option<&PropertyMatch>,
        limit_by_classifications: &[String],
        paging: &PagingParams,
    ) -> CohortResult<Page<EntityDetail>> {
        self.find_entities(
            user_id,
            EntityQuery::ByProperty {
                type_guid: entity_type_guid.cloned(),
                match_properties: match_properties.cloned(),
                limit_by_classifications: limit_by_classifications.to_vec(),
            },
            "find_entities_by_property",
            paging,
        )
    }

    /// Entities carrying a classification, as one merged page
    pub fn find_entities_by_classification(
        &self,
        user_id: &str,
        entity_type_guid: Option<&Guid>,
        classification_name: &str,
        match_classification_properties: Option<&PropertyMatch>,
        paging: &PagingParams,
    ) -> CohortResult<Page<EntityDetail>> {
        if classification_name.is_empty() {
            return Err(CohortError::invalid_parameter(
                "classification name must not be empty",
            ));
        }
        self.find_entities(
            user_id,
            EntityQuery::ByClassification {
                type_guid: entity_type_guid.cloned(),
                classification_name: classification_name.to_string(),
                match_properties: match_classification_properties.cloned(),
            },
            "find_entities_by_classification",
            paging,
        )
    }

    fn find_entities(
        &self,
        user_id: &str,
        query: EntityQuery,
        operation: &'static str,
        paging: &PagingParams,
    ) -> CohortResult<Page<EntityDetail>> {
        paging.validate()?;
        let members = self.registry.members();
        let (accumulator, outcome) = self.gather(operation, paging, &members, |accumulator| {
            FindEntitiesExecutor::new(user_id, query.clone(), accumulator)
        });
        let page = accumulator.results()?;
        if !self.config.augment_query_classifications || page.is_empty() {
            return Ok(page);
        }
        // Classifications never decide membership or order of the merged
        // set, so topping up the cut page equals topping up before the cut.
        let items = self.augment_query_results(
            user_id,
            operation,
            paging.as_of_time,
            &accumulator,
            page.items,
            &members,
            &outcome,
        );
        Ok(Page {
            items,
            more_available: page.more_available,
        })
    }

    /// Scatter a query and merge the answers.
    ///
    /// If the widened member windows let a drifted reference copy into the
    /// part of the merged order that decides the page, the query is asked
    /// again for every member's whole matching set.
    fn gather<I, E>(
        &self,
        operation: &'static str,
        paging: &PagingParams,
        members: &[CohortMember],
        executor: impl Fn(Arc<InstancesAccumulator<I>>) -> E,
    ) -> (Arc<InstancesAccumulator<I>>, WaitOutcome)
    where
        I: Instance + Clone,
        E: RepositoryExecutor + 'static,
    {
        let accumulator = Arc::new(InstancesAccumulator::new(operation, paging.clone()));
        let outcome = self
            .control
            .scatter(Arc::new(executor(Arc::clone(&accumulator))), members);
        accumulator.base().tracker().seal();
        if !accumulator.needs_full_merge() {
            return (accumulator, outcome);
        }

        debug!(
            target: "cohort::federation",
            operation,
            unconfirmed = accumulator.unconfirmed_in_window().len(),
            "member windows disagree with their home copies; merging whole member results"
        );
        let full = Arc::new(InstancesAccumulator::full_merge(operation, paging.clone()));
        let outcome = self
            .control
            .scatter(Arc::new(executor(Arc::clone(&full))), members);
        full.base().tracker().seal();
        (full, outcome)
    }

    /// Top up query results with classifications homed at members that did
    /// not return them, in one phase-two scatter for the whole page
    #[allow(clippy::too_many_arguments)]
    fn augment_query_results(
        &self,
        user_id: &str,
        operation: &'static str,
        as_of_time: Option<DateTime<Utc>>,
        query: &InstancesAccumulator<EntityDetail>,
        entities: Vec<EntityDetail>,
        members: &[CohortMember],
        outcome: &WaitOutcome,
    ) -> Vec<EntityDetail> {
        let seeded: Vec<Option<Arc<EntityDetailAccumulator>>> = entities
            .iter()
            .map(|entity| {
                let guid = entity.guid();
                query.reporter_of(guid).map(|reported_by| {
                    Arc::new(EntityDetailAccumulator::seeded(
                        operation,
                        entity.clone(),
                        &reported_by,
                        query.contributors_of(guid),
                    ))
                })
            })
            .collect();
        let targets: Vec<Arc<EntityDetailAccumulator>> = seeded.iter().flatten().cloned().collect();
        self.top_up_many(user_id, as_of_time, &targets, members, outcome);

        entities
            .into_iter()
            .zip(seeded)
            .map(|(entity, seeded)| {
                let Some(seeded) = seeded else {
                    return entity;
                };
                seeded.base().tracker().seal();
                match seeded.result() {
                    Ok(Some(augmented)) => augmented,
                    Ok(None) => entity,
                    Err(error) => {
                        warn!(
                            target: "cohort::federation",
                            guid = %entity.guid(),
                            "could not add home classifications to query result: {}",
                            error
                        );
                        entity
                    }
                }
            })
            .collect()
    }

    // =========================================================================
    // Relationships
    // =========================================================================

    /// Relationships with the entity at either end, as one merged page
    ///
    /// Members that do not know the entity contribute an empty result.
    pub fn get_relationships_for_entity(
        &self,
        user_id: &str,
        entity_guid: &Guid,
        relationship_type_guid: Option<&Guid>,
        paging: &PagingParams,
    ) -> CohortResult<Page<Relationship>> {
        require_guid(entity_guid, "entity guid")?;
        self.find_relationships(
            user_id,
            RelationshipQuery::ForEntity {
                entity_guid: entity_guid.clone(),
                type_guid: relationship_type_guid.cloned(),
            },
            "get_relationships_for_entity",
            paging,
        )
    }

    /// Relationships matching property values, as one merged page
    pub fn find_relationships_by_property(
        &self,
        user_id: &str,
        relationship_type_guid: Option<&Guid>,
        match_properties: Option<&PropertyMatch>,
        paging: &PagingParams,
    ) -> CohortResult<Page<Relationship>> {
        self.find_relationships(
            user_id,
            RelationshipQuery::ByProperty {
                type_guid: relationship_type_guid.cloned(),
                match_properties: match_properties.cloned(),
            },
            "find_relationships_by_property",
            paging,
        )
    }

    fn find_relationships(
        &self,
        user_id: &str,
        query: RelationshipQuery,
        operation: &'static str,
        paging: &PagingParams,
    ) -> CohortResult<Page<Relationship>> {
        paging.validate()?;
        let members = self.registry.members();
        let (accumulator, _) = self.gather(operation, paging, &members, |accumulator| {
            FindRelationshipsExecutor::new(user_id, query.clone(), accumulator)
        });
        accumulator.results()
    }

    /// The relationship if any member holds it
    pub fn is_relationship_known(
        &self,
        user_id: &str,
        guid: &Guid,
    ) -> CohortResult<Option<Relationship>> {
        require_guid(guid, "relationship guid")?;
        match self.retrieve_relationship(user_id, guid, None, RetrievalMode::IsKnown) {
            Err(error) if error.is_not_known() => Ok(None),
            other => other,
        }
    }

    /// The merged relationship
    pub fn get_relationship(
        &self,
        user_id: &str,
        guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
    ) -> CohortResult<Relationship> {
        require_guid(guid, "relationship guid")?;
        self.retrieve_relationship(user_id, guid, as_of_time, RetrievalMode::Get)?
            .ok_or_else(|| CohortError::relationship_not_known(guid))
    }

    fn retrieve_relationship(
        &self,
        user_id: &str,
        guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
        mode: RetrievalMode,
    ) -> CohortResult<Option<Relationship>> {
        let members = self.registry.members();
        let operation = match mode {
            RetrievalMode::Get => "get_relationship",
            RetrievalMode::IsKnown => "is_relationship_known",
        };
        let accumulator = Arc::new(RelationshipAccumulator::new(operation, guid.clone()));
        let executor = GetRelationshipExecutor::new(
            user_id,
            guid.clone(),
            as_of_time,
            mode,
            Arc::clone(&accumulator),
        );
        self.control.scatter(Arc::new(executor), &members);
        accumulator.base().tracker().seal();
        accumulator.result()
    }

    /// Version history of a relationship, merged across members
    pub fn get_relationship_history(
        &self,
        user_id: &str,
        guid: &Guid,
        history: &HistoryParams,
    ) -> CohortResult<Page<Relationship>> {
        require_guid(guid, "relationship guid")?;
        let members = self.registry.members();
        let accumulator = Arc::new(HistoryAccumulator::new(
            "get_relationship_history",
            history.clone(),
        ));
        let executor = GetRelationshipHistoryExecutor::new(
            user_id,
            guid.clone(),
            history.clone(),
            Arc::clone(&accumulator),
        );
        self.control.scatter(Arc::new(executor), &members);
        accumulator.base().tracker().seal();
        accumulator.results()
    }

    // =========================================================================
    // Entity maintenance
    // =========================================================================

    /// Create an entity in the first member that accepts it, the local
    /// member first
    pub fn add_entity(&self, user_id: &str, entity: &NewEntity) -> CohortResult<EntityDetail> {
        require_guid(&entity.type_def_guid, "entity type guid")?;
        let accumulator = Arc::new(MaintenanceAccumulator::new("add_entity"));
        let executor = AddEntityExecutor::new(
            user_id,
            entity.clone(),
            self.preferred(),
            Arc::clone(&accumulator),
        );
        self.maintain(executor, &accumulator)
    }

    /// Change an entity's status
    pub fn update_entity_status(
        &self,
        user_id: &str,
        guid: &Guid,
        status: InstanceStatus,
    ) -> CohortResult<EntityDetail> {
        self.change_entity(user_id, guid, EntityChange::UpdateStatus(status))
    }

    /// Replace an entity's properties
    pub fn update_entity_properties(
        &self,
        user_id: &str,
        guid: &Guid,
        properties: &InstanceProperties,
    ) -> CohortResult<EntityDetail> {
        self.change_entity(
            user_id,
            guid,
            EntityChange::UpdateProperties(properties.clone()),
        )
    }

    /// Soft-delete an entity
    pub fn delete_entity(&self, user_id: &str, guid: &Guid) -> CohortResult<EntityDetail> {
        self.change_entity(user_id, guid, EntityChange::Delete)
    }

    /// Undo a soft delete
    pub fn restore_entity(&self, user_id: &str, guid: &Guid) -> CohortResult<EntityDetail> {
        self.change_entity(user_id, guid, EntityChange::Restore)
    }

    /// Attach a classification
    pub fn classify_entity(
        &self,
        user_id: &str,
        entity_guid: &Guid,
        classification_name: &str,
        properties: &InstanceProperties,
    ) -> CohortResult<EntityDetail> {
        if classification_name.is_empty() {
            return Err(CohortError::invalid_parameter(
                "classification name must not be empty",
            ));
        }
        self.change_entity(
            user_id,
            entity_guid,
            EntityChange::Classify {
                name: classification_name.to_string(),
                properties: properties.clone(),
            },
        )
    }

    /// Remove a classification
    pub fn declassify_entity(
        &self,
        user_id: &str,
        entity_guid: &Guid,
        classification_name: &str,
    ) -> CohortResult<EntityDetail> {
        self.change_entity(
            user_id,
            entity_guid,
            EntityChange::Declassify {
                name: classification_name.to_string(),
            },
        )
    }

    /// Remove a soft-deleted entity permanently
    pub fn purge_entity(&self, user_id: &str, guid: &Guid) -> CohortResult<()> {
        require_guid(guid, "entity guid")?;
        self.purge(user_id, PurgeTarget::Entity(guid.clone()))
    }

    fn change_entity(
        &self,
        user_id: &str,
        guid: &Guid,
        change: EntityChange,
    ) -> CohortResult<EntityDetail> {
        require_guid(guid, "entity guid")?;
        let accumulator = Arc::new(MaintenanceAccumulator::new(change.operation()));
        let executor = EntityMaintenanceExecutor::new(
            user_id,
            guid.clone(),
            change,
            self.preferred(),
            Arc::clone(&accumulator),
        );
        self.maintain(executor, &accumulator)
    }

    // =========================================================================
    // Relationship maintenance
    // =========================================================================

    /// Create a relationship in the first member that accepts it.
    ///
    /// Both ends are retrieved from the cohort first; a member that knows an
    /// end only by guid is given a proxy for it before the relationship is
    /// created there.
    pub fn add_relationship(
        &self,
        user_id: &str,
        relationship: &NewRelationship,
    ) -> CohortResult<Relationship> {
        require_guid(&relationship.type_def_guid, "relationship type guid")?;
        let one = self.get_entity_detail(user_id, &relationship.entity_one_guid, None)?;
        let two = self.get_entity_detail(user_id, &relationship.entity_two_guid, None)?;
        let accumulator = Arc::new(MaintenanceAccumulator::new("add_relationship"));
        let executor = AddRelationshipExecutor::new(
            user_id,
            relationship.clone(),
            EntityProxy::from(&one),
            EntityProxy::from(&two),
            self.preferred(),
            Arc::clone(&accumulator),
        );
        self.maintain(executor, &accumulator)
    }

    /// Soft-delete a relationship
    pub fn delete_relationship(&self, user_id: &str, guid: &Guid) -> CohortResult<Relationship> {
        self.change_relationship(user_id, guid, RelationshipChange::Delete)
    }

    /// Undo a soft delete
    pub fn restore_relationship(&self, user_id: &str, guid: &Guid) -> CohortResult<Relationship> {
        self.change_relationship(user_id, guid, RelationshipChange::Restore)
    }

    /// Remove a soft-deleted relationship permanently
    pub fn purge_relationship(&self, user_id: &str, guid: &Guid) -> CohortResult<()> {
        require_guid(guid, "relationship guid")?;
        self.purge(user_id, PurgeTarget::Relationship(guid.clone()))
    }

    fn change_relationship(
        &self,
        user_id: &str,
        guid: &Guid,
        change: RelationshipChange,
    ) -> CohortResult<Relationship> {
        require_guid(guid, "relationship guid")?;
        let operation = match change {
            RelationshipChange::Delete => "delete_relationship",
            RelationshipChange::Restore => "restore_relationship",
        };
        let accumulator = Arc::new(MaintenanceAccumulator::new(operation));
        let executor = RelationshipMaintenanceExecutor::new(
            user_id,
            guid.clone(),
            change,
            self.preferred(),
            Arc::clone(&accumulator),
        );
        self.maintain(executor, &accumulator)
    }

    fn purge(&self, user_id: &str, target: PurgeTarget) -> CohortResult<()> {
        let operation = match target {
            PurgeTarget::Entity(_) => "purge_entity",
            PurgeTarget::Relationship(_) => "purge_relationship",
        };
        let accumulator = Arc::new(MaintenanceAccumulator::new(operation));
        let executor =
            PurgeExecutor::new(user_id, target, self.preferred(), Arc::clone(&accumulator));
        self.maintain(executor, &accumulator)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn preferred(&self) -> Option<String> {
        self.config.local_metadata_collection_id.clone()
    }

    /// Ask members in turn until one accepts the change, giving each
    /// member the wait budget
    fn maintain<E, T>(&self, executor: E, accumulator: &MaintenanceAccumulator<T>) -> CohortResult<T>
    where
        E: RepositoryExecutor + 'static,
        T: Clone,
    {
        let members = self.registry.members();
        let operation = executor.operation();
        self.control.in_turn_bounded(Arc::new(executor), &members);
        accumulator.base().tracker().seal();
        accumulator.result()?.ok_or_else(|| {
            CohortError::repository_error(format!(
                "no cohort member available for {}",
                operation
            ))
        })
    }
}

fn require_guid(guid: &Guid, what: &str) -> CohortResult<()> {
    if guid.is_empty() {
        return Err(CohortError::invalid_parameter(format!(
            "{} must not be empty",
            what
        )));
    }
    Ok(())
}

fn operation_of_type_query(query: &TypeDefQuery) -> &'static str {
    match query {
        TypeDefQuery::All => "get_all_types",
        TypeDefQuery::ByCategory(_) => "find_type_defs_by_category",
        TypeDefQuery::ByGuid(_) => "get_type_def_by_guid",
        TypeDefQuery::ByName(_) => "get_type_def_by_name",
    }
}
