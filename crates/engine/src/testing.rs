//! In-memory cohort member
//!
//! [`InMemoryCollection`] implements the whole [`MetadataCollection`]
//! surface over `DashMap`s so federation behaviour can be exercised without
//! a real repository. It keeps version chains (newest first) for history and
//! as-of queries, stores reference copies and proxies of entities homed
//! elsewhere, and can hold classifications homed here on entities it only
//! knows by proxy.
//!
//! # Fault injection
//!
//! | Call | Effect |
//! |------|--------|
//! | `fail_operation(op, err)` | every call of `op` fails with `err` |
//! | `clear_failures()` | remove all injected failures |
//! | `set_delay(d)` | every call sleeps `d` first |
//!
//! Reference copies are read-only: maintenance on an entity or relationship
//! homed at another member fails with `RepositoryError`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use cohort_core::{
    sort_history, sort_instances, AttributeTypeDef, Classification, CohortError, CohortResult,
    EntityDetail, EntityProxy, Guid, HistoryParams, Instance, InstanceHeader, InstanceProperties,
    InstanceStatus, MetadataCollection, NewEntity, NewRelationship, PagingParams, PropertyMatch,
    Relationship, TypeDef, TypeDefCategory, TypeDefGallery,
};
use dashmap::DashMap;
use rustc_hash::FxHashMap;
use tracing::debug;

/// Newest version first
type VersionChain<T> = VecDeque<T>;

/// A member repository held entirely in memory
#[derive(Debug)]
pub struct InMemoryCollection {
    id: String,
    entities: DashMap<Guid, VersionChain<EntityDetail>>,
    proxies: DashMap<Guid, EntityProxy>,
    home_classifications: DashMap<Guid, FxHashMap<String, Classification>>,
    relationships: DashMap<Guid, VersionChain<Relationship>>,
    type_defs: DashMap<Guid, TypeDef>,
    attribute_type_defs: DashMap<Guid, AttributeTypeDef>,
    failures: DashMap<String, CohortError>,
    delay_ms: AtomicU64,
    calls: DashMap<String, u64>,
}

impl InMemoryCollection {
    /// Create an empty member with metadata collection id `id`
    pub fn new(id: impl Into<String>) -> Self {
        InMemoryCollection {
            id: id.into(),
            entities: DashMap::new(),
            proxies: DashMap::new(),
            home_classifications: DashMap::new(),
            relationships: DashMap::new(),
            type_defs: DashMap::new(),
            attribute_type_defs: DashMap::new(),
            failures: DashMap::new(),
            delay_ms: AtomicU64::new(0),
            calls: DashMap::new(),
        }
    }

    // ==================== Seeding ====================

    /// Store a type definition
    pub fn save_type_def(&self, type_def: TypeDef) {
        self.type_defs.insert(type_def.guid.clone(), type_def);
    }

    /// Store an attribute type definition
    pub fn save_attribute_type_def(&self, attribute_type_def: AttributeTypeDef) {
        self.attribute_type_defs
            .insert(attribute_type_def.guid.clone(), attribute_type_def);
    }

    /// Store an entity as the newest version of its chain.
    ///
    /// Entities homed elsewhere are kept as reference copies.
    pub fn save_entity(&self, entity: EntityDetail) {
        self.proxies.remove(entity.guid());
        self.entities
            .entry(entity.guid().clone())
            .or_default()
            .push_front(entity);
    }

    /// Store a proxy for an entity held elsewhere
    pub fn save_proxy(&self, proxy: EntityProxy) {
        self.proxies.insert(proxy.guid().clone(), proxy);
    }

    /// Store a classification homed here on an entity this member does not
    /// hold in full
    pub fn save_home_classification(&self, entity_guid: &Guid, classification: Classification) {
        self.home_classifications
            .entry(entity_guid.clone())
            .or_default()
            .insert(classification.name.clone(), classification);
    }

    /// Store a relationship as the newest version of its chain
    pub fn save_relationship(&self, relationship: Relationship) {
        self.relationships
            .entry(relationship.guid().clone())
            .or_default()
            .push_front(relationship);
    }

    // ==================== Fault injection ====================

    /// Make every call of `operation` fail with `error`
    pub fn fail_operation(&self, operation: &str, error: CohortError) {
        self.failures.insert(operation.to_string(), error);
    }

    /// Remove every injected failure
    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Make every call sleep for `delay` before answering
    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of calls made to `operation`
    pub fn call_count(&self, operation: &str) -> u64 {
        self.calls.get(operation).map_or(0, |c| *c)
    }

    /// Latest stored copy of an entity, ignoring injected failures
    pub fn stored_entity(&self, guid: &Guid) -> Option<EntityDetail> {
        self.entities.get(guid).and_then(|chain| chain.front().cloned())
    }

    /// True if a proxy for `guid` is stored
    pub fn holds_proxy(&self, guid: &Guid) -> bool {
        self.proxies.contains_key(guid)
    }

    // ==================== Internals ====================

    fn enter(&self, operation: &str) -> CohortResult<()> {
        *self.calls.entry(operation.to_string()).or_insert(0) += 1;
        let delay = self.delay_ms.load(Ordering::Relaxed);
        if delay > 0 {
            std::thread::sleep(Duration::from_millis(delay));
        }
        if let Some(error) = self.failures.get(operation) {
            debug!(member = %self.id, operation, "injected failure");
            return Err(error.clone());
        }
        Ok(())
    }

    fn entity_at(&self, guid: &Guid, as_of_time: Option<DateTime<Utc>>) -> Option<EntityDetail> {
        let chain = self.entities.get(guid)?;
        at_time(&chain, as_of_time).cloned()
    }

    fn relationship_at(
        &self,
        guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
    ) -> Option<Relationship> {
        let chain = self.relationships.get(guid)?;
        at_time(&chain, as_of_time).cloned()
    }

    fn knows_entity(&self, guid: &Guid) -> bool {
        self.entities.contains_key(guid) || self.proxies.contains_key(guid)
    }

    /// Latest copy of an entity homed at this member
    fn homed_entity(&self, guid: &Guid) -> CohortResult<EntityDetail> {
        match self.entity_at(guid, None) {
            Some(entity) if entity.home_metadata_collection_id() == self.id => Ok(entity),
            Some(entity) => Err(read_only(guid, entity.home_metadata_collection_id())),
            None if self.proxies.contains_key(guid) => Err(CohortError::entity_proxy_only(guid)),
            None => Err(CohortError::entity_not_known(guid)),
        }
    }

    fn homed_relationship(&self, guid: &Guid) -> CohortResult<Relationship> {
        match self.relationship_at(guid, None) {
            Some(r) if r.home_metadata_collection_id() == self.id => Ok(r),
            Some(r) => Err(read_only(guid, r.home_metadata_collection_id())),
            None => Err(CohortError::relationship_not_known(guid)),
        }
    }

    fn store_entity_change(
        &self,
        user_id: &str,
        mut entity: EntityDetail,
        change: impl FnOnce(&mut EntityDetail),
    ) -> EntityDetail {
        change(&mut entity);
        touch(&mut entity.header, user_id);
        self.save_entity(entity.clone());
        entity
    }

    fn store_relationship_change(
        &self,
        user_id: &str,
        mut relationship: Relationship,
        change: impl FnOnce(&mut Relationship),
    ) -> Relationship {
        change(&mut relationship);
        touch(&mut relationship.header, user_id);
        self.save_relationship(relationship.clone());
        relationship
    }

    fn proxy_for(&self, guid: &Guid) -> CohortResult<EntityProxy> {
        if let Some(entity) = self.entity_at(guid, None) {
            return Ok(EntityProxy::from(&entity));
        }
        self.proxies
            .get(guid)
            .map(|p| p.clone())
            .ok_or_else(|| CohortError::entity_not_known(guid))
    }

    fn latest_entities(&self, paging: &PagingParams) -> Vec<EntityDetail> {
        let guids: Vec<Guid> = self.entities.iter().map(|e| e.key().clone()).collect();
        guids
            .iter()
            .filter_map(|guid| self.entity_at(guid, paging.as_of_time))
            .filter(|e| visible(e.header.status, paging))
            .collect()
    }

    fn latest_relationships(&self, paging: &PagingParams) -> Vec<Relationship> {
        let guids: Vec<Guid> = self.relationships.iter().map(|r| r.key().clone()).collect();
        guids
            .iter()
            .filter_map(|guid| self.relationship_at(guid, paging.as_of_time))
            .filter(|r| visible(r.header.status, paging))
            .collect()
    }
}

fn read_only(guid: &Guid, home: &str) -> CohortError {
    CohortError::repository_error(format!(
        "instance {} is a reference copy homed at {}",
        guid, home
    ))
}

/// Newest version whose last change is not after `as_of_time`
fn at_time<I: Instance>(chain: &VersionChain<I>, as_of_time: Option<DateTime<Utc>>) -> Option<&I> {
    match as_of_time {
        None => chain.front(),
        Some(time) => chain
            .iter()
            .find(|i| i.header().last_changed().map_or(true, |t| t <= time)),
    }
}

/// Deleted instances only show up when the status filter asks for them
fn visible(status: InstanceStatus, paging: &PagingParams) -> bool {
    if paging.limit_results_by_status.is_empty() {
        status != InstanceStatus::Deleted
    } else {
        paging.admits(status)
    }
}

fn touch(header: &mut InstanceHeader, user_id: &str) {
    header.version += 1;
    header.updated_by = Some(user_id.to_string());
    header.update_time = Some(Utc::now());
}

fn matches(criteria: Option<&PropertyMatch>, properties: &InstanceProperties) -> bool {
    criteria.map_or(true, |m| m.matches(properties))
}

fn of_type<I: Instance>(instance: &I, type_guid: Option<&Guid>) -> bool {
    type_guid.map_or(true, |t| &instance.header().instance_type.type_def_guid == t)
}

fn page_of<I: Instance>(mut items: Vec<I>, paging: &PagingParams) -> Vec<I> {
    sort_instances(&mut items, paging);
    paging.window(items).into_items()
}

fn history_of<I: Instance + Clone>(chain: &VersionChain<I>, params: &HistoryParams) -> Vec<I> {
    let mut versions: Vec<I> = chain
        .iter()
        .filter(|v| {
            let changed = v.header().last_changed();
            params.from_time.map_or(true, |from| changed.map_or(true, |c| c >= from))
                && params.to_time.map_or(true, |to| changed.map_or(true, |c| c <= to))
        })
        .cloned()
        .collect();
    sort_history(&mut versions, params.order);
    params.window(versions).into_items()
}

impl MetadataCollection for InMemoryCollection {
    fn metadata_collection_id(&self) -> &str {
        &self.id
    }

    // ==================== Types ====================

    fn get_all_types(&self, _user_id: &str) -> CohortResult<TypeDefGallery> {
        self.enter("get_all_types")?;
        let mut type_defs: Vec<TypeDef> = self.type_defs.iter().map(|t| t.clone()).collect();
        type_defs.sort_by(|a, b| a.guid.cmp(&b.guid));
        let mut attribute_type_defs: Vec<AttributeTypeDef> =
            self.attribute_type_defs.iter().map(|t| t.clone()).collect();
        attribute_type_defs.sort_by(|a, b| a.guid.cmp(&b.guid));
        Ok(TypeDefGallery {
            attribute_type_defs,
            type_defs,
        })
    }

    fn find_type_defs_by_category(
        &self,
        _user_id: &str,
        category: TypeDefCategory,
    ) -> CohortResult<Vec<TypeDef>> {
        self.enter("find_type_defs_by_category")?;
        let mut found: Vec<TypeDef> = self
            .type_defs
            .iter()
            .filter(|t| t.category == category)
            .map(|t| t.clone())
            .collect();
        found.sort_by(|a, b| a.guid.cmp(&b.guid));
        Ok(found)
    }

    fn get_type_def_by_guid(&self, _user_id: &str, guid: &Guid) -> CohortResult<TypeDef> {
        self.enter("get_type_def_by_guid")?;
        self.type_defs
            .get(guid)
            .map(|t| t.clone())
            .ok_or_else(|| CohortError::type_def_not_known(format!("no type with guid {}", guid)))
    }

    fn get_type_def_by_name(&self, _user_id: &str, name: &str) -> CohortResult<TypeDef> {
        self.enter("get_type_def_by_name")?;
        self.type_defs
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.clone())
            .ok_or_else(|| CohortError::type_def_not_known(format!("no type named {}", name)))
    }

    fn verify_type_def(&self, _user_id: &str, type_def: &TypeDef) -> CohortResult<bool> {
        self.enter("verify_type_def")?;
        match self.type_defs.get(&type_def.guid) {
            None => Ok(false),
            Some(stored) if stored.name == type_def.name && stored.version == type_def.version => {
                Ok(true)
            }
            Some(stored) => Err(CohortError::TypeDefConflict {
                reason: format!(
                    "type {} is held as {} version {}",
                    type_def.guid, stored.name, stored.version
                ),
            }),
        }
    }

    fn verify_attribute_type_def(
        &self,
        _user_id: &str,
        attribute_type_def: &AttributeTypeDef,
    ) -> CohortResult<bool> {
        self.enter("verify_attribute_type_def")?;
        match self.attribute_type_defs.get(&attribute_type_def.guid) {
            None => Ok(false),
            Some(stored) if *stored == *attribute_type_def => Ok(true),
            Some(stored) => Err(CohortError::TypeDefConflict {
                reason: format!(
                    "attribute type {} is held as {} version {}",
                    attribute_type_def.guid, stored.name, stored.version
                ),
            }),
        }
    }

    // ==================== Entity queries ====================

    fn is_entity_known(&self, _user_id: &str, guid: &Guid) -> CohortResult<Option<EntityDetail>> {
        self.enter("is_entity_known")?;
        if let Some(entity) = self.entity_at(guid, None) {
            return Ok(Some(entity));
        }
        if self.proxies.contains_key(guid) {
            return Err(CohortError::entity_proxy_only(guid));
        }
        Ok(None)
    }

    fn get_entity_detail(
        &self,
        _user_id: &str,
        guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
    ) -> CohortResult<EntityDetail> {
        self.enter("get_entity_detail")?;
        if let Some(entity) = self.entity_at(guid, as_of_time) {
            return Ok(entity);
        }
        if self.proxies.contains_key(guid) {
            return Err(CohortError::entity_proxy_only(guid));
        }
        Err(CohortError::entity_not_known(guid))
    }

    fn get_home_classifications(
        &self,
        _user_id: &str,
        entity_guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
    ) -> CohortResult<Vec<Classification>> {
        self.enter("get_home_classifications")?;
        let mut found: FxHashMap<String, Classification> = FxHashMap::default();
        if let Some(entity) = self.entity_at(entity_guid, as_of_time) {
            for c in entity.classifications {
                if c.metadata_collection_id == self.id {
                    found.insert(c.name.clone(), c);
                }
            }
        }
        if let Some(homed) = self.home_classifications.get(entity_guid) {
            for c in homed.values() {
                found.insert(c.name.clone(), c.clone());
            }
        }
        if found.is_empty() && !self.knows_entity(entity_guid) {
            return Err(CohortError::entity_not_known(entity_guid));
        }
        let mut classifications: Vec<Classification> = found.into_values().collect();
        classifications.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(classifications)
    }

    fn get_entity_detail_history(
        &self,
        _user_id: &str,
        guid: &Guid,
        history: &HistoryParams,
    ) -> CohortResult<Vec<EntityDetail>> {
        self.enter("get_entity_detail_history")?;
        match self.entities.get(guid) {
            Some(chain) => Ok(history_of(&chain, history)),
            None if self.proxies.contains_key(guid) => Err(CohortError::entity_proxy_only(guid)),
            None => Err(CohortError::entity_not_known(guid)),
        }
    }

    fn find_entities_by_property(
        &self,
        _user_id: &str,
        entity_type_guid: Option<&Guid>,
        match_properties: Option<&PropertyMatch>,
        limit_by_classifications: &[String],
        paging: &PagingParams,
    ) -> CohortResult<Vec<EntityDetail>> {
        self.enter("find_entities_by_property")?;
        let found = self
            .latest_entities(paging)
            .into_iter()
            .filter(|e| of_type(e, entity_type_guid))
            .filter(|e| matches(match_properties, &e.properties))
            .filter(|e| {
                limit_by_classifications
                    .iter()
                    .all(|name| e.classification(name).is_some())
            })
            .collect();
        Ok(page_of(found, paging))
    }

    fn find_entities_by_classification(
        &self,
        _user_id: &str,
        entity_type_guid: Option<&Guid>,
        classification_name: &str,
        match_classification_properties: Option<&PropertyMatch>,
        paging: &PagingParams,
    ) -> CohortResult<Vec<EntityDetail>> {
        self.enter("find_entities_by_classification")?;
        let found = self
            .latest_entities(paging)
            .into_iter()
            .filter(|e| of_type(e, entity_type_guid))
            .filter(|e| {
                e.classification(classification_name)
                    .map_or(false, |c| matches(match_classification_properties, &c.properties))
            })
            .collect();
        Ok(page_of(found, paging))
    }

    // ==================== Relationship queries ====================

    fn get_relationships_for_entity(
        &self,
        _user_id: &str,
        entity_guid: &Guid,
        relationship_type_guid: Option<&Guid>,
        paging: &PagingParams,
    ) -> CohortResult<Vec<Relationship>> {
        self.enter("get_relationships_for_entity")?;
        if !self.knows_entity(entity_guid) {
            return Err(CohortError::entity_not_known(entity_guid));
        }
        let found = self
            .latest_relationships(paging)
            .into_iter()
            .filter(|r| r.touches(entity_guid))
            .filter(|r| of_type(r, relationship_type_guid))
            .collect();
        Ok(page_of(found, paging))
    }

    fn find_relationships_by_property(
        &self,
        _user_id: &str,
        relationship_type_guid: Option<&Guid>,
        match_properties: Option<&PropertyMatch>,
        paging: &PagingParams,
    ) -> CohortResult<Vec<Relationship>> {
        self.enter("find_relationships_by_property")?;
        let found = self
            .latest_relationships(paging)
            .into_iter()
            .filter(|r| of_type(r, relationship_type_guid))
            .filter(|r| matches(match_properties, &r.properties))
            .collect();
        Ok(page_of(found, paging))
    }

    fn is_relationship_known(&self, _user_id: &str, guid: &Guid) -> CohortResult<Option<Relationship>> {
        self.enter("is_relationship_known")?;
        Ok(self.relationship_at(guid, None))
    }

    fn get_relationship(
        &self,
        _user_id: &str,
        guid: &Guid,
        as_of_time: Option<DateTime<Utc>>,
    ) -> CohortResult<Relationship> {
        self.enter("get_relationship")?;
        self.relationship_at(guid, as_of_time)
            .ok_or_else(|| CohortError::relationship_not_known(guid))
    }

    fn get_relationship_history(
        &self,
        _user_id: &str,
        guid: &Guid,
        history: &HistoryParams,
    ) -> CohortResult<Vec<Relationship>> {
        self.enter("get_relationship_history")?;
        match self.relationships.get(guid) {
            Some(chain) => Ok(history_of(&chain, history)),
            None => Err(CohortError::relationship_not_known(guid)),
        }
    }

    // ==================== Entity maintenance ====================

    fn add_entity(&self, user_id: &str, entity: &NewEntity) -> CohortResult<EntityDetail> {
        self.enter("add_entity")?;
        let instance_type = self
            .type_defs
            .get(&entity.type_def_guid)
            .map(|t| cohort_core::InstanceType {
                type_def_guid: t.guid.clone(),
                type_def_name: t.name.clone(),
                type_def_version: t.version,
                category: t.category,
            })
            .ok_or_else(|| {
                CohortError::type_def_not_known(format!("no type with guid {}", entity.type_def_guid))
            })?;
        let now = Utc::now();
        let mut created = EntityDetail::new(Guid::random(), instance_type, self.id.clone());
        created.header.status = entity.status;
        created.header.created_by = Some(user_id.to_string());
        created.header.create_time = Some(now);
        created.properties = entity.properties.clone();
        created.classifications = entity.classifications.clone();
        self.save_entity(created.clone());
        debug!(member = %self.id, guid = %created.guid(), "entity created");
        Ok(created)
    }

    fn add_entity_proxy(&self, _user_id: &str, proxy: &EntityProxy) -> CohortResult<()> {
        self.enter("add_entity_proxy")?;
        if !self.knows_entity(proxy.guid()) {
            self.save_proxy(proxy.clone());
        }
        Ok(())
    }

    fn update_entity_status(
        &self,
        user_id: &str,
        guid: &Guid,
        status: InstanceStatus,
    ) -> CohortResult<EntityDetail> {
        self.enter("update_entity_status")?;
        let entity = self.homed_entity(guid)?;
        if status == InstanceStatus::Deleted {
            return Err(CohortError::StatusNotSupported {
                reason: "use delete_entity to delete an entity".to_string(),
            });
        }
        Ok(self.store_entity_change(user_id, entity, |e| e.header.status = status))
    }

    fn update_entity_properties(
        &self,
        user_id: &str,
        guid: &Guid,
        properties: &InstanceProperties,
    ) -> CohortResult<EntityDetail> {
        self.enter("update_entity_properties")?;
        let entity = self.homed_entity(guid)?;
        Ok(self.store_entity_change(user_id, entity, |e| e.properties = properties.clone()))
    }

    fn delete_entity(&self, user_id: &str, guid: &Guid) -> CohortResult<EntityDetail> {
        self.enter("delete_entity")?;
        let entity = self.homed_entity(guid)?;
        if entity.header.status == InstanceStatus::Deleted {
            return Err(CohortError::entity_not_known(guid));
        }
        Ok(self.store_entity_change(user_id, entity, |e| {
            e.header.status_on_delete = Some(e.header.status);
            e.header.status = InstanceStatus::Deleted;
        }))
    }

    fn restore_entity(&self, user_id: &str, guid: &Guid) -> CohortResult<EntityDetail> {
        self.enter("restore_entity")?;
        let entity = self.homed_entity(guid)?;
        if entity.header.status != InstanceStatus::Deleted {
            return Err(CohortError::EntityNotDeleted {
                guid: guid.to_string(),
            });
        }
        Ok(self.store_entity_change(user_id, entity, |e| {
            e.header.status = e.header.status_on_delete.take().unwrap_or(InstanceStatus::Active);
        }))
    }

    fn purge_entity(&self, _user_id: &str, guid: &Guid) -> CohortResult<()> {
        self.enter("purge_entity")?;
        let entity = self.homed_entity(guid)?;
        if entity.header.status != InstanceStatus::Deleted {
            return Err(CohortError::EntityNotDeleted {
                guid: guid.to_string(),
            });
        }
        self.entities.remove(guid);
        self.home_classifications.remove(guid);
        self.relationships.retain(|_, chain| {
            chain.front().map_or(false, |r| !r.touches(guid))
        });
        debug!(member = %self.id, guid = %guid, "entity purged");
        Ok(())
    }

    fn classify_entity(
        &self,
        user_id: &str,
        entity_guid: &Guid,
        classification_name: &str,
        properties: &InstanceProperties,
    ) -> CohortResult<EntityDetail> {
        self.enter("classify_entity")?;
        let mut classification = Classification::new(classification_name, self.id.clone());
        classification.properties = properties.clone();
        classification.create_time = Some(Utc::now());

        match self.entity_at(entity_guid, None) {
            Some(entity) if entity.home_metadata_collection_id() == self.id => {
                if entity.classification(classification_name).is_some() {
                    return Err(already_classified(entity_guid, classification_name));
                }
                Ok(self.store_entity_change(user_id, entity, |e| {
                    e.classifications.push(classification)
                }))
            }
            found => {
                // Not homed here: the classification is homed here instead
                let mut entity = match found {
                    Some(entity) => entity,
                    None => {
                        let proxy = self
                            .proxies
                            .get(entity_guid)
                            .map(|p| p.clone())
                            .ok_or_else(|| CohortError::entity_not_known(entity_guid))?;
                        EntityDetail {
                            header: proxy.header,
                            properties: proxy.unique_properties,
                            classifications: Vec::new(),
                        }
                    }
                };
                let exists = entity.classification(classification_name).is_some()
                    || self
                        .home_classifications
                        .get(entity_guid)
                        .map_or(false, |h| h.contains_key(classification_name));
                if exists {
                    return Err(already_classified(entity_guid, classification_name));
                }
                self.save_home_classification(entity_guid, classification);
                if let Some(homed) = self.home_classifications.get(entity_guid) {
                    entity.classifications.extend(homed.values().cloned());
                }
                Ok(entity)
            }
        }
    }

    fn declassify_entity(
        &self,
        user_id: &str,
        entity_guid: &Guid,
        classification_name: &str,
    ) -> CohortResult<EntityDetail> {
        self.enter("declassify_entity")?;
        let removed_here = self
            .home_classifications
            .get_mut(entity_guid)
            .map_or(false, |mut h| h.remove(classification_name).is_some());
        if removed_here {
            return match self.entity_at(entity_guid, None) {
                Some(entity) => Ok(entity),
                None => {
                    let proxy = self.proxy_for(entity_guid)?;
                    Ok(EntityDetail {
                        header: proxy.header,
                        properties: proxy.unique_properties,
                        classifications: Vec::new(),
                    })
                }
            };
        }
        let entity = self.homed_entity(entity_guid)?;
        if entity.classification(classification_name).is_none() {
            return Err(CohortError::ClassificationError {
                reason: format!(
                    "entity {} has no classification {}",
                    entity_guid, classification_name
                ),
            });
        }
        Ok(self.store_entity_change(user_id, entity, |e| {
            e.classifications.retain(|c| c.name != classification_name)
        }))
    }

    // ==================== Relationship maintenance ====================

    fn add_relationship(
        &self,
        user_id: &str,
        relationship: &NewRelationship,
    ) -> CohortResult<Relationship> {
        self.enter("add_relationship")?;
        let instance_type = self
            .type_defs
            .get(&relationship.type_def_guid)
            .map(|t| cohort_core::InstanceType {
                type_def_guid: t.guid.clone(),
                type_def_name: t.name.clone(),
                type_def_version: t.version,
                category: t.category,
            })
            .ok_or_else(|| {
                CohortError::type_def_not_known(format!(
                    "no type with guid {}",
                    relationship.type_def_guid
                ))
            })?;
        let one = self.proxy_for(&relationship.entity_one_guid)?;
        let two = self.proxy_for(&relationship.entity_two_guid)?;
        let mut created = Relationship::new(Guid::random(), instance_type, self.id.clone(), one, two);
        created.header.status = relationship.status;
        created.header.created_by = Some(user_id.to_string());
        created.header.create_time = Some(Utc::now());
        created.properties = relationship.properties.clone();
        self.save_relationship(created.clone());
        debug!(member = %self.id, guid = %created.guid(), "relationship created");
        Ok(created)
    }

    fn delete_relationship(&self, user_id: &str, guid: &Guid) -> CohortResult<Relationship> {
        self.enter("delete_relationship")?;
        let relationship = self.homed_relationship(guid)?;
        if relationship.header.status == InstanceStatus::Deleted {
            return Err(CohortError::relationship_not_known(guid));
        }
        Ok(self.store_relationship_change(user_id, relationship, |r| {
            r.header.status_on_delete = Some(r.header.status);
            r.header.status = InstanceStatus::Deleted;
        }))
    }

    fn restore_relationship(&self, user_id: &str, guid: &Guid) -> CohortResult<Relationship> {
        self.enter("restore_relationship")?;
        let relationship = self.homed_relationship(guid)?;
        if relationship.header.status != InstanceStatus::Deleted {
            return Err(CohortError::RelationshipNotDeleted {
                guid: guid.to_string(),
            });
        }
        Ok(self.store_relationship_change(user_id, relationship, |r| {
            r.header.status = r.header.status_on_delete.take().unwrap_or(InstanceStatus::Active);
        }))
    }

    fn purge_relationship(&self, _user_id: &str, guid: &Guid) -> CohortResult<()> {
        self.enter("purge_relationship")?;
        let relationship = self.homed_relationship(guid)?;
        if relationship.header.status != InstanceStatus::Deleted {
            return Err(CohortError::RelationshipNotDeleted {
                guid: guid.to_string(),
            });
        }
        self.relationships.remove(guid);
        Ok(())
    }
}

fn already_classified(guid: &Guid, name: &str) -> CohortError {
    CohortError::ClassificationError {
        reason: format!("entity {} is already classified as {}", guid, name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cohort_core::{ErrorKind, InstanceType};

    fn asset_type() -> TypeDef {
        TypeDef::new("t-asset", "Asset", TypeDefCategory::Entity)
    }

    fn asset(guid: &str, home: &str) -> EntityDetail {
        EntityDetail::new(
            guid,
            InstanceType::new("t-asset", "Asset", TypeDefCategory::Entity),
            home,
        )
    }

    fn new_asset(name: &str) -> NewEntity {
        NewEntity {
            type_def_guid: Guid::from("t-asset"),
            properties: [("name".to_string(), name.into())].into_iter().collect(),
            classifications: Vec::new(),
            status: InstanceStatus::Active,
        }
    }

    #[test]
    fn test_add_and_update_entity_bumps_version() {
        let repo = InMemoryCollection::new("repo-1");
        repo.save_type_def(asset_type());
        let created = repo.add_entity("user", &new_asset("a")).unwrap();
        assert_eq!(created.home_metadata_collection_id(), "repo-1");
        assert_eq!(created.version(), 1);

        let updated = repo
            .update_entity_status("user", created.guid(), InstanceStatus::Draft)
            .unwrap();
        assert_eq!(updated.version(), 2);
        assert_eq!(updated.header.status, InstanceStatus::Draft);

        let history = repo
            .get_entity_detail_history("user", created.guid(), &HistoryParams::all())
            .unwrap();
        assert_eq!(
            history.iter().map(|e| e.version()).collect::<Vec<_>>(),
            vec![2, 1]
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let repo = InMemoryCollection::new("repo-1");
        let err = repo.add_entity("user", &new_asset("a")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeDefNotKnown);
    }

    #[test]
    fn test_reference_copy_is_read_only() {
        let repo = InMemoryCollection::new("repo-2");
        repo.save_entity(asset("e1", "repo-1"));
        let err = repo.delete_entity("user", &Guid::from("e1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RepositoryError);
        assert!(repo.get_entity_detail("user", &Guid::from("e1"), None).is_ok());
    }

    #[test]
    fn test_proxy_only_answers() {
        let repo = InMemoryCollection::new("repo-2");
        repo.save_proxy(EntityProxy::from(&asset("e1", "repo-1")));
        let guid = Guid::from("e1");
        assert_eq!(
            repo.get_entity_detail("user", &guid, None).unwrap_err().kind(),
            ErrorKind::EntityProxyOnly
        );
        assert_eq!(
            repo.is_entity_known("user", &guid).unwrap_err().kind(),
            ErrorKind::EntityProxyOnly
        );
        assert!(repo.get_home_classifications("user", &guid, None).unwrap().is_empty());
    }

    #[test]
    fn test_classifying_a_proxy_homes_the_classification_here() {
        let repo = InMemoryCollection::new("repo-2");
        repo.save_proxy(EntityProxy::from(&asset("e1", "repo-1")));
        let guid = Guid::from("e1");
        let classified = repo
            .classify_entity("user", &guid, "Confidential", &InstanceProperties::new())
            .unwrap();
        assert_eq!(classified.classifications.len(), 1);

        let homed = repo.get_home_classifications("user", &guid, None).unwrap();
        assert_eq!(homed.len(), 1);
        assert_eq!(homed[0].name, "Confidential");
        assert_eq!(homed[0].metadata_collection_id, "repo-2");

        let err = repo
            .classify_entity("user", &guid, "Confidential", &InstanceProperties::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ClassificationError);

        repo.declassify_entity("user", &guid, "Confidential").unwrap();
        assert!(repo.get_home_classifications("user", &guid, None).unwrap().is_empty());
    }

    #[test]
    fn test_delete_restore_purge_cycle() {
        let repo = InMemoryCollection::new("repo-1");
        repo.save_entity(asset("e1", "repo-1"));
        let guid = Guid::from("e1");

        assert_eq!(
            repo.purge_entity("user", &guid).unwrap_err().kind(),
            ErrorKind::EntityNotDeleted
        );
        repo.delete_entity("user", &guid).unwrap();
        let restored = repo.restore_entity("user", &guid).unwrap();
        assert_eq!(restored.header.status, InstanceStatus::Active);
        repo.delete_entity("user", &guid).unwrap();
        repo.purge_entity("user", &guid).unwrap();
        assert_eq!(
            repo.get_entity_detail("user", &guid, None).unwrap_err().kind(),
            ErrorKind::EntityNotKnown
        );
    }

    #[test]
    fn test_find_pages_and_hides_deleted() {
        let repo = InMemoryCollection::new("repo-1");
        for guid in ["e3", "e1", "e2", "e4"] {
            repo.save_entity(asset(guid, "repo-1"));
        }
        let mut deleted = asset("e5", "repo-1");
        deleted.header.status = InstanceStatus::Deleted;
        repo.save_entity(deleted);

        let page = repo
            .find_entities_by_property("user", None, None, &[], &PagingParams::page(1, 2))
            .unwrap();
        let guids: Vec<&str> = page.iter().map(|e| e.guid().as_str()).collect();
        assert_eq!(guids, vec!["e2", "e3"]);

        let deleted_only = PagingParams::unbounded().with_statuses(vec![InstanceStatus::Deleted]);
        let found = repo
            .find_entities_by_property("user", None, None, &[], &deleted_only)
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_relationships_for_unknown_entity() {
        let repo = InMemoryCollection::new("repo-1");
        let err = repo
            .get_relationships_for_entity("user", &Guid::from("nope"), None, &PagingParams::unbounded())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntityNotKnown);
    }

    #[test]
    fn test_injected_failure_and_call_count() {
        let repo = InMemoryCollection::new("repo-1");
        repo.fail_operation("get_all_types", CohortError::repository_error("offline"));
        assert_eq!(
            repo.get_all_types("user").unwrap_err().kind(),
            ErrorKind::RepositoryError
        );
        repo.clear_failures();
        assert!(repo.get_all_types("user").unwrap().is_empty());
        assert_eq!(repo.call_count("get_all_types"), 2);
    }

    #[test]
    fn test_verify_type_def() {
        let repo = InMemoryCollection::new("repo-1");
        repo.save_type_def(asset_type());
        assert!(repo.verify_type_def("user", &asset_type()).unwrap());
        assert!(!repo
            .verify_type_def("user", &TypeDef::new("t-other", "Other", TypeDefCategory::Entity))
            .unwrap());
        let err = repo
            .verify_type_def("user", &asset_type().with_version(2))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeDefConflict);
    }

    #[test]
    fn test_add_entity_proxy_is_idempotent() {
        let repo = InMemoryCollection::new("repo-2");
        let proxy = EntityProxy::from(&asset("e1", "repo-1"));
        repo.add_entity_proxy("user", &proxy).unwrap();
        repo.add_entity_proxy("user", &proxy).unwrap();
        assert!(repo.holds_proxy(&Guid::from("e1")));
        repo.save_entity(asset("e2", "repo-2"));
        repo.add_entity_proxy("user", &EntityProxy::from(&asset("e2", "repo-2")))
            .unwrap();
        assert!(!repo.holds_proxy(&Guid::from("e2")));
    }
}
