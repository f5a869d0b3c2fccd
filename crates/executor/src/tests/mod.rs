//! Executor tests against scripted members.


use chrono::{DateTime, Utc};
use cohort_core::{
    Classification, CohortError, CohortResult, EntityDetail, EntityProxy, Guid, HistoryParams,
    InstanceType, MetadataCollection, NewEntity, NewRelationship, PagingParams, PropertyMatch,
    Relationship, TypeDefCategory,
};
use parking_lot::Mutex;

/// A member whose answers are fixed up front
pub(crate) struct ScriptedMember {
    pub id: String,
    pub entities: Vec<EntityDetail>,
    pub proxies: Vec<Guid>,
    pub home_classifications: Vec<Classification>,
    pub relationships: Vec<Relationship>,
    pub failure: Option<CohortError>,
    pub proxy_failure: Option<CohortError>,
    pub calls: Mutex<Vec<String>>,
    pub seen_paging: Mutex<Vec<PagingParams>>,
}

impl ScriptedMember {
    pub fn new(id: &str) -> Self {
        ScriptedMember {
            id: id.to_string(),
            entities: Vec::new(),
            proxies: Vec::new(),
            home_classifications: Vec::new(),
            relationships: Vec::new(),
            failure: None,
            proxy_failure: None,
            calls: Mutex::new(Vec::new()),
            seen_paging: Mutex::new(Vec::new()),
        }
    }

    pub fn with_entity(mut self, entity: EntityDetail) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn with_proxy(mut self, guid: &str) -> Self {
        self.proxies.push(Guid::from(guid));
        self
    }

    pub fn with_home_classification(mut self, classification: Classification) -> Self {
        self.home_classifications.push(classification);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn failing(mut self, error: CohortError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn called(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn call(&self, name: &str) -> CohortResult<()> {
        self.calls.lock().push(name.to_string());
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn entity(&self, guid: &Guid) -> CohortResult<EntityDetail> {
        if let Some(entity) = self.entities.iter().find(|e| &e.header.guid == guid) {
            return Ok(entity.clone());
        }
        if self.proxies.contains(guid) {
            return Err(CohortError::entity_proxy_only(guid));
        }
        Err(CohortError::entity_not_known(guid))
    }
}

impl MetadataCollection for ScriptedMember {
    fn metadata_collection_id(&self) -> &str {
        &self.id
    }

    fn is_entity_known(&self, _user_id: &str, guid: &Guid) -> CohortResult<Option<EntityDetail>> {
        self.call("is_entity_known")?;
        match self.entity(guid) {
            Ok(entity) => Ok(Some(entity)),
            Err(CohortError::EntityNotKnown { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn get_entity_detail(
        &self,
        _user_id: &str,
        guid: &Guid,
        _as_of_time: Option<DateTime<Utc>>,
    ) -> CohortResult<EntityDetail> {
        self.call("get_entity_detail")?;
        self.entity(guid)
    }

    fn get_home_classifications(
        &self,
        _user_id: &str,
        _entity_guid: &Guid,
        _as_of_time: Option<DateTime<Utc>>,
    ) -> CohortResult<Vec<Classification>> {
        self.call("get_home_classifications")?;
        Ok(self.home_classifications.clone())
    }

    fn get_entity_detail_history(
        &self,
        _user_id: &str,
        guid: &Guid,
        _history: &HistoryParams,
    ) -> CohortResult<Vec<EntityDetail>> {
        self.call("get_entity_detail_history")?;
        Ok(self
            .entities
            .iter()
            .filter(|e| &e.header.guid == guid)
            .cloned()
            .collect())
    }

    fn find_entities_by_property(
        &self,
        _user_id: &str,
        _entity_type_guid: Option<&Guid>,
        _match_properties: Option<&PropertyMatch>,
        _limit_by_classifications: &[String],
        paging: &PagingParams,
    ) -> CohortResult<Vec<EntityDetail>> {
        self.call("find_entities_by_property")?;
        self.seen_paging.lock().push(paging.clone());
        Ok(self.entities.clone())
    }

    fn get_relationships_for_entity(
        &self,
        _user_id: &str,
        entity_guid: &Guid,
        _relationship_type_guid: Option<&Guid>,
        _paging: &PagingParams,
    ) -> CohortResult<Vec<Relationship>> {
        self.call("get_relationships_for_entity")?;
        let related: Vec<Relationship> = self
            .relationships
            .iter()
            .filter(|r| r.touches(entity_guid))
            .cloned()
            .collect();
        if related.is_empty() && self.entity(entity_guid).is_err() {
            return Err(CohortError::entity_not_known(entity_guid));
        }
        Ok(related)
    }

    fn add_entity(&self, _user_id: &str, entity: &NewEntity) -> CohortResult<EntityDetail> {
        self.call("add_entity")?;
        let mut created = EntityDetail::new(
            Guid::random(),
            InstanceType::new(entity.type_def_guid.clone(), "Asset", TypeDefCategory::Entity),
            self.id.as_str(),
        );
        created.properties = entity.properties.clone();
        Ok(created)
    }

    fn add_entity_proxy(&self, _user_id: &str, proxy: &EntityProxy) -> CohortResult<()> {
        self.calls
            .lock()
            .push(format!("add_entity_proxy:{}", proxy.guid()));
        match &self.proxy_failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn delete_entity(&self, _user_id: &str, guid: &Guid) -> CohortResult<EntityDetail> {
        self.call("delete_entity")?;
        self.entity(guid)
    }

    fn add_relationship(
        &self,
        _user_id: &str,
        relationship: &NewRelationship,
    ) -> CohortResult<Relationship> {
        self.call("add_relationship")?;
        let end = |guid: &Guid| EntityProxy::from(&entity(guid.as_str(), &self.id, 1));
        Ok(Relationship::new(
            Guid::random(),
            InstanceType::new(
                relationship.type_def_guid.clone(),
                "Link",
                TypeDefCategory::Relationship,
            ),
            self.id.as_str(),
            end(&relationship.entity_one_guid),
            end(&relationship.entity_two_guid),
        ))
    }
}

pub(crate) fn entity(guid: &str, home: &str, version: u64) -> EntityDetail {
    EntityDetail::new(
        guid,
        InstanceType::new("t-asset", "Asset", TypeDefCategory::Entity),
        home,
    )
    .with_version(version)
}

pub(crate) fn relationship(guid: &str, home: &str, one: &str, two: &str) -> Relationship {
    Relationship::new(
        guid,
        InstanceType::new("t-link", "Link", TypeDefCategory::Relationship),
        home,
        EntityProxy::from(&entity(one, home, 1)),
        EntityProxy::from(&entity(two, home, 1)),
    )
}
