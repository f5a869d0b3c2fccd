//! Type definition query executor

use std::sync::Arc;

use cohort_concurrency::{AccumulatorBase, TypeDefAccumulator};
use cohort_core::{Guid, MetadataCollection, TypeDefCategory};

use crate::executor::{captured, RepositoryExecutor};

/// Which type definitions to gather
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDefQuery {
    /// The full gallery
    All,
    /// Every type of one category
    ByCategory(TypeDefCategory),
    /// One type by GUID
    ByGuid(Guid),
    /// One type by name
    ByName(String),
}

/// Gather type definitions from every member
#[derive(Debug, Clone)]
pub struct TypeDefQueryExecutor {
    user_id: String,
    query: TypeDefQuery,
    accumulator: Arc<TypeDefAccumulator>,
}

impl TypeDefQueryExecutor {
    /// Create the executor
    pub fn new(
        user_id: impl Into<String>,
        query: TypeDefQuery,
        accumulator: Arc<TypeDefAccumulator>,
    ) -> Self {
        TypeDefQueryExecutor {
            user_id: user_id.into(),
            query,
            accumulator,
        }
    }
}

impl RepositoryExecutor for TypeDefQueryExecutor {
    fn operation(&self) -> &'static str {
        match self.query {
            TypeDefQuery::All => "get_all_types",
            TypeDefQuery::ByCategory(_) => "find_type_defs_by_category",
            TypeDefQuery::ByGuid(_) => "get_type_def_by_guid",
            TypeDefQuery::ByName(_) => "get_type_def_by_name",
        }
    }

    fn base(&self) -> &AccumulatorBase {
        self.accumulator.base()
    }

    fn issue_request_to_repository(&self, member: &str, collection: &dyn MetadataCollection) -> bool {
        let user = self.user_id.as_str();
        match &self.query {
            TypeDefQuery::All => {
                if let Some(gallery) = captured(self.base(), member, collection.get_all_types(user)) {
                    self.accumulator.record_gallery(member, gallery);
                }
            }
            TypeDefQuery::ByCategory(category) => {
                let result = collection.find_type_defs_by_category(user, *category);
                if let Some(defs) = captured(self.base(), member, result) {
                    self.accumulator.record_type_defs(member, defs);
                }
            }
            TypeDefQuery::ByGuid(guid) => {
                let result = collection.get_type_def_by_guid(user, guid);
                if let Some(def) = captured(self.base(), member, result) {
                    self.accumulator.record_type_def(member, def);
                }
            }
            TypeDefQuery::ByName(name) => {
                let result = collection.get_type_def_by_name(user, name);
                if let Some(def) = captured(self.base(), member, result) {
                    self.accumulator.record_type_def(member, def);
                }
            }
        }
        false
    }
}
