//! Type definition accumulation
//!
//! Definitions are merged by GUID: the higher version wins, equal versions go
//! to the smallest member id. Two different GUIDs claiming the same name are a
//! conflict; the smaller GUID is kept, the other dropped and logged. Name
//! conflicts are resolved when the result is materialized so arrival order
//! cannot influence which definition survives.

use crate::base::AccumulatorBase;
use crate::merge::Reported;
use crate::precedence::PrecedenceTable;
use cohort_core::{AttributeTypeDef, CohortError, CohortResult, Guid, TypeDef, TypeDefGallery};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use tracing::warn;

/// A name claimed by two different type definition GUIDs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefNameConflict {
    /// Contested name
    pub name: String,
    /// GUID kept
    pub kept: Guid,
    /// GUID dropped
    pub dropped: Guid,
}

trait Versioned {
    fn guid(&self) -> &Guid;
    fn name(&self) -> &str;
    fn version(&self) -> u64;
}

impl Versioned for TypeDef {
    fn guid(&self) -> &Guid {
        &self.guid
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn version(&self) -> u64 {
        self.version
    }
}

impl Versioned for AttributeTypeDef {
    fn guid(&self) -> &Guid {
        &self.guid
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn version(&self) -> u64 {
        self.version
    }
}

fn offer<T: Versioned>(merged: &mut FxHashMap<Guid, Reported<T>>, member: &str, def: T) {
    let replace = match merged.get(def.guid()) {
        Some(current) => {
            def.version() > current.value.version()
                || (def.version() == current.value.version()
                    && member < current.reported_by.as_str())
        }
        None => true,
    };
    if replace {
        merged.insert(def.guid().clone(), Reported::new(def, member));
    }
}

// One definition per name, smallest GUID first; output sorted by name
fn resolve<T: Versioned + Clone>(
    merged: &FxHashMap<Guid, Reported<T>>,
    operation: &str,
    conflicts: &mut Vec<TypeDefNameConflict>,
) -> Vec<T> {
    let mut by_name: BTreeMap<&str, Vec<&T>> = BTreeMap::new();
    for reported in merged.values() {
        by_name
            .entry(reported.value.name())
            .or_default()
            .push(&reported.value);
    }
    let mut resolved = Vec::with_capacity(by_name.len());
    for (name, mut claimants) in by_name {
        claimants.sort_by(|a, b| a.guid().cmp(b.guid()));
        let kept = claimants[0];
        for dropped in &claimants[1..] {
            warn!(
                operation,
                name,
                kept = %kept.guid(),
                dropped = %dropped.guid(),
                "conflicting type definitions share a name"
            );
            conflicts.push(TypeDefNameConflict {
                name: name.to_string(),
                kept: kept.guid().clone(),
                dropped: dropped.guid().clone(),
            });
        }
        resolved.push(kept.clone());
    }
    resolved
}

#[derive(Debug, Default)]
struct TypeDefState {
    type_defs: FxHashMap<Guid, Reported<TypeDef>>,
    attribute_type_defs: FxHashMap<Guid, Reported<AttributeTypeDef>>,
}

/// Accumulates type definitions from gallery, category and single lookups
#[derive(Debug)]
pub struct TypeDefAccumulator {
    base: AccumulatorBase,
    state: Mutex<TypeDefState>,
}

impl TypeDefAccumulator {
    /// Create an accumulator using the type management precedence table
    pub fn new(operation: &'static str) -> Self {
        TypeDefAccumulator {
            base: AccumulatorBase::new(operation, PrecedenceTable::TYPE_MANAGEMENT),
            state: Mutex::new(TypeDefState::default()),
        }
    }

    /// Errors and progress
    pub fn base(&self) -> &AccumulatorBase {
        &self.base
    }

    /// Record a member's full gallery
    pub fn record_gallery(&self, member: &str, gallery: TypeDefGallery) {
        let Some(_admitted) = self.base.admit(member) else {
            return;
        };
        {
            let mut state = self.state.lock();
            for def in gallery.type_defs {
                offer(&mut state.type_defs, member, def);
            }
            for def in gallery.attribute_type_defs {
                offer(&mut state.attribute_type_defs, member, def);
            }
        }
        self.base.record_success(member);
    }

    /// Record a list of type definitions
    pub fn record_type_defs(&self, member: &str, type_defs: Vec<TypeDef>) {
        let Some(_admitted) = self.base.admit(member) else {
            return;
        };
        {
            let mut state = self.state.lock();
            for def in type_defs {
                offer(&mut state.type_defs, member, def);
            }
        }
        self.base.record_success(member);
    }

    /// Record one type definition
    pub fn record_type_def(&self, member: &str, type_def: TypeDef) {
        self.record_type_defs(member, vec![type_def]);
    }

    fn failed(&self) -> Option<CohortError> {
        if self.base.tracker().successes() == 0 {
            self.base.best_error()
        } else {
            None
        }
    }

    /// Merged gallery plus any name conflicts that were resolved
    pub fn gallery(&self) -> CohortResult<(TypeDefGallery, Vec<TypeDefNameConflict>)> {
        if let Some(error) = self.failed() {
            return Err(error);
        }
        let state = self.state.lock();
        let mut conflicts = Vec::new();
        let type_defs = resolve(&state.type_defs, self.base.operation(), &mut conflicts);
        let attribute_type_defs =
            resolve(&state.attribute_type_defs, self.base.operation(), &mut conflicts);
        Ok((
            TypeDefGallery {
                attribute_type_defs,
                type_defs,
            },
            conflicts,
        ))
    }

    /// Merged list of type definitions, sorted by name
    pub fn type_defs(&self) -> CohortResult<Vec<TypeDef>> {
        if let Some(error) = self.failed() {
            return Err(error);
        }
        let state = self.state.lock();
        let mut conflicts = Vec::new();
        Ok(resolve(&state.type_defs, self.base.operation(), &mut conflicts))
    }

    /// The single definition of a lookup, the best error, or `None`
    pub fn type_def(&self) -> CohortResult<Option<TypeDef>> {
        if let Some(error) = self.failed() {
            return Err(error);
        }
        let state = self.state.lock();
        let mut conflicts = Vec::new();
        Ok(resolve(&state.type_defs, self.base.operation(), &mut conflicts)
            .into_iter()
            .next())
    }
}
