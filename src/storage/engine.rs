//! Storage collaborator traits and the record type they exchange.

use crate::datum::Datum;
use crate::document::ResourceIdentifier;
use crate::error::Result;
use crate::query::expression::{Conjunction, SortKey};
use crate::query::plan::{Predicate, ScopeId};
use crate::schema::FieldSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One stored record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type")]
    pub type_name: String,

    /// Stable external identifier
    pub id: String,

    #[serde(default)]
    pub fields: BTreeMap<String, Datum>,
}

impl Record {
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Datum>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Datum> {
        self.fields.get(field)
    }

    pub fn identifier(&self) -> ResourceIdentifier {
        ResourceIdentifier::new(&self.type_name, &self.id)
    }

    /// Identifiers referenced by a relationship field, in stored order.
    ///
    /// Accepts a bare id, a `{type, id}` object or an array of either. A bare
    /// id takes the first of the field's target types.
    pub fn relationship_targets(&self, field: &FieldSchema) -> Vec<ResourceIdentifier> {
        let mut out = Vec::new();
        if let Some(value) = self.fields.get(&field.name) {
            collect_targets(value, field, &mut out);
        }
        out
    }
}

fn collect_targets(value: &Datum, field: &FieldSchema, out: &mut Vec<ResourceIdentifier>) {
    match value {
        Datum::Null => {}
        Datum::Array(items) => {
            for item in items {
                collect_targets(item, field, out);
            }
        }
        Datum::Object(map) => {
            let type_name = map
                .get("type")
                .and_then(Datum::as_string)
                .map(str::to_string)
                .or_else(|| field.target_types.iter().next().cloned());
            let id = map.get("id").and_then(Datum::as_key);
            if let (Some(type_name), Some(id)) = (type_name, id) {
                out.push(ResourceIdentifier::new(type_name, id));
            }
        }
        scalar => {
            if let (Some(type_name), Some(id)) =
                (field.target_types.iter().next(), scalar.as_key())
            {
                out.push(ResourceIdentifier::new(type_name, id));
            }
        }
    }
}

/// Receives compiled predicates, sorts and ranges.
///
/// Scopes nest: every predicate is added to a scope, and a scope opened
/// inside another becomes one member of it.
pub trait QuerySink {
    /// The implicit top-level `AND` scope
    fn root_scope(&self) -> ScopeId;

    fn open_scope(&mut self, parent: ScopeId, conjunction: Conjunction) -> ScopeId;

    fn add_predicate(&mut self, scope: ScopeId, predicate: Predicate);

    fn add_sort(&mut self, sort: SortKey);

    fn set_range(&mut self, offset: usize, limit: usize);
}

/// A backend query that can be run once built
pub trait StorageQuery: QuerySink {
    fn execute(self) -> Result<Vec<Record>>;
}

/// Loads single records by identifier
pub trait RecordSource {
    fn load(&self, identifier: &ResourceIdentifier) -> Result<Option<Record>>;
}

impl<T: RecordSource + ?Sized> RecordSource for &T {
    fn load(&self, identifier: &ResourceIdentifier) -> Result<Option<Record>> {
        (**self).load(identifier)
    }
}
