//! In-memory record store
//!
//! Holds records in insertion order and evaluates [`QueryPlan`]s against
//! them directly. Dotted field paths follow relationships through the
//! store when a schema is attached.

use crate::datum::{compare_numbers, parse_number, Datum};
use crate::document::ResourceIdentifier;
use crate::error::{Error, Result};
use crate::query::expression::{Conjunction, Direction, SortKey};
use crate::query::plan::{Operator, Predicate, QueryPlan, ScopeId, ScopeMember};
use crate::schema::{SchemaLookup, SchemaRegistry};
use crate::storage::engine::{QuerySink, Record, RecordSource, StorageQuery};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// In-memory store for tests and small data sets
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<Record>,
    index: HashMap<ResourceIdentifier, usize>,
    schema: Option<Arc<SchemaRegistry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a schema so dotted paths can follow relationships
    pub fn with_schema(mut self, schema: Arc<SchemaRegistry>) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Insert or replace a record
    pub fn insert(&mut self, record: Record) {
        let key = record.identifier();
        match self.index.get(&key) {
            Some(&pos) => self.records[pos] = record,
            None => {
                self.index.insert(key, self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Load records from a JSON array of `{type, id, fields}` objects
    pub fn from_json(source: &str) -> Result<Self> {
        let records: Vec<Record> = serde_json::from_str(source)
            .map_err(|e| Error::Storage(format!("invalid record set: {}", e)))?;
        let mut store = Self::new();
        for record in records {
            store.insert(record);
        }
        Ok(store)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&source)
    }

    /// Get the number of records stored
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, identifier: &ResourceIdentifier) -> Option<&Record> {
        self.index.get(identifier).map(|&pos| &self.records[pos])
    }

    /// Start a query over one resource type
    pub fn query(&self, type_name: &str) -> MemoryQuery<'_> {
        MemoryQuery {
            store: self,
            plan: QueryPlan::new(type_name),
        }
    }

    /// Run a plan: filter, then sort, then slice
    pub fn execute_plan(&self, plan: &QueryPlan) -> Result<Vec<Record>> {
        let mut matched: Vec<&Record> = self
            .records
            .iter()
            .filter(|r| r.type_name == plan.type_name)
            .filter(|r| self.eval_scope(plan, plan.root(), r))
            .collect();

        if !plan.sorts().is_empty() {
            matched.sort_by(|a, b| self.compare_records(plan.sorts(), a, b));
        }

        let total = matched.len();
        let records: Vec<Record> = match plan.range() {
            Some(page) => matched
                .into_iter()
                .skip(page.offset)
                .take(page.limit)
                .cloned()
                .collect(),
            None => matched.into_iter().cloned().collect(),
        };

        debug!(
            type_name = %plan.type_name,
            matched = total,
            returned = records.len(),
            "Executed plan"
        );
        Ok(records)
    }

    fn eval_scope(&self, plan: &QueryPlan, id: ScopeId, record: &Record) -> bool {
        let Some(scope) = plan.scope(id) else {
            return true;
        };
        if scope.members.is_empty() {
            return true;
        }

        let mut results = scope.members.iter().map(|member| match member {
            ScopeMember::Predicate(p) => self.eval_predicate(p, record),
            ScopeMember::Scope(child) => self.eval_scope(plan, *child, record),
        });

        match scope.conjunction {
            Conjunction::And => results.all(|r| r),
            Conjunction::Or => results.any(|r| r),
        }
    }

    fn eval_predicate(&self, predicate: &Predicate, record: &Record) -> bool {
        match predicate {
            Predicate::Exists {
                field,
                exists,
                language,
            } => {
                let present = self
                    .resolve(record, field, language.as_deref())
                    .iter()
                    .any(|v| !v.is_null());
                present == *exists
            }
            Predicate::Condition {
                field,
                operator,
                value,
                language,
            } => {
                let values = self.resolve(record, field, language.as_deref());
                eval_operator(*operator, &values, value)
            }
        }
    }

    /// All values reached by a dotted path, flattening multi-valued steps
    fn resolve(&self, record: &Record, path: &str, language: Option<&str>) -> Vec<Datum> {
        let mut current = vec![record];
        let mut segments = path.split('.').peekable();
        let mut out = Vec::new();

        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                for r in &current {
                    out.extend(leaf_values(r, segment, language));
                }
                break;
            }

            let mut next = Vec::new();
            for r in &current {
                next.extend(self.follow(r, segment));
            }
            current = next;
        }
        out
    }

    fn follow(&self, record: &Record, field: &str) -> Vec<&Record> {
        let Some(schema) = &self.schema else {
            return Vec::new();
        };
        let Ok(field) = schema.field_schema(&record.type_name, field) else {
            return Vec::new();
        };
        record
            .relationship_targets(field)
            .iter()
            .filter_map(|target| self.get(target))
            .collect()
    }

    fn compare_records(&self, sorts: &[SortKey], a: &Record, b: &Record) -> Ordering {
        for sort in sorts {
            let left = self.sort_value(a, sort);
            let right = self.sort_value(b, sort);
            let ord = match sort.direction {
                Direction::Asc => left.compare(&right),
                Direction::Desc => right.compare(&left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    fn sort_value(&self, record: &Record, sort: &SortKey) -> Datum {
        self.resolve(record, &sort.field, sort.language.as_deref())
            .into_iter()
            .next()
            .unwrap_or_default()
    }
}

impl RecordSource for MemoryStore {
    fn load(&self, identifier: &ResourceIdentifier) -> Result<Option<Record>> {
        Ok(self.get(identifier).cloned())
    }
}

/// Values of one field on one record.
///
/// `id` is the record id. A language-qualified lookup on an object-valued
/// field picks that language's entry.
fn leaf_values(record: &Record, field: &str, language: Option<&str>) -> Vec<Datum> {
    if field == "id" {
        return vec![Datum::String(record.id.clone())];
    }
    let value = match (record.get(field), language) {
        (Some(Datum::Object(translations)), Some(lang)) => translations.get(lang),
        (value, _) => value,
    };
    match value {
        None => Vec::new(),
        Some(Datum::Array(items)) => items.clone(),
        Some(v) => vec![v.clone()],
    }
}

/// Compare two scalars, treating numeric strings as numbers
fn loose_cmp(left: &Datum, right: &Datum) -> Option<Ordering> {
    match (left, right) {
        (Datum::Null, Datum::Null) => Some(Ordering::Equal),
        (Datum::Boolean(a), Datum::Boolean(b)) => Some(a.cmp(b)),
        (Datum::Number(a), Datum::Number(b)) => compare_numbers(a, b),
        (Datum::String(a), Datum::String(b)) => Some(a.cmp(b)),
        (Datum::Number(a), Datum::String(b)) => compare_numbers(a, &parse_number(b)?),
        (Datum::String(a), Datum::Number(b)) => compare_numbers(&parse_number(a)?, b),
        _ => None,
    }
}

fn loose_eq(left: &Datum, right: &Datum) -> bool {
    loose_cmp(left, right) == Some(Ordering::Equal)
}

fn text_match(value: &Datum, operand: &Datum, test: fn(&str, &str) -> bool) -> bool {
    match (value.as_key(), operand.as_string()) {
        (Some(v), Some(o)) => test(&v.to_lowercase(), &o.to_lowercase()),
        _ => false,
    }
}

fn between(value: &Datum, operand: &Datum) -> bool {
    match operand.as_array().map(Vec::as_slice) {
        Some([low, high]) => {
            matches!(loose_cmp(value, low), Some(Ordering::Greater | Ordering::Equal))
                && matches!(loose_cmp(value, high), Some(Ordering::Less | Ordering::Equal))
        }
        _ => false,
    }
}

fn member_of(value: &Datum, operand: &Datum) -> bool {
    operand
        .as_array()
        .map(|items| items.iter().any(|item| loose_eq(value, item)))
        .unwrap_or(false)
}

fn matches_any(values: &[Datum], test: impl Fn(&Datum) -> bool) -> bool {
    values.iter().any(test)
}

fn ordered(value: &Datum, operand: &Datum, wanted: &[Ordering]) -> bool {
    loose_cmp(value, operand)
        .map(|o| wanted.contains(&o))
        .unwrap_or(false)
}

/// Positive operators match when any value matches; negated ones when none do
fn eval_operator(operator: Operator, values: &[Datum], operand: &Datum) -> bool {
    use Ordering::{Equal, Greater, Less};

    match operator {
        Operator::Eq => matches_any(values, |v| loose_eq(v, operand)),
        Operator::Ne => !matches_any(values, |v| loose_eq(v, operand)),
        Operator::Gt => matches_any(values, |v| ordered(v, operand, &[Greater])),
        Operator::Ge => matches_any(values, |v| ordered(v, operand, &[Greater, Equal])),
        Operator::Lt => matches_any(values, |v| ordered(v, operand, &[Less])),
        Operator::Le => matches_any(values, |v| ordered(v, operand, &[Less, Equal])),
        Operator::StartsWith => {
            matches_any(values, |v| text_match(v, operand, |a, b| a.starts_with(b)))
        }
        Operator::Contains => matches_any(values, |v| text_match(v, operand, |a, b| a.contains(b))),
        Operator::EndsWith => matches_any(values, |v| text_match(v, operand, |a, b| a.ends_with(b))),
        Operator::In => matches_any(values, |v| member_of(v, operand)),
        Operator::NotIn => !matches_any(values, |v| member_of(v, operand)),
        Operator::Between => matches_any(values, |v| between(v, operand)),
        Operator::NotBetween => !matches_any(values, |v| between(v, operand)),
        Operator::IsNull => !matches_any(values, |v| !v.is_null()),
        Operator::IsNotNull => matches_any(values, |v| !v.is_null()),
    }
}

/// A query under construction against a [`MemoryStore`]
#[derive(Debug, Clone)]
pub struct MemoryQuery<'a> {
    store: &'a MemoryStore,
    plan: QueryPlan,
}

impl<'a> MemoryQuery<'a> {
    /// The plan accumulated so far
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn into_plan(self) -> QueryPlan {
        self.plan
    }
}

impl<'a> QuerySink for MemoryQuery<'a> {
    fn root_scope(&self) -> ScopeId {
        self.plan.root_scope()
    }

    fn open_scope(&mut self, parent: ScopeId, conjunction: Conjunction) -> ScopeId {
        self.plan.open_scope(parent, conjunction)
    }

    fn add_predicate(&mut self, scope: ScopeId, predicate: Predicate) {
        self.plan.add_predicate(scope, predicate)
    }

    fn add_sort(&mut self, sort: SortKey) {
        self.plan.add_sort(sort)
    }

    fn set_range(&mut self, offset: usize, limit: usize) {
        self.plan.set_range(offset, limit)
    }
}

impl<'a> StorageQuery for MemoryQuery<'a> {
    fn execute(self) -> Result<Vec<Record>> {
        self.store.execute_plan(&self.plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Cardinality, FieldSchema, ResourceType};
    use serde_json::json;

    fn store() -> MemoryStore {
        let schema = SchemaRegistry::builder()
            .register(
                ResourceType::new("article", "node", "article")
                    .with_field(FieldSchema::attribute("title"))
                    .with_field(FieldSchema::attribute("status"))
                    .with_field(FieldSchema::relationship("author", Cardinality::One, ["user"])),
            )
            .register(ResourceType::new("user", "user", "user").with_field(FieldSchema::attribute("name")))
            .build()
            .unwrap();

        MemoryStore::from_json(
            &json!([
                {"type": "user", "id": "7", "fields": {"name": "Ada"}},
                {"type": "user", "id": "8", "fields": {"name": "Grace"}},
                {"type": "article", "id": "1", "fields": {"title": "Hello", "status": 1, "author": "7"}},
                {"type": "article", "id": "2", "fields": {"title": "World", "status": 2, "author": "8"}},
                {"type": "article", "id": "3", "fields": {"title": "Hello again", "status": 1}}
            ])
            .to_string(),
        )
        .unwrap()
        .with_schema(schema)
    }

    fn condition(field: &str, operator: Operator, value: Datum) -> Predicate {
        Predicate::Condition {
            field: field.into(),
            operator,
            value,
            language: None,
        }
    }

    fn ids(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_insert_replaces_same_identifier() {
        let mut store = MemoryStore::new();
        assert!(store.is_empty());
        store.insert(Record::new("user", "7").with("name", "Ada"));
        store.insert(Record::new("user", "7").with("name", "Lovelace"));

        assert_eq!(store.len(), 1);
        let loaded = store.load(&ResourceIdentifier::new("user", "7")).unwrap().unwrap();
        assert_eq!(loaded.get("name"), Some(&Datum::from("Lovelace")));
        assert!(store.load(&ResourceIdentifier::new("user", "9")).unwrap().is_none());
    }

    #[test]
    fn test_or_scope_and_sort() {
        let store = store();
        let mut query = store.query("article");
        let root = query.root_scope();
        let or = query.open_scope(root, Conjunction::Or);
        query.add_predicate(or, condition("status", Operator::Eq, Datum::from(1)));
        query.add_predicate(or, condition("status", Operator::Eq, Datum::from(2)));
        query.add_sort(SortKey::desc("title"));

        let records = query.execute().unwrap();
        assert_eq!(ids(&records), vec!["2", "3", "1"]);
    }

    #[test]
    fn test_dotted_path_follows_relationship() {
        let store = store();
        let mut query = store.query("article");
        let root = query.root_scope();
        query.add_predicate(root, condition("author.name", Operator::StartsWith, Datum::from("gr")));

        assert_eq!(ids(&query.execute().unwrap()), vec!["2"]);
    }

    #[test]
    fn test_exists_and_range() {
        let store = store();
        let mut query = store.query("article");
        let root = query.root_scope();
        query.add_predicate(
            root,
            Predicate::Exists {
                field: "author".into(),
                exists: false,
                language: None,
            },
        );
        assert_eq!(ids(&query.execute().unwrap()), vec!["3"]);

        let mut query = store.query("article");
        query.add_sort(SortKey::asc("id"));
        query.set_range(1, 1);
        assert_eq!(ids(&query.execute().unwrap()), vec!["2"]);
    }

    #[test]
    fn test_operator_semantics() {
        let values = vec![Datum::from(5)];
        let range = Datum::Array(vec![Datum::from(1), Datum::from("5")]);
        assert!(eval_operator(Operator::Between, &values, &range));
        assert!(!eval_operator(Operator::NotBetween, &values, &range));
        assert!(eval_operator(Operator::Ge, &values, &Datum::from("5")));
        assert!(eval_operator(Operator::IsNull, &[], &Datum::Null));
        assert!(eval_operator(Operator::Ne, &[], &Datum::from(1)));
        assert!(eval_operator(
            Operator::In,
            &[Datum::from("b")],
            &Datum::Array(vec![Datum::from("a"), Datum::from("b")])
        ));
    }

    #[test]
    fn test_large_integers_filter_exactly() {
        let stored = vec![Datum::from(9007199254740993i64)];
        assert!(eval_operator(Operator::Eq, &stored, &Datum::from("9007199254740993")));
        assert!(!eval_operator(Operator::Eq, &stored, &Datum::from(9007199254740992i64)));
        assert!(eval_operator(Operator::Gt, &stored, &Datum::from(9007199254740992i64)));
    }

    #[test]
    fn test_language_qualified_lookup() {
        let record = Record::new("article", "1").with(
            "title",
            Datum::from(json!({"en": "Hello", "de": "Hallo"})),
        );
        assert_eq!(leaf_values(&record, "title", Some("de")), vec![Datum::from("Hallo")]);
        assert!(leaf_values(&record, "title", Some("fr")).is_empty());
    }

    #[test]
    fn test_invalid_json_is_storage_error() {
        let err = MemoryStore::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }
}
