//! Filter forest compilation.
//!
//! Walks the forest produced by [`QueryTreeBuilder`](super::QueryTreeBuilder)
//! and issues predicates, scopes and sorts against a [`QuerySink`]:
//!
//! - a condition becomes a predicate in the enclosing scope
//! - an exists check becomes a presence predicate
//! - a group opens a nested scope with its conjunction and recurses
//!
//! Every field path is checked against the schema first. Paths may cross
//! relationships with dots (`uid.name`); `id` is always valid. When a node
//! names no language and the field is translatable, the resource type's
//! default language is used.

use super::expression::{NodeKind, SortKey, TreeNode};
use super::plan::{Operator, Predicate, QueryPlan, ScopeId};
use crate::error::{Error, Result};
use crate::schema::{ResourceType, SchemaLookup};
use crate::storage::QuerySink;
use tracing::debug;

/// Compiles filter forests and sort lists against a schema
pub struct QueryCompiler<'a, S: SchemaLookup + ?Sized> {
    schema: &'a S,
}

impl<'a, S: SchemaLookup + ?Sized> QueryCompiler<'a, S> {
    pub fn new(schema: &'a S) -> Self {
        Self { schema }
    }

    /// Apply `roots` and `sorts` to `query`.
    ///
    /// The query is handed back only on success; on error it is dropped,
    /// so a half-built predicate set never reaches the backend.
    pub fn compile<Q: QuerySink>(
        &self,
        mut query: Q,
        roots: &[TreeNode],
        sorts: &[SortKey],
        resource_type: &ResourceType,
    ) -> Result<Q> {
        let root = query.root_scope();
        for tree in roots {
            self.compile_node(&mut query, root, tree, resource_type)?;
        }

        for sort in sorts {
            let translatable = self.resolve_field(resource_type, &sort.field)?;
            let sort = SortKey {
                language: self.language(resource_type, translatable, &sort.language),
                ..sort.clone()
            };
            debug!(field = %sort.field, direction = ?sort.direction, "Compiled sort");
            query.add_sort(sort);
        }

        Ok(query)
    }

    /// Compile into a fresh [`QueryPlan`]
    pub fn compile_plan(
        &self,
        roots: &[TreeNode],
        sorts: &[SortKey],
        resource_type: &ResourceType,
    ) -> Result<QueryPlan> {
        self.compile(QueryPlan::new(&resource_type.type_name), roots, sorts, resource_type)
    }

    fn compile_node<Q: QuerySink>(
        &self,
        query: &mut Q,
        scope: ScopeId,
        tree: &TreeNode,
        resource_type: &ResourceType,
    ) -> Result<()> {
        match &tree.node.kind {
            NodeKind::Condition {
                field,
                value,
                operator,
                language,
            } => {
                let translatable = self.resolve_field(resource_type, field)?;
                let parsed: Operator = operator.parse().map_err(|_| Error::InvalidOperator {
                    field: field.clone(),
                    operator: operator.clone(),
                })?;
                parsed
                    .check_operand(value)
                    .map_err(|reason| Error::malformed(tree.id(), reason))?;

                debug!(id = %tree.id(), field = %field, operator = %parsed, "Compiled condition");
                query.add_predicate(
                    scope,
                    Predicate::Condition {
                        field: field.clone(),
                        operator: parsed,
                        value: value.clone(),
                        language: self.language(resource_type, translatable, language),
                    },
                );
            }
            NodeKind::Exists {
                field,
                expected,
                language,
            } => {
                let translatable = self.resolve_field(resource_type, field)?;
                debug!(id = %tree.id(), field = %field, exists = expected, "Compiled exists check");
                query.add_predicate(
                    scope,
                    Predicate::Exists {
                        field: field.clone(),
                        exists: *expected,
                        language: self.language(resource_type, translatable, language),
                    },
                );
            }
            NodeKind::Group { conjunction } => {
                let nested = query.open_scope(scope, *conjunction);
                debug!(id = %tree.id(), conjunction = %conjunction, members = tree.children.len(), "Opened scope");
                for child in &tree.children {
                    self.compile_node(query, nested, child, resource_type)?;
                }
            }
        }
        Ok(())
    }

    /// Check a dotted path and report whether its final field is translatable
    fn resolve_field(&self, resource_type: &ResourceType, path: &str) -> Result<bool> {
        let invalid = || Error::InvalidQueryField {
            type_name: resource_type.type_name.clone(),
            field: path.to_string(),
        };

        let segments: Vec<&str> = path.split('.').collect();
        let mut types: Vec<&ResourceType> = vec![resource_type];

        for (i, segment) in segments.iter().enumerate() {
            let last = i + 1 == segments.len();
            if segment.is_empty() {
                return Err(invalid());
            }
            if last && *segment == "id" {
                return Ok(false);
            }

            let fields: Vec<_> = types.iter().filter_map(|t| t.field(segment)).collect();
            if fields.is_empty() {
                return Err(invalid());
            }
            if last {
                return Ok(fields.iter().any(|f| f.is_translatable()));
            }

            types = fields
                .iter()
                .filter(|f| f.is_relationship)
                .flat_map(|f| f.target_types.iter())
                .filter_map(|t| self.schema.resource_type(t).ok())
                .collect();
            if types.is_empty() {
                return Err(invalid());
            }
        }

        Err(invalid())
    }

    fn language(
        &self,
        resource_type: &ResourceType,
        translatable: bool,
        given: &Option<String>,
    ) -> Option<String> {
        given.clone().or_else(|| {
            translatable
                .then(|| resource_type.default_language.clone())
                .flatten()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::Datum;
    use crate::query::expression::Conjunction;
    use crate::query::plan::ScopeMember;
    use crate::query::QueryTreeBuilder;
    use crate::schema::{Cardinality, FieldSchema, SchemaRegistry};
    use serde_json::{json, Value};
    use std::sync::Arc;

    fn schema() -> Arc<SchemaRegistry> {
        SchemaRegistry::builder()
            .register(
                ResourceType::new("article", "node", "article")
                    .with_language("langcode", Some("en"))
                    .with_field(FieldSchema::attribute("title").translatable("langcode"))
                    .with_field(FieldSchema::attribute("status"))
                    .with_field(FieldSchema::attribute("created"))
                    .with_field(FieldSchema::relationship("author", Cardinality::One, ["user"])),
            )
            .register(ResourceType::new("user", "user", "user").with_field(FieldSchema::attribute("name")))
            .build()
            .unwrap()
    }

    fn compile(filter: Value) -> Result<QueryPlan> {
        let schema = schema();
        let rt = schema.resource_type("article")?;
        let roots = QueryTreeBuilder::new().build_tree(&filter)?;
        QueryCompiler::new(&*schema).compile_plan(&roots, &[], rt)
    }

    #[test]
    fn test_single_condition_in_root_scope() {
        let plan = compile(json!({"f1": {"path": "title", "value": "Hello", "operator": "="}})).unwrap();

        let root = plan.scope(plan.root()).unwrap();
        assert_eq!(root.conjunction, Conjunction::And);
        assert_eq!(root.members.len(), 1);
        match &root.members[0] {
            ScopeMember::Predicate(Predicate::Condition {
                field,
                operator,
                value,
                language,
            }) => {
                assert_eq!(field, "title");
                assert_eq!(*operator, Operator::Eq);
                assert_eq!(value, &Datum::from("Hello"));
                assert_eq!(language.as_deref(), Some("en"));
            }
            other => panic!("unexpected member {:?}", other),
        }
    }

    #[test]
    fn test_or_group_holds_both_conditions() {
        let plan = compile(json!({
            "g1": {"conjunction": "OR"},
            "f1": {"path": "status", "value": 1, "operator": "=", "group": "g1"},
            "f2": {"path": "status", "value": 2, "operator": "=", "group": "g1"}
        }))
        .unwrap();

        let root = plan.scope(plan.root()).unwrap();
        assert_eq!(root.members.len(), 1);
        let ScopeMember::Scope(or) = root.members[0] else {
            panic!("expected a nested scope");
        };
        let or = plan.scope(or).unwrap();
        assert_eq!(or.conjunction, Conjunction::Or);
        assert_eq!(or.members.len(), 2);
        assert!(or
            .members
            .iter()
            .all(|m| matches!(m, ScopeMember::Predicate(p) if p.field() == "status")));
    }

    #[test]
    fn test_unknown_field_and_operator() {
        let err = compile(json!({"f1": {"path": "missing", "value": 1}})).unwrap_err();
        assert!(matches!(err, Error::InvalidQueryField { field, .. } if field == "missing"));

        let err = compile(json!({"f1": {"path": "status", "value": 1, "operator": "LIKE"}})).unwrap_err();
        assert!(matches!(err, Error::InvalidOperator { operator, .. } if operator == "LIKE"));

        let err = compile(json!({"f1": {"path": "status", "value": 1, "operator": "BETWEEN"}})).unwrap_err();
        assert!(matches!(err, Error::MalformedQuery { key, .. } if key == "f1"));
    }

    #[test]
    fn test_relationship_paths() {
        assert!(compile(json!({"f1": {"path": "author.name", "value": "Ada"}})).is_ok());
        assert!(compile(json!({"f1": {"path": "author.id", "value": "7"}})).is_ok());
        assert!(compile(json!({"f1": {"path": "id", "value": "1"}})).is_ok());
        assert!(compile(json!({"f1": {"path": "author.mail", "value": "x"}})).is_err());
        assert!(compile(json!({"f1": {"path": "status.value", "value": 1}})).is_err());
    }

    #[test]
    fn test_explicit_language_wins() {
        let plan = compile(json!({"f1": {"path": "title", "value": "Hallo", "langcode": "de"}})).unwrap();
        let predicates = plan.predicates();
        assert!(matches!(
            predicates[0],
            Predicate::Condition { language: Some(l), .. } if l == "de"
        ));

        let plan = compile(json!({"f1": {"path": "status", "value": 1}})).unwrap();
        assert!(matches!(predicates_language(&plan), None));
    }

    fn predicates_language(plan: &QueryPlan) -> Option<String> {
        match plan.predicates()[0] {
            Predicate::Condition { language, .. } | Predicate::Exists { language, .. } => language.clone(),
        }
    }

    #[test]
    fn test_sorts_follow_predicates_and_idempotence() {
        let schema = schema();
        let rt = schema.resource_type("article").unwrap();
        let builder = QueryTreeBuilder::new();
        let roots = builder
            .build_tree(&json!({
                "g1": {"conjunction": "OR"},
                "f1": {"path": "status", "value": 1, "group": "g1"},
                "e1": {"path": "author", "exists": true}
            }))
            .unwrap();
        let sorts = builder.parse_sort(&json!("-created,title")).unwrap();
        let compiler = QueryCompiler::new(&*schema);

        let first = compiler.compile_plan(&roots, &sorts, rt).unwrap();
        let second = compiler.compile_plan(&roots, &sorts, rt).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.sorts().len(), 2);
        assert_eq!(first.sorts()[1].language.as_deref(), Some("en"));

        let bad_sort = [SortKey::asc("nope")];
        assert!(compiler.compile_plan(&roots, &bad_sort, rt).is_err());
    }
}
