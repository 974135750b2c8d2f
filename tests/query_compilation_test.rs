//! End-to-end tests for filter/sort parsing, compilation and execution

use hyperdoc::config::QueryConfig;
use hyperdoc::error::Error;
use hyperdoc::query::plan::ScopeMember;
use hyperdoc::query::{build_query, Conjunction, Operator, Predicate, QueryCompiler, QueryPlan, QueryTreeBuilder, RequestParams, TreeNode};
use hyperdoc::schema::{SchemaLookup, SchemaRegistry};
use hyperdoc::storage::{MemoryStore, StorageQuery};
use hyperdoc::Datum;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

const SCHEMA: &str = include_str!("../demos/schema.toml");
const RECORDS: &str = include_str!("../demos/records.json");

fn schema() -> Arc<SchemaRegistry> {
    SchemaRegistry::from_toml_str(SCHEMA).expect("Failed to load schema")
}

fn compile(filter: serde_json::Value) -> hyperdoc::error::Result<QueryPlan> {
    let schema = schema();
    let rt = schema.resource_type("node--article")?;
    let roots = QueryTreeBuilder::new().build_tree(&filter)?;
    QueryCompiler::new(&*schema).compile_plan(&roots, &[], rt)
}

fn collect_ids<'a>(tree: &'a TreeNode, out: &mut Vec<&'a str>) {
    out.push(tree.id());
    for child in &tree.children {
        collect_ids(child, out);
    }
}

#[test]
fn test_single_condition_compiles_into_root_scope() {
    let plan = compile(json!({"f1": {"path": "title", "value": "Hello", "operator": "="}}))
        .expect("Failed to compile");

    let root = plan.scope(plan.root()).expect("root scope");
    assert_eq!(root.conjunction, Conjunction::And);
    assert_eq!(root.members.len(), 1);
    match &root.members[0] {
        ScopeMember::Predicate(Predicate::Condition {
            field,
            operator,
            value,
            ..
        }) => {
            assert_eq!(field, "title");
            assert_eq!(operator.as_str(), "=");
            assert_eq!(value, &Datum::from("Hello"));
        }
        other => panic!("Expected a condition, got: {:?}", other),
    }
}

#[test]
fn test_or_group_compiles_into_one_scope_with_two_predicates() {
    let plan = compile(json!({
        "g1": {"conjunction": "OR"},
        "f1": {"path": "status", "value": 1, "operator": "=", "group": "g1"},
        "f2": {"path": "status", "value": 2, "operator": "=", "group": "g1"}
    }))
    .expect("Failed to compile");

    let root = plan.scope(plan.root()).expect("root scope");
    let scopes: Vec<_> = root
        .members
        .iter()
        .filter_map(|m| match m {
            ScopeMember::Scope(id) => plan.scope(*id),
            ScopeMember::Predicate(_) => None,
        })
        .collect();

    assert_eq!(root.members.len(), 1);
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0].conjunction, Conjunction::Or);
    assert_eq!(scopes[0].members.len(), 2);
    assert_eq!(plan.predicates().len(), 2);
}

#[test]
fn test_forest_reaches_every_node_exactly_once() {
    let raw = json!({
        "c3": {"path": "title", "value": "x", "group": "g2"},
        "g2": {"conjunction": "AND", "group": "g1"},
        "c1": {"path": "status", "value": 1, "group": "g1"},
        "g1": {"conjunction": "OR"},
        "c2": {"path": "created", "value": 5, "operator": ">"},
        "g3": {"group": {"conjunction": "AND", "memberOf": "g2"}}
    });

    let builder = QueryTreeBuilder::new();
    let nodes = builder.build(&raw).expect("Failed to parse");
    let ids: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let roots = QueryTreeBuilder::attach_to_tree(nodes).expect("Failed to assemble");

    let mut reached = Vec::new();
    for root in &roots {
        collect_ids(root, &mut reached);
    }
    let unique: HashSet<&str> = reached.iter().copied().collect();

    assert_eq!(reached.len(), ids.len());
    assert_eq!(unique.len(), ids.len());
    assert_eq!(roots.iter().map(TreeNode::id).collect::<Vec<_>>(), vec!["g1", "c2"]);

    let g2 = roots[0].find("g2").expect("g2 attached");
    assert_eq!(g2.children.iter().map(TreeNode::id).collect::<Vec<_>>(), vec!["c3", "g3"]);
}

#[test]
fn test_missing_parent_is_malformed() {
    let err = QueryTreeBuilder::new()
        .build_tree(&json!({
            "g1": {"conjunction": "OR"},
            "f1": {"path": "status", "value": 1, "group": "nope"}
        }))
        .expect_err("dangling parent must fail");

    assert!(matches!(err, Error::MalformedQuery { ref key, .. } if key == "f1"));
    assert!(err.is_client_error());
}

#[test]
fn test_group_cycle_is_malformed() {
    let err = QueryTreeBuilder::new()
        .build_tree(&json!({
            "a": {"conjunction": "AND", "group": "b"},
            "b": {"conjunction": "OR", "group": "a"}
        }))
        .expect_err("cycle must fail");
    assert!(matches!(err, Error::MalformedQuery { .. }));
}

#[test]
fn test_compilation_is_idempotent() {
    let schema = schema();
    let rt = schema.resource_type("node--article").expect("type");
    let builder = QueryTreeBuilder::new();
    let roots = builder
        .build_tree(&json!({
            "g1": {"conjunction": "OR"},
            "f1": {"path": "status", "value": 1, "group": "g1"},
            "f2": {"path": "uid.name", "value": "ada", "operator": "STARTS_WITH", "group": "g1"},
            "e1": {"path": "field_tags", "exists": true}
        }))
        .expect("Failed to build");
    let sorts = builder.parse_sort(&json!([{"path": "created", "direction": "DESC"}, "title"])).expect("sort");

    let compiler = QueryCompiler::new(&*schema);
    let first = compiler.compile_plan(&roots, &sorts, rt).expect("first");
    let second = compiler.compile_plan(&roots, &sorts, rt).expect("second");

    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_value(&first).expect("serialize"),
        serde_json::to_value(&second).expect("serialize")
    );
}

#[test]
fn test_translatable_field_gets_default_language() {
    let plan = compile(json!({"f1": {"path": "title", "value": "Hello"}})).expect("compile");
    match plan.predicates()[0] {
        Predicate::Condition { language, operator, .. } => {
            assert_eq!(language.as_deref(), Some("en"));
            assert_eq!(*operator, Operator::Eq);
        }
        other => panic!("Expected a condition, got: {:?}", other),
    }
}

#[test]
fn test_query_string_to_records() {
    let schema = schema();
    let rt = schema.resource_type("node--article").expect("type");
    let store = MemoryStore::from_json(RECORDS).expect("records").with_schema(schema.clone());

    let params = RequestParams::from_query_string(
        "filter[g1][group][conjunction]=OR\
         &filter[a][condition][path]=uid.name&filter[a][condition][value]=grace&filter[a][condition][memberOf]=g1\
         &filter[b][condition][path]=field_tags.name&filter[b][condition][value]=rust&filter[b][condition][memberOf]=g1\
         &sort=-created",
    )
    .expect("params");

    let query = build_query(&*schema, rt, &params, store.query("node--article"), &QueryConfig::default())
        .expect("Failed to build query");
    let records = query.execute().expect("Failed to execute");

    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["3", "1"]);
}

#[test]
fn test_invalid_operator_and_field_surface_as_client_errors() {
    let err = compile(json!({"f1": {"path": "status", "value": 1, "operator": "~"}})).expect_err("operator");
    assert!(matches!(err, Error::InvalidOperator { .. }));

    let err = compile(json!({"f1": {"path": "nope", "value": 1}})).expect_err("field");
    assert!(matches!(err, Error::InvalidQueryField { .. }));
    assert!(err.is_client_error());
}

#[test]
fn test_shorthand_list_filters_by_membership() {
    let schema = schema();
    let rt = schema.resource_type("node--article").expect("type");
    let store = MemoryStore::from_json(RECORDS).expect("records").with_schema(schema.clone());
    let params = RequestParams::from_query_string("filter[status][]=0&filter[status][]=9").expect("params");

    let query = build_query(&*schema, rt, &params, store.query("node--article"), &QueryConfig::default())
        .expect("Failed to build query");
    assert!(matches!(
        query.plan().predicates()[0],
        Predicate::Condition { operator: Operator::In, .. }
    ));

    let records = query.execute().expect("Failed to execute");
    let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["3"]);
}
