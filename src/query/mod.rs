//! Structured filter and sort queries
//!
//! Raw request parameters pass through three stages:
//!
//! 1. [`params`]: bracketed query-string pairs to nested values
//! 2. [`builder`]: filter entries to a forest of groups, conditions and
//!    exists checks; sort values to an ordered key list
//! 3. [`compiler`]: forest and sorts, validated against the schema, onto a
//!    backend [`QuerySink`]

pub mod builder;
pub mod compiler;
pub mod expression;
pub mod params;
pub mod plan;

pub use builder::QueryTreeBuilder;
pub use compiler::QueryCompiler;
pub use expression::{Conjunction, Direction, ExpressionNode, NodeKind, Page, SortKey, TreeNode};
pub use params::RequestParams;
pub use plan::{Operator, Predicate, QueryPlan, ScopeId};

use crate::config::QueryConfig;
use crate::error::Result;
use crate::schema::{ResourceType, SchemaLookup};
use crate::storage::QuerySink;
use tracing::{info, instrument};

/// Build a collection query from request parameters.
///
/// Filters and sorts are compiled onto `query`, then the requested page
/// (or the configured default) becomes its range.
#[instrument(skip_all, fields(type_name = %resource_type.type_name))]
pub fn build_query<S, Q>(
    schema: &S,
    resource_type: &ResourceType,
    params: &RequestParams,
    query: Q,
    config: &QueryConfig,
) -> Result<Q>
where
    S: SchemaLookup + ?Sized,
    Q: QuerySink,
{
    let language_key = resource_type
        .language_key
        .as_deref()
        .unwrap_or(&config.language_key);
    let builder = QueryTreeBuilder::new().with_language_key(language_key);

    let roots = match &params.filter {
        Some(filter) => builder.build_tree(filter)?,
        None => Vec::new(),
    };
    let sorts = match &params.sort {
        Some(sort) => builder.parse_sort(sort)?,
        None => Vec::new(),
    };
    let page = params.page(config.default_limit, config.max_limit)?;

    let mut query = QueryCompiler::new(schema).compile(query, &roots, &sorts, resource_type)?;
    query.set_range(page.offset, page.limit);

    info!(
        filters = roots.iter().map(TreeNode::node_count).sum::<usize>(),
        sorts = sorts.len(),
        offset = page.offset,
        limit = page.limit,
        "Built query"
    );
    Ok(query)
}
