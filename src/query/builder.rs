//! Filter and sort parameter parsing.
//!
//! Filter parameters arrive as a map keyed by caller-chosen identifiers.
//! Each entry is a condition, a group or an existence check, either in the
//! flat form
//!
//! ```json
//! {
//!   "g1": {"conjunction": "OR"},
//!   "f1": {"path": "status", "value": 1, "operator": "=", "group": "g1"}
//! }
//! ```
//!
//! or wrapped in a single `condition` / `group` / `exists` key:
//!
//! ```json
//! {"f1": {"condition": {"path": "title", "value": "Hello"}}}
//! ```
//!
//! [`QueryTreeBuilder::build`] turns the entries into flat
//! [`ExpressionNode`]s and [`QueryTreeBuilder::attach_to_tree`] links them
//! into a forest by their `group` references.

use super::expression::{
    attach_in, insert_ordered, Conjunction, Direction, ExpressionNode, NodeKind, SortKey, TreeNode,
};
use crate::datum::Datum;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Default raw property carrying a language code
pub const DEFAULT_LANGUAGE_KEY: &str = "langcode";

const CONDITION_KEY: &str = "condition";
const GROUP_KEY: &str = "group";
const EXISTS_KEY: &str = "exists";
const MEMBER_OF_KEY: &str = "memberOf";
const CONJUNCTION_KEY: &str = "conjunction";
const PATH_KEYS: [&str; 2] = ["path", "field"];
const VALUE_KEY: &str = "value";
const OPERATOR_KEY: &str = "operator";
const DIRECTION_KEY: &str = "direction";

/// Parses raw filter and sort parameters.
#[derive(Debug, Clone)]
pub struct QueryTreeBuilder {
    language_key: String,
}

impl Default for QueryTreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryTreeBuilder {
    pub fn new() -> Self {
        Self {
            language_key: DEFAULT_LANGUAGE_KEY.to_string(),
        }
    }

    /// Use a different raw property for language codes
    pub fn with_language_key(mut self, key: impl Into<String>) -> Self {
        self.language_key = key.into();
        self
    }

    /// Parse a raw filter object into flat nodes
    pub fn build(&self, raw: &Value) -> Result<Vec<ExpressionNode>> {
        let entries = raw
            .as_object()
            .ok_or_else(|| Error::malformed("filter", "expected an object of filter entries"))?;
        self.build_entries(entries.iter().map(|(k, v)| (k.clone(), v.clone())))
    }

    /// Parse filter entries in the order given.
    ///
    /// Identifiers must be unique; a repeated identifier is rejected rather
    /// than letting the later entry replace the earlier one.
    pub fn build_entries<I>(&self, entries: I) -> Result<Vec<ExpressionNode>>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut nodes: Vec<ExpressionNode> = Vec::new();
        let mut seen = std::collections::HashSet::new();

        for (id, entry) in entries {
            if !seen.insert(id.clone()) {
                return Err(Error::malformed(&id, "duplicate filter identifier"));
            }
            let node = self.parse_entry(&id, &entry)?;
            debug!(id = %node.id, kind = ?node.kind, parent = ?node.parent_group_id, "Parsed filter entry");
            nodes.push(node);
        }

        Ok(nodes)
    }

    /// Parse and assemble in one step
    pub fn build_tree(&self, raw: &Value) -> Result<Vec<TreeNode>> {
        Self::attach_to_tree(self.build(raw)?)
    }

    /// Link flat nodes into a forest by their parent group references.
    ///
    /// Nodes whose parent is not attached yet are requeued. Every pass over
    /// the queue must attach at least one node; a pass without progress
    /// means some reference can never resolve (for instance two groups that
    /// name each other) and fails the build.
    pub fn attach_to_tree(nodes: Vec<ExpressionNode>) -> Result<Vec<TreeNode>> {
        let groups: HashMap<&str, bool> = nodes
            .iter()
            .map(|n| (n.id.as_str(), n.is_group()))
            .collect();

        for node in &nodes {
            if let Some(parent) = &node.parent_group_id {
                match groups.get(parent.as_str()) {
                    None => {
                        return Err(Error::malformed(
                            &node.id,
                            format!("parent group '{}' does not exist", parent),
                        ))
                    }
                    Some(false) => {
                        return Err(Error::malformed(
                            &node.id,
                            format!("'{}' is not a group", parent),
                        ))
                    }
                    Some(true) => {}
                }
            }
        }

        let mut roots: Vec<TreeNode> = Vec::new();
        let mut pending: VecDeque<TreeNode> = nodes
            .into_iter()
            .enumerate()
            .map(|(ordinal, node)| TreeNode::new(ordinal, node))
            .collect();

        while !pending.is_empty() {
            let mut progressed = false;

            for _ in 0..pending.len() {
                let Some(item) = pending.pop_front() else {
                    break;
                };
                let parent = item.node.parent_group_id.clone();
                match parent {
                    None => {
                        insert_ordered(&mut roots, item);
                        progressed = true;
                    }
                    Some(parent) => match attach_in(&mut roots, &parent, item) {
                        Ok(()) => progressed = true,
                        Err(item) => pending.push_back(item),
                    },
                }
            }

            if !progressed {
                if let Some(stuck) = pending.front() {
                    return Err(Error::malformed(
                        stuck.id(),
                        format!(
                            "parent group '{}' never resolves to an attached group",
                            stuck.node.parent_group_id.as_deref().unwrap_or_default()
                        ),
                    ));
                }
            }
        }

        Ok(roots)
    }

    /// Parse raw sort parameters into an ordered key list.
    ///
    /// Accepts `"-created,title"`, an array of entries, or an object of
    /// entries keyed by identifier. An entry is either such a string or an
    /// object with `path` (or `value`/`field`), `direction` and an optional
    /// language code.
    pub fn parse_sort(&self, raw: &Value) -> Result<Vec<SortKey>> {
        match raw {
            Value::String(s) => Ok(parse_sort_string(s)),
            Value::Array(items) => {
                let mut keys = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    keys.extend(self.parse_sort_entry(&i.to_string(), item)?);
                }
                Ok(keys)
            }
            Value::Object(entries) => {
                let mut keys = Vec::with_capacity(entries.len());
                for (id, item) in entries {
                    keys.extend(self.parse_sort_entry(id, item)?);
                }
                Ok(keys)
            }
            _ => Err(Error::malformed("sort", "expected a string, array or object")),
        }
    }

    fn parse_sort_entry(&self, id: &str, entry: &Value) -> Result<Vec<SortKey>> {
        match entry {
            Value::String(s) => Ok(parse_sort_string(s)),
            Value::Object(props) => {
                let field = props
                    .get("path")
                    .or_else(|| props.get(VALUE_KEY))
                    .or_else(|| props.get("field"))
                    .and_then(Value::as_str)
                    .filter(|f| !f.is_empty())
                    .ok_or_else(|| Error::malformed(id, "sort entry needs a field path"))?;
                let direction = match props.get(DIRECTION_KEY) {
                    None => Direction::Asc,
                    Some(Value::String(d)) => Direction::parse(id, d)?,
                    Some(_) => return Err(Error::malformed(id, "direction must be a string")),
                };
                Ok(vec![SortKey {
                    field: field.to_string(),
                    direction,
                    language: self.language_of(id, props)?,
                }])
            }
            _ => Err(Error::malformed(id, "sort entry must be a string or an object")),
        }
    }

    fn parse_entry(&self, id: &str, entry: &Value) -> Result<ExpressionNode> {
        let props = entry
            .as_object()
            .ok_or_else(|| Error::malformed(id, "filter entry must be an object"))?;

        // Wrapped form: a single condition/group/exists key holding the properties.
        if props.len() == 1 {
            if let Some((wrapper, Value::Object(inner))) = props.iter().next() {
                match wrapper.as_str() {
                    CONDITION_KEY => return self.condition(id, inner),
                    GROUP_KEY => return self.group(id, inner),
                    EXISTS_KEY => return self.exists(id, inner, true),
                    _ => {}
                }
            }
        }

        if props.contains_key(CONJUNCTION_KEY) {
            self.group(id, props)
        } else if props.contains_key(EXISTS_KEY) {
            self.exists(id, props, true)
        } else if path_of(props).is_some()
            && (props.contains_key(VALUE_KEY) || props.contains_key(OPERATOR_KEY))
        {
            self.condition(id, props)
        } else if path_of(props).is_some() {
            Err(Error::malformed(id, "condition needs a value or an operator"))
        } else {
            Err(Error::malformed(
                id,
                "entry matches none of the condition, group or exists shapes",
            ))
        }
    }

    fn condition(&self, id: &str, props: &Map<String, Value>) -> Result<ExpressionNode> {
        let field = path_of(props).ok_or_else(|| Error::malformed(id, "condition needs a path"))?;
        let operator = match props.get(OPERATOR_KEY) {
            None => "=".to_string(),
            Some(Value::String(op)) => op.trim().to_string(),
            Some(_) => return Err(Error::malformed(id, "operator must be a string")),
        };
        let value = props.get(VALUE_KEY).cloned().map(Datum::from).unwrap_or_default();

        Ok(ExpressionNode {
            id: id.to_string(),
            kind: NodeKind::Condition {
                field,
                value,
                operator,
                language: self.language_of(id, props)?,
            },
            parent_group_id: parent_of(id, props)?,
        })
    }

    fn group(&self, id: &str, props: &Map<String, Value>) -> Result<ExpressionNode> {
        let conjunction = match props.get(CONJUNCTION_KEY) {
            Some(Value::String(raw)) => Conjunction::parse(id, raw)?,
            Some(_) => return Err(Error::malformed(id, "conjunction must be a string")),
            None => return Err(Error::malformed(id, "group needs a conjunction")),
        };

        Ok(ExpressionNode {
            id: id.to_string(),
            kind: NodeKind::Group { conjunction },
            parent_group_id: parent_of(id, props)?,
        })
    }

    fn exists(&self, id: &str, props: &Map<String, Value>, default: bool) -> Result<ExpressionNode> {
        let field = path_of(props).ok_or_else(|| Error::malformed(id, "exists check needs a path"))?;
        let expected = match props.get(EXISTS_KEY) {
            None => default,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64() != Some(0.0),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "1" | "true" => true,
                "0" | "false" => false,
                other => {
                    return Err(Error::malformed(
                        id,
                        format!("exists flag '{}' is not a boolean", other),
                    ))
                }
            },
            Some(_) => return Err(Error::malformed(id, "exists flag must be a boolean")),
        };

        Ok(ExpressionNode {
            id: id.to_string(),
            kind: NodeKind::Exists {
                field,
                expected,
                language: self.language_of(id, props)?,
            },
            parent_group_id: parent_of(id, props)?,
        })
    }

    fn language_of(&self, id: &str, props: &Map<String, Value>) -> Result<Option<String>> {
        match props.get(&self.language_key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(code)) => Ok(Some(code.clone())),
            Some(_) => Err(Error::malformed(
                id,
                format!("'{}' must be a language code", self.language_key),
            )),
        }
    }
}

fn path_of(props: &Map<String, Value>) -> Option<String> {
    PATH_KEYS
        .iter()
        .find_map(|k| props.get(*k))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
}

fn parent_of(id: &str, props: &Map<String, Value>) -> Result<Option<String>> {
    match props.get(GROUP_KEY).or_else(|| props.get(MEMBER_OF_KEY)) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(parent)) if parent.is_empty() => Ok(None),
        Some(Value::String(parent)) => Ok(Some(parent.clone())),
        Some(_) => Err(Error::malformed(id, "group reference must be a string")),
    }
}

/// `-created,title` style sort list
fn parse_sort_string(raw: &str) -> Vec<SortKey> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| match part.strip_prefix('-') {
            Some(field) => SortKey::desc(field),
            None => SortKey::asc(part.trim_start_matches('+')),
        })
        .collect()
}
