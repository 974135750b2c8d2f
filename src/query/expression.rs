//! Filter expression nodes and the forest they are assembled into.

use crate::datum::Datum;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Boolean combinator of a group's members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl Conjunction {
    /// Parse `AND` / `OR`, case-insensitively
    pub fn parse(key: &str, raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "AND" => Ok(Conjunction::And),
            "OR" => Ok(Conjunction::Or),
            other => Err(Error::malformed(
                key,
                format!("unknown conjunction '{}', expected AND or OR", other),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Conjunction::And => "AND",
            Conjunction::Or => "OR",
        }
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(key: &str, raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "ASC" => Ok(Direction::Asc),
            "DESC" => Ok(Direction::Desc),
            other => Err(Error::malformed(
                key,
                format!("unknown sort direction '{}', expected ASC or DESC", other),
            )),
        }
    }
}

/// One entry of the sort list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Asc,
            language: None,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: Direction::Desc,
            language: None,
        }
    }
}

/// Offset/limit window over a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

/// What a filter node does
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Compare a field against a value
    Condition {
        field: String,
        value: Datum,
        operator: String,
        language: Option<String>,
    },
    /// Field presence (`expected = true`) or absence
    Exists {
        field: String,
        expected: bool,
        language: Option<String>,
    },
    /// Combine members with a conjunction
    Group { conjunction: Conjunction },
}

/// A filter entry as parsed from the raw parameter map.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionNode {
    /// Caller-chosen key from the raw map
    pub id: String,
    pub kind: NodeKind,
    pub parent_group_id: Option<String>,
}

impl ExpressionNode {
    pub fn is_group(&self) -> bool {
        matches!(self.kind, NodeKind::Group { .. })
    }
}

/// A node placed in the filter forest.
///
/// Only group nodes ever have children. Children keep the order in which
/// their entries appeared in the raw parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub node: ExpressionNode,
    pub children: Vec<TreeNode>,
    pub(crate) ordinal: usize,
}

impl TreeNode {
    pub(crate) fn new(ordinal: usize, node: ExpressionNode) -> Self {
        Self {
            node,
            children: Vec::new(),
            ordinal,
        }
    }

    pub fn id(&self) -> &str {
        &self.node.id
    }

    /// Number of nodes in this subtree, itself included
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::node_count).sum::<usize>()
    }

    /// Find a node by id anywhere in this subtree
    pub fn find(&self, id: &str) -> Option<&TreeNode> {
        if self.node.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(id))
    }

    /// Place `item` under the group `parent` if it lives in this subtree.
    ///
    /// Hands the item back when no such group is attached yet.
    pub(crate) fn attach(&mut self, parent: &str, item: TreeNode) -> std::result::Result<(), TreeNode> {
        if self.node.is_group() && self.node.id == parent {
            insert_ordered(&mut self.children, item);
            return Ok(());
        }
        attach_in(&mut self.children, parent, item)
    }
}

/// Try each tree of a forest in turn
pub(crate) fn attach_in(
    forest: &mut [TreeNode],
    parent: &str,
    mut item: TreeNode,
) -> std::result::Result<(), TreeNode> {
    for tree in forest.iter_mut() {
        match tree.attach(parent, item) {
            Ok(()) => return Ok(()),
            Err(back) => item = back,
        }
    }
    Err(item)
}

pub(crate) fn insert_ordered(siblings: &mut Vec<TreeNode>, item: TreeNode) {
    let pos = siblings.partition_point(|n| n.ordinal < item.ordinal);
    siblings.insert(pos, item);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, parent: Option<&str>) -> ExpressionNode {
        ExpressionNode {
            id: id.to_string(),
            kind: NodeKind::Group {
                conjunction: Conjunction::Or,
            },
            parent_group_id: parent.map(str::to_string),
        }
    }

    #[test]
    fn test_attach_respects_raw_order() {
        let mut root = TreeNode::new(0, group("g1", None));
        root.attach("g1", TreeNode::new(3, group("c", Some("g1")))).unwrap();
        root.attach("g1", TreeNode::new(1, group("a", Some("g1")))).unwrap();
        root.attach("g1", TreeNode::new(2, group("b", Some("g1")))).unwrap();

        let ids: Vec<_> = root.children.iter().map(TreeNode::id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(root.node_count(), 4);
    }

    #[test]
    fn test_attach_hands_back_unknown_parent() {
        let mut forest = vec![TreeNode::new(0, group("g1", None))];
        let item = TreeNode::new(1, group("g2", Some("g9")));
        let back = attach_in(&mut forest, "g9", item).unwrap_err();
        assert_eq!(back.id(), "g2");
    }

    #[test]
    fn test_parse_conjunction_and_direction() {
        assert_eq!(Conjunction::parse("g", "or").unwrap(), Conjunction::Or);
        assert!(Conjunction::parse("g", "XOR").is_err());
        assert_eq!(Direction::parse("s", "desc").unwrap(), Direction::Desc);
        assert!(Direction::parse("s", "sideways").is_err());
    }
}
