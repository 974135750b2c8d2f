//! Backend-independent query accumulation.
//!
//! A [`QueryPlan`] is what compilation produces when it is not talking to a
//! concrete backend: a tree of conjunction scopes holding predicates, an
//! ordered sort list and an optional range. Backends either consume a plan
//! directly (the in-memory store does) or receive the same calls through
//! [`QuerySink`](crate::storage::QuerySink).

use super::expression::{Conjunction, Page, SortKey};
use crate::datum::Datum;
use crate::storage::QuerySink;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison operators understood by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    StartsWith,
    Contains,
    EndsWith,
    In,
    NotIn,
    Between,
    NotBetween,
    IsNull,
    IsNotNull,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::StartsWith => "STARTS_WITH",
            Operator::Contains => "CONTAINS",
            Operator::EndsWith => "ENDS_WITH",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Between => "BETWEEN",
            Operator::NotBetween => "NOT BETWEEN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        }
    }

    /// Check that the operand has the shape this operator needs.
    pub fn check_operand(&self, value: &Datum) -> Result<(), String> {
        match self {
            Operator::In | Operator::NotIn => match value {
                Datum::Array(items) if !items.is_empty() => Ok(()),
                _ => Err(format!("{} needs a non-empty list", self.as_str())),
            },
            Operator::Between | Operator::NotBetween => match value {
                Datum::Array(items) if items.len() == 2 => Ok(()),
                _ => Err(format!("{} needs a two-element list", self.as_str())),
            },
            Operator::IsNull | Operator::IsNotNull => Ok(()),
            Operator::StartsWith | Operator::Contains | Operator::EndsWith => match value {
                Datum::String(_) => Ok(()),
                _ => Err(format!("{} needs a string", self.as_str())),
            },
            _ => match value {
                Datum::Array(_) | Datum::Object(_) => {
                    Err(format!("{} needs a scalar", self.as_str()))
                }
                _ => Ok(()),
            },
        }
    }
}

impl FromStr for Operator {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();

        Ok(match normalized.as_str() {
            "=" => Operator::Eq,
            "<>" | "!=" => Operator::Ne,
            ">" => Operator::Gt,
            ">=" => Operator::Ge,
            "<" => Operator::Lt,
            "<=" => Operator::Le,
            "STARTS_WITH" => Operator::StartsWith,
            "CONTAINS" => Operator::Contains,
            "ENDS_WITH" => Operator::EndsWith,
            "IN" => Operator::In,
            "NOT IN" => Operator::NotIn,
            "BETWEEN" => Operator::Between,
            "NOT BETWEEN" => Operator::NotBetween,
            "IS NULL" => Operator::IsNull,
            "IS NOT NULL" => Operator::IsNotNull,
            _ => return Err(()),
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single filter predicate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Predicate {
    Condition {
        field: String,
        operator: Operator,
        value: Datum,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    Exists {
        field: String,
        exists: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
}

impl Predicate {
    pub fn field(&self) -> &str {
        match self {
            Predicate::Condition { field, .. } | Predicate::Exists { field, .. } => field,
        }
    }
}

/// Handle to a conjunction scope within a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeId(pub usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeMember {
    Predicate(Predicate),
    Scope(ScopeId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    pub conjunction: Conjunction,
    pub members: Vec<ScopeMember>,
}

/// Accumulated predicates, sorts and range for one resource type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryPlan {
    pub type_name: String,
    scopes: Vec<Scope>,
    sorts: Vec<SortKey>,
    range: Option<Page>,
}

impl QueryPlan {
    /// An empty plan with a root `AND` scope
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            scopes: vec![Scope {
                conjunction: Conjunction::And,
                members: Vec::new(),
            }],
            sorts: Vec::new(),
            range: None,
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn scope(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.0)
    }

    pub fn sorts(&self) -> &[SortKey] {
        &self.sorts
    }

    pub fn range(&self) -> Option<Page> {
        self.range
    }

    /// Every predicate in the plan, depth first
    pub fn predicates(&self) -> Vec<&Predicate> {
        let mut out = Vec::new();
        self.collect(self.root(), &mut out);
        out
    }

    fn collect<'a>(&'a self, id: ScopeId, out: &mut Vec<&'a Predicate>) {
        let Some(scope) = self.scope(id) else {
            return;
        };
        for member in &scope.members {
            match member {
                ScopeMember::Predicate(p) => out.push(p),
                ScopeMember::Scope(child) => self.collect(*child, out),
            }
        }
    }

    /// Issue the same calls against another sink
    pub fn replay<Q: QuerySink + ?Sized>(&self, sink: &mut Q) {
        let root = sink.root_scope();
        self.replay_scope(self.root(), root, sink);
        for sort in &self.sorts {
            sink.add_sort(sort.clone());
        }
        if let Some(page) = self.range {
            sink.set_range(page.offset, page.limit);
        }
    }

    fn replay_scope<Q: QuerySink + ?Sized>(&self, id: ScopeId, target: ScopeId, sink: &mut Q) {
        let Some(scope) = self.scope(id) else {
            return;
        };
        for member in &scope.members {
            match member {
                ScopeMember::Predicate(p) => sink.add_predicate(target, p.clone()),
                ScopeMember::Scope(child) => {
                    let conjunction = self.scopes[child.0].conjunction;
                    let opened = sink.open_scope(target, conjunction);
                    self.replay_scope(*child, opened, sink);
                }
            }
        }
    }
}

impl QuerySink for QueryPlan {
    fn root_scope(&self) -> ScopeId {
        self.root()
    }

    fn open_scope(&mut self, parent: ScopeId, conjunction: Conjunction) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(Scope {
            conjunction,
            members: Vec::new(),
        });
        if let Some(scope) = self.scopes.get_mut(parent.0) {
            scope.members.push(ScopeMember::Scope(id));
        }
        id
    }

    fn add_predicate(&mut self, scope: ScopeId, predicate: Predicate) {
        if let Some(scope) = self.scopes.get_mut(scope.0) {
            scope.members.push(ScopeMember::Predicate(predicate));
        }
    }

    fn add_sort(&mut self, sort: SortKey) {
        self.sorts.push(sort);
    }

    fn set_range(&mut self, offset: usize, limit: usize) {
        self.range = Some(Page { offset, limit });
    }
}
