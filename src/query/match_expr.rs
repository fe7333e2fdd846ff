//! Match expressions: boolean predicates over (possibly dotted) attribute paths.
//!
//! A match expression is a tree of atoms `(key, operator, value)` combined
//! with `and`. Keys may cross relations to arbitrary depth, e.g.
//! `source.team.division.tier` or `members.&.role`.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::QueryError;

/// Comparison operator of a match atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`; against `null` it means "is null".
    Eq,
    /// `!=`; against `null` it means "is not null".
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Value must be an array.
    In,
    /// Value must be an array.
    NotIn,
    Like,
    /// Value must be a two-element array.
    Between,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "in",
            Operator::NotIn => "not in",
            Operator::Like => "like",
            Operator::Between => "between",
        }
    }
}

impl FromStr for Operator {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "=" => Ok(Operator::Eq),
            "!=" | "<>" => Ok(Operator::Ne),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::Gte),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::Lte),
            "in" => Ok(Operator::In),
            "not in" => Ok(Operator::NotIn),
            "like" => Ok(Operator::Like),
            "between" => Ok(Operator::Between),
            other => Err(QueryError::InvalidValue {
                key: other.to_string(),
                reason: "unknown operator".into(),
            }),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single predicate: `key operator value`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchAtom {
    pub key: String,
    pub op: Operator,
    pub value: Value,
}

impl MatchAtom {
    /// The dotted key split into path segments.
    pub fn segments(&self) -> Vec<&str> {
        self.key.split('.').collect()
    }
}

/// Immutable predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchExp {
    Atom(MatchAtom),
    And(Vec<MatchExp>),
}

impl MatchExp {
    pub fn atom(key: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        MatchExp::Atom(MatchAtom {
            key: key.into(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::atom(key, Operator::Eq, value)
    }

    /// Match a single record by id.
    pub fn id(id: i64) -> Self {
        Self::eq("id", id)
    }

    /// Parse the operator from its textual form (`">="`, `"in"`, ...).
    pub fn parse(key: impl Into<String>, op: &str, value: impl Into<Value>) -> Result<Self, QueryError> {
        Ok(Self::atom(key, op.parse()?, value))
    }

    /// Conjunction. Nested `and`s are flattened.
    pub fn and(self, other: MatchExp) -> Self {
        let mut items = match self {
            MatchExp::And(items) => items,
            atom => vec![atom],
        };
        match other {
            MatchExp::And(more) => items.extend(more),
            atom => items.push(atom),
        }
        MatchExp::And(items)
    }

    /// Every atom in the tree, left to right.
    pub fn atoms(&self) -> Vec<&MatchAtom> {
        match self {
            MatchExp::Atom(atom) => vec![atom],
            MatchExp::And(items) => items.iter().flat_map(|e| e.atoms()).collect(),
        }
    }

    /// A copy with every key prefixed by `prefix.`.
    pub fn prefixed(&self, prefix: &str) -> MatchExp {
        match self {
            MatchExp::Atom(atom) => MatchExp::Atom(MatchAtom {
                key: format!("{}.{}", prefix, atom.key),
                op: atom.op,
                value: atom.value.clone(),
            }),
            MatchExp::And(items) => MatchExp::And(items.iter().map(|e| e.prefixed(prefix)).collect()),
        }
    }
}

/// AND together optional expressions.
pub fn and_match(left: Option<MatchExp>, right: Option<MatchExp>) -> Option<MatchExp> {
    match (left, right) {
        (Some(l), Some(r)) => Some(l.and(r)),
        (l, r) => l.or(r),
    }
}
