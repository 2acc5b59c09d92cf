//! The typed Expression tree the parser produces (spec §4.4) and the
//! node-kind vocabulary the evaluator (spec §4.5) walks.

use crucible_core::AttributeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    NotEq,
    ContainsAll,
    StartsWith,
    EndsWith,
    RegexOp,
    Gt,
    Ge,
    Lt,
    Le,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulltextOp {
    Phrase,
    NotPhrase,
    ContainsAll,
    StartsWith,
    EndsWith,
    Regex,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Num(f64),
}

impl Value {
    pub fn as_str(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => format!("{n}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByClause {
    pub property: String,
    pub descending: bool,
}

/// A node of the parsed query. Each variant corresponds to one of the
/// node kinds in spec §4.5; `evaluator.rs` implements `evaluate` for this
/// type rather than giving each variant its own struct with a trait impl,
/// matching the "tagged sum type, not a class hierarchy" guidance.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    True,
    And(Vec<Expression>),
    Or(Vec<Expression>),
    Not(Box<Expression>),
    PropertyComparison {
        property: String,
        op: Op,
        value: Value,
    },
    AttributeExists {
        kind: AttributeType,
        name: String,
        negated: bool,
    },
    LabelComparison {
        name: String,
        op: Op,
        value: Value,
    },
    RelationWhere {
        name: String,
        sub: Box<Expression>,
    },
    /// `note.parents.PROP`: succeeds if any parent satisfies `sub`.
    AnyParent(Box<Expression>),
    /// `note.children.PROP`: succeeds if any child satisfies `sub`.
    AnyChild(Box<Expression>),
    /// `note.ancestors.PROP`: succeeds if any transitive ancestor satisfies `sub`.
    AnyAncestor(Box<Expression>),
    NoteFlatText {
        tokens: Vec<String>,
    },
    NoteContentFulltext {
        tokens: Vec<String>,
        operator: FulltextOp,
    },
    OrderByAndLimit {
        child: Box<Expression>,
        order_by: Vec<OrderByClause>,
        limit: Option<usize>,
    },
}
