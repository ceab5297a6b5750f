//! Executable clause sets
//!
//! A clause set is the SQL-shaped plan for one level of a request. Values
//! never appear inline: every literal lives in `bindings` and is referenced
//! through a [`Placeholder`] assigned in increasing order.

use serde_json::Value;

use crate::query::{AggregateFunction, FieldFunction, SortDirection};

/// Index into [`ClauseSet::bindings`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Placeholder(pub usize);

/// Table in a `FROM` or `JOIN`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub collection: String,
    pub alias: String,
}

impl TableRef {
    pub fn new(collection: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            alias: alias.into(),
        }
    }

    pub fn column(&self, column: impl Into<String>) -> ColumnRef {
        ColumnRef::new(self.alias.clone(), column)
    }
}

/// Column qualified by table alias
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub table: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Column(ColumnRef),
    Param(Placeholder),
    Function {
        function: FieldFunction,
        column: ColumnRef,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Neq => "!=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Left,
    Inner,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Inner => "INNER JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: TableRef,
    pub on: Predicate,
}

/// Correlated sub-select used by `EXISTS` and relational counts
#[derive(Debug, Clone, PartialEq)]
pub struct SubQuery {
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub where_clause: Predicate,
}

/// Predicate tree
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Const(bool),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    In {
        operand: Operand,
        values: Vec<Placeholder>,
        negated: bool,
    },
    Between {
        operand: Operand,
        low: Placeholder,
        high: Placeholder,
        negated: bool,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    /// `pattern` carries its own wildcards; case-insensitive matches lower both sides
    Like {
        operand: Operand,
        pattern: Placeholder,
        case_insensitive: bool,
        negated: bool,
    },
    Exists {
        subquery: Box<SubQuery>,
        negated: bool,
    },
}

impl Predicate {
    /// AND-combines; `Const(true)` operands are dropped, `Const(false)` is kept
    pub fn and(items: Vec<Predicate>) -> Predicate {
        let mut parts: Vec<Predicate> = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Predicate::Const(true) => {}
                Predicate::And(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Predicate::Const(true),
            1 => parts.remove(0),
            _ => Predicate::And(parts),
        }
    }

    /// OR-combines; every operand is kept so denied branches stay visible
    pub fn or(items: Vec<Predicate>) -> Predicate {
        let mut parts: Vec<Predicate> = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Predicate::Or(inner) => parts.extend(inner),
                other => parts.push(other),
            }
        }
        match parts.len() {
            0 => Predicate::Const(false),
            1 => parts.remove(0),
            _ => Predicate::Or(parts),
        }
    }

    pub fn column_eq(left: ColumnRef, right: ColumnRef) -> Predicate {
        Predicate::Compare {
            left: Operand::Column(left),
            op: CompareOp::Eq,
            right: Operand::Column(right),
        }
    }

    pub fn is_const_true(&self) -> bool {
        matches!(self, Predicate::Const(true))
    }

    /// Number of `EXISTS` nodes anywhere in the tree
    pub fn exists_count(&self) -> usize {
        match self {
            Predicate::And(items) | Predicate::Or(items) => {
                items.iter().map(Predicate::exists_count).sum()
            }
            Predicate::Not(inner) => inner.exists_count(),
            Predicate::Exists { subquery, .. } => {
                1 + subquery.where_clause.exists_count()
                    + subquery
                        .joins
                        .iter()
                        .map(|j| j.on.exists_count())
                        .sum::<usize>()
            }
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectExpr {
    Column(ColumnRef),
    Function {
        function: FieldFunction,
        column: ColumnRef,
    },
    /// `column` is `None` for `count(*)` and `countAll`
    Aggregate {
        function: AggregateFunction,
        column: Option<ColumnRef>,
    },
    RelatedCount(Box<SubQuery>),
    /// Field the caller may not read
    Null,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SelectExpr,
    pub alias: String,
    /// `CASE WHEN` guard from field-level permissions
    pub when: Option<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub operand: Operand,
    pub direction: SortDirection,
}

/// Everything needed to issue one level's query
#[derive(Debug, Clone, PartialEq)]
pub struct ClauseSet {
    pub select: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub where_clause: Predicate,
    pub order: Vec<OrderItem>,
    pub group: Vec<Operand>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub bindings: Vec<Value>,
}

impl ClauseSet {
    pub fn binding(&self, placeholder: Placeholder) -> Option<&Value> {
        self.bindings.get(placeholder.0)
    }

    pub fn select_aliases(&self) -> Vec<&str> {
        self.select.iter().map(|s| s.alias.as_str()).collect()
    }

    pub fn is_aggregate(&self) -> bool {
        !self.group.is_empty()
            || self
                .select
                .iter()
                .any(|s| matches!(s.expr, SelectExpr::Aggregate { .. }))
    }
}
