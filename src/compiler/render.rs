//! SQL text rendering
//!
//! Identifiers are double-quoted, values become `?` markers. The returned
//! binding list follows marker order, which is not necessarily placeholder
//! order: select guards render before joins, joins before the where clause.

use std::fmt::Write;

use serde_json::Value;

use crate::query::{AggregateFunction, FieldFunction};

use super::clause::{
    ClauseSet, ColumnRef, Join, Operand, Placeholder, Predicate, SelectExpr, SelectItem, SubQuery,
    TableRef,
};

/// Renders a clause set into SQL text and its ordered bindings
pub fn render(clauses: &ClauseSet) -> (String, Vec<Value>) {
    let mut renderer = SqlRenderer {
        source: &clauses.bindings,
        sql: String::with_capacity(256),
        bindings: Vec::with_capacity(clauses.bindings.len()),
    };
    renderer.clause_set(clauses);
    (renderer.sql, renderer.bindings)
}

/// Renders a bare predicate; used by explain output
pub fn render_predicate(predicate: &Predicate, bindings: &[Value]) -> (String, Vec<Value>) {
    let mut renderer = SqlRenderer {
        source: bindings,
        sql: String::new(),
        bindings: Vec::new(),
    };
    renderer.predicate(predicate);
    (renderer.sql, renderer.bindings)
}

pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

struct SqlRenderer<'a> {
    source: &'a [Value],
    sql: String,
    bindings: Vec<Value>,
}

impl<'a> SqlRenderer<'a> {
    fn clause_set(&mut self, clauses: &ClauseSet) {
        self.sql.push_str("SELECT ");
        for (i, item) in clauses.select.iter().enumerate() {
            if i > 0 {
                self.sql.push_str(", ");
            }
            self.select_item(item);
        }
        if clauses.select.is_empty() {
            self.sql.push('1');
        }

        self.sql.push_str(" FROM ");
        self.table(&clauses.from);
        self.joins(&clauses.joins);

        if !clauses.where_clause.is_const_true() {
            self.sql.push_str(" WHERE ");
            self.predicate(&clauses.where_clause);
        }

        if !clauses.group.is_empty() {
            self.sql.push_str(" GROUP BY ");
            for (i, operand) in clauses.group.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.operand(operand);
            }
        }

        if !clauses.order.is_empty() {
            self.sql.push_str(" ORDER BY ");
            for (i, item) in clauses.order.iter().enumerate() {
                if i > 0 {
                    self.sql.push_str(", ");
                }
                self.operand(&item.operand);
                self.sql.push(' ');
                self.sql.push_str(item.direction.as_str());
            }
        }

        if let Some(limit) = clauses.limit {
            let _ = write!(self.sql, " LIMIT {}", limit);
        }
        if let Some(offset) = clauses.offset {
            let _ = write!(self.sql, " OFFSET {}", offset);
        }
    }

    fn select_item(&mut self, item: &SelectItem) {
        match &item.when {
            Some(guard) => {
                self.sql.push_str("CASE WHEN ");
                self.predicate(guard);
                self.sql.push_str(" THEN ");
                self.select_expr(&item.expr);
                self.sql.push_str(" END");
            }
            None => self.select_expr(&item.expr),
        }
        self.sql.push_str(" AS ");
        self.sql.push_str(&quote_ident(&item.alias));
    }

    fn select_expr(&mut self, expr: &SelectExpr) {
        match expr {
            SelectExpr::Column(column) => self.column(column),
            SelectExpr::Function { function, column } => self.function(*function, column),
            SelectExpr::Aggregate { function, column } => self.aggregate(*function, column.as_ref()),
            SelectExpr::RelatedCount(subquery) => {
                self.sql.push('(');
                self.subquery("COUNT(*)", subquery);
                self.sql.push(')');
            }
            SelectExpr::Null => self.sql.push_str("NULL"),
        }
    }

    fn aggregate(&mut self, function: AggregateFunction, column: Option<&ColumnRef>) {
        let name = match function {
            AggregateFunction::Count
            | AggregateFunction::CountDistinct
            | AggregateFunction::CountAll => "COUNT",
            AggregateFunction::Sum | AggregateFunction::SumDistinct => "SUM",
            AggregateFunction::Avg | AggregateFunction::AvgDistinct => "AVG",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Max => "MAX",
        };
        self.sql.push_str(name);
        self.sql.push('(');
        match column {
            Some(column) => {
                if function.is_distinct() {
                    self.sql.push_str("DISTINCT ");
                }
                self.column(column);
            }
            None => self.sql.push('*'),
        }
        self.sql.push(')');
    }

    fn function(&mut self, function: FieldFunction, column: &ColumnRef) {
        let part = match function {
            FieldFunction::Year => "YEAR",
            FieldFunction::Month => "MONTH",
            FieldFunction::Week => "WEEK",
            FieldFunction::Day => "DAY",
            FieldFunction::Weekday => "DOW",
            FieldFunction::Hour => "HOUR",
            FieldFunction::Minute => "MINUTE",
            FieldFunction::Second => "SECOND",
            FieldFunction::Count => {
                self.sql.push_str("JSON_ARRAY_LENGTH(");
                self.column(column);
                self.sql.push(')');
                return;
            }
        };
        let _ = write!(self.sql, "EXTRACT({} FROM ", part);
        self.column(column);
        self.sql.push(')');
    }

    fn table(&mut self, table: &TableRef) {
        self.sql.push_str(&quote_ident(&table.collection));
        if table.alias != table.collection {
            self.sql.push_str(" AS ");
            self.sql.push_str(&quote_ident(&table.alias));
        }
    }

    fn joins(&mut self, joins: &[Join]) {
        for join in joins {
            self.sql.push(' ');
            self.sql.push_str(join.kind.as_sql());
            self.sql.push(' ');
            self.table(&join.table);
            self.sql.push_str(" ON ");
            self.predicate(&join.on);
        }
    }

    fn subquery(&mut self, projection: &str, subquery: &SubQuery) {
        self.sql.push_str("SELECT ");
        self.sql.push_str(projection);
        self.sql.push_str(" FROM ");
        self.table(&subquery.from);
        self.joins(&subquery.joins);
        if !subquery.where_clause.is_const_true() {
            self.sql.push_str(" WHERE ");
            self.predicate(&subquery.where_clause);
        }
    }

    fn column(&mut self, column: &ColumnRef) {
        self.sql.push_str(&quote_ident(&column.table));
        self.sql.push('.');
        self.sql.push_str(&quote_ident(&column.column));
    }

    fn placeholder(&mut self, placeholder: Placeholder) {
        self.sql.push('?');
        self.bindings
            .push(self.source.get(placeholder.0).cloned().unwrap_or(Value::Null));
    }

    fn operand(&mut self, operand: &Operand) {
        match operand {
            Operand::Column(column) => self.column(column),
            Operand::Param(placeholder) => self.placeholder(*placeholder),
            Operand::Function { function, column } => self.function(*function, column),
        }
    }

    fn predicate(&mut self, predicate: &Predicate) {
        match predicate {
            Predicate::Const(true) => self.sql.push_str("1 = 1"),
            Predicate::Const(false) => self.sql.push_str("1 = 0"),
            Predicate::And(items) => self.connective(" AND ", items, "1 = 1"),
            Predicate::Or(items) => self.connective(" OR ", items, "1 = 0"),
            Predicate::Not(inner) => {
                self.sql.push_str("NOT (");
                self.predicate(inner);
                self.sql.push(')');
            }
            Predicate::Compare { left, op, right } => {
                self.operand(left);
                self.sql.push(' ');
                self.sql.push_str(op.as_sql());
                self.sql.push(' ');
                self.operand(right);
            }
            Predicate::In {
                operand,
                values,
                negated,
            } => {
                self.operand(operand);
                self.sql.push_str(if *negated { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(", ");
                    }
                    self.placeholder(*value);
                }
                self.sql.push(')');
            }
            Predicate::Between {
                operand,
                low,
                high,
                negated,
            } => {
                self.operand(operand);
                self.sql
                    .push_str(if *negated { " NOT BETWEEN " } else { " BETWEEN " });
                self.placeholder(*low);
                self.sql.push_str(" AND ");
                self.placeholder(*high);
            }
            Predicate::IsNull { operand, negated } => {
                self.operand(operand);
                self.sql
                    .push_str(if *negated { " IS NOT NULL" } else { " IS NULL" });
            }
            Predicate::Like {
                operand,
                pattern,
                case_insensitive,
                negated,
            } => {
                if *case_insensitive {
                    self.sql.push_str("LOWER(");
                    self.operand(operand);
                    self.sql.push(')');
                } else {
                    self.operand(operand);
                }
                self.sql.push_str(if *negated { " NOT LIKE " } else { " LIKE " });
                self.placeholder(*pattern);
            }
            Predicate::Exists { subquery, negated } => {
                self.sql
                    .push_str(if *negated { "NOT EXISTS (" } else { "EXISTS (" });
                self.subquery("1", subquery);
                self.sql.push(')');
            }
        }
    }

    fn connective(&mut self, joiner: &str, items: &[Predicate], empty: &str) {
        match items.len() {
            0 => self.sql.push_str(empty),
            1 => self.predicate(&items[0]),
            _ => {
                self.sql.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        self.sql.push_str(joiner);
                    }
                    self.predicate(item);
                }
                self.sql.push(')');
            }
        }
    }
}
