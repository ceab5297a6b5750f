//! Clause set evaluation over in-memory rows
//!
//! Two-valued: any comparison touching `null` is false, `NOT` simply
//! inverts. Correlated sub-selects see every frame of the enclosing query.

use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use regex::Regex;
use serde_json::{Number, Value};

use crate::compiler::{
    ClauseSet, ColumnRef, CompareOp, Join, JoinKind, Operand, Predicate, SelectExpr, SelectItem,
    TableRef,
};
use crate::query::{AggregateFunction, FieldFunction, SortDirection};

use super::Row;

/// Table alias to the row bound under it; `None` is the null side of a left join
type Env<'t> = Vec<(&'t str, Option<&'t Row>)>;

pub(crate) struct Evaluator<'t> {
    tables: &'t HashMap<String, Vec<Row>>,
    bindings: &'t [Value],
}

impl<'t> Evaluator<'t> {
    pub fn new(tables: &'t HashMap<String, Vec<Row>>, bindings: &'t [Value]) -> Self {
        Self { tables, bindings }
    }

    pub fn execute(&self, clauses: &'t ClauseSet) -> Vec<Row> {
        let envs: Vec<Env<'t>> = self
            .frames(&clauses.from, &clauses.joins, &Vec::new())
            .into_iter()
            .filter(|env| self.test(&clauses.where_clause, env))
            .collect();

        let mut rows: Vec<(Vec<Value>, Row)> = if clauses.is_aggregate() {
            self.groups(clauses, envs)
                .into_iter()
                .map(|group| {
                    let keys = self.order_keys(clauses, group.first());
                    (keys, self.project_group(&clauses.select, &group))
                })
                .collect()
        } else {
            envs.iter()
                .map(|env| {
                    let keys = self.order_keys(clauses, Some(env));
                    (keys, self.project(&clauses.select, env))
                })
                .collect()
        };

        rows.sort_by(|(a, _), (b, _)| {
            for ((x, y), item) in a.iter().zip(b.iter()).zip(&clauses.order) {
                let ordering = sort_order(x, y);
                let ordering = match item.direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        let offset = clauses.offset.unwrap_or(0) as usize;
        let limit = clauses.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        rows.into_iter()
            .skip(offset)
            .take(limit)
            .map(|(_, row)| row)
            .collect()
    }

    fn rows(&self, collection: &str) -> &'t [Row] {
        self.tables
            .get(collection)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn frames(&self, from: &'t TableRef, joins: &'t [Join], outer: &Env<'t>) -> Vec<Env<'t>> {
        let mut envs: Vec<Env<'t>> = self
            .rows(&from.collection)
            .iter()
            .map(|row| {
                let mut env = outer.clone();
                env.push((from.alias.as_str(), Some(row)));
                env
            })
            .collect();

        for join in joins {
            let mut next = Vec::with_capacity(envs.len());
            for env in envs {
                let mut matched = false;
                for row in self.rows(&join.table.collection) {
                    let mut candidate = env.clone();
                    candidate.push((join.table.alias.as_str(), Some(row)));
                    if self.test(&join.on, &candidate) {
                        next.push(candidate);
                        matched = true;
                    }
                }
                if !matched && join.kind == JoinKind::Left {
                    let mut candidate = env;
                    candidate.push((join.table.alias.as_str(), None));
                    next.push(candidate);
                }
            }
            envs = next;
        }

        envs
    }

    fn groups(&self, clauses: &ClauseSet, envs: Vec<Env<'t>>) -> Vec<Vec<Env<'t>>> {
        if clauses.group.is_empty() {
            return vec![envs];
        }
        let mut groups: Vec<(Vec<Value>, Vec<Env<'t>>)> = Vec::new();
        for env in envs {
            let key: Vec<Value> = clauses
                .group
                .iter()
                .map(|operand| self.value(operand, &env))
                .collect();
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(env),
                None => groups.push((key, vec![env])),
            }
        }
        groups.into_iter().map(|(_, members)| members).collect()
    }

    fn order_keys(&self, clauses: &ClauseSet, env: Option<&Env<'t>>) -> Vec<Value> {
        clauses
            .order
            .iter()
            .map(|item| env.map(|e| self.value(&item.operand, e)).unwrap_or(Value::Null))
            .collect()
    }

    fn project(&self, select: &'t [SelectItem], env: &Env<'t>) -> Row {
        let mut row = Row::new();
        for item in select {
            let visible = item.when.as_ref().map_or(true, |guard| self.test(guard, env));
            let value = if visible {
                self.select_value(&item.expr, env)
            } else {
                Value::Null
            };
            row.insert(item.alias.clone(), value);
        }
        row
    }

    fn project_group(&self, select: &'t [SelectItem], group: &[Env<'t>]) -> Row {
        let mut row = Row::new();
        for item in select {
            let value = match &item.expr {
                SelectExpr::Aggregate { function, column } => {
                    let members: Vec<&Env<'t>> = group
                        .iter()
                        .filter(|env| item.when.as_ref().map_or(true, |g| self.test(g, env)))
                        .collect();
                    self.aggregate(*function, column.as_ref(), &members)
                }
                expr => match group.first() {
                    Some(env) => self.select_value(expr, env),
                    None => Value::Null,
                },
            };
            row.insert(item.alias.clone(), value);
        }
        row
    }

    fn select_value(&self, expr: &'t SelectExpr, env: &Env<'t>) -> Value {
        match expr {
            SelectExpr::Column(column) => self.column(column, env),
            SelectExpr::Function { function, column } => {
                apply_function(*function, &self.column(column, env))
            }
            SelectExpr::RelatedCount(subquery) => {
                let count = self
                    .frames(&subquery.from, &subquery.joins, env)
                    .iter()
                    .filter(|inner| self.test(&subquery.where_clause, inner))
                    .count();
                Value::from(count as u64)
            }
            SelectExpr::Aggregate { .. } | SelectExpr::Null => Value::Null,
        }
    }

    fn aggregate(
        &self,
        function: AggregateFunction,
        column: Option<&ColumnRef>,
        members: &[&Env<'t>],
    ) -> Value {
        let Some(column) = column else {
            return Value::from(members.len() as u64);
        };
        let mut values: Vec<Value> = members
            .iter()
            .map(|env| self.column(column, env))
            .filter(|v| !v.is_null())
            .collect();
        if function.is_distinct() {
            let mut seen: Vec<Value> = Vec::with_capacity(values.len());
            values.retain(|v| {
                if seen.iter().any(|s| loose_eq(s, v)) {
                    false
                } else {
                    seen.push(v.clone());
                    true
                }
            });
        }

        match function {
            AggregateFunction::Count
            | AggregateFunction::CountDistinct
            | AggregateFunction::CountAll => Value::from(values.len() as u64),
            AggregateFunction::Sum | AggregateFunction::SumDistinct => {
                if values.is_empty() {
                    return Value::Null;
                }
                if values.iter().all(|v| v.as_i64().is_some()) {
                    Value::from(values.iter().filter_map(Value::as_i64).sum::<i64>())
                } else {
                    float(values.iter().filter_map(as_f64).sum())
                }
            }
            AggregateFunction::Avg | AggregateFunction::AvgDistinct => {
                let numbers: Vec<f64> = values.iter().filter_map(as_f64).collect();
                if numbers.is_empty() {
                    return Value::Null;
                }
                float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
            AggregateFunction::Min => values
                .into_iter()
                .min_by(sort_order)
                .unwrap_or(Value::Null),
            AggregateFunction::Max => values
                .into_iter()
                .max_by(sort_order)
                .unwrap_or(Value::Null),
        }
    }

    fn column(&self, column: &ColumnRef, env: &Env<'t>) -> Value {
        env.iter()
            .rev()
            .find(|(alias, _)| *alias == column.table)
            .and_then(|(_, row)| *row)
            .and_then(|row| row.get(&column.column))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn value(&self, operand: &Operand, env: &Env<'t>) -> Value {
        match operand {
            Operand::Column(column) => self.column(column, env),
            Operand::Param(placeholder) => self
                .bindings
                .get(placeholder.0)
                .cloned()
                .unwrap_or(Value::Null),
            Operand::Function { function, column } => {
                apply_function(*function, &self.column(column, env))
            }
        }
    }

    fn test(&self, predicate: &'t Predicate, env: &Env<'t>) -> bool {
        match predicate {
            Predicate::Const(b) => *b,
            Predicate::And(items) => items.iter().all(|p| self.test(p, env)),
            Predicate::Or(items) => items.iter().any(|p| self.test(p, env)),
            Predicate::Not(inner) => !self.test(inner, env),
            Predicate::Compare { left, op, right } => {
                let ordering = loose_cmp(&self.value(left, env), &self.value(right, env));
                match (ordering, op) {
                    (None, _) => false,
                    (Some(o), CompareOp::Eq) => o == Ordering::Equal,
                    (Some(o), CompareOp::Neq) => o != Ordering::Equal,
                    (Some(o), CompareOp::Lt) => o == Ordering::Less,
                    (Some(o), CompareOp::Lte) => o != Ordering::Greater,
                    (Some(o), CompareOp::Gt) => o == Ordering::Greater,
                    (Some(o), CompareOp::Gte) => o != Ordering::Less,
                }
            }
            Predicate::In {
                operand,
                values,
                negated,
            } => {
                let value = self.value(operand, env);
                if value.is_null() {
                    return false;
                }
                let found = values.iter().any(|p| {
                    self.bindings
                        .get(p.0)
                        .map_or(false, |candidate| loose_eq(&value, candidate))
                });
                found != *negated
            }
            Predicate::Between {
                operand,
                low,
                high,
                negated,
            } => {
                let value = self.value(operand, env);
                let low = self.value(&Operand::Param(*low), env);
                let high = self.value(&Operand::Param(*high), env);
                match (loose_cmp(&value, &low), loose_cmp(&value, &high)) {
                    (Some(lo), Some(hi)) => {
                        let inside = lo != Ordering::Less && hi != Ordering::Greater;
                        inside != *negated
                    }
                    _ => false,
                }
            }
            Predicate::IsNull { operand, negated } => {
                self.value(operand, env).is_null() != *negated
            }
            Predicate::Like {
                operand,
                pattern,
                case_insensitive,
                negated,
            } => {
                let Some(text) = as_text(&self.value(operand, env)) else {
                    return false;
                };
                let Some(pattern) = self.bindings.get(pattern.0).and_then(Value::as_str) else {
                    return false;
                };
                let text = if *case_insensitive {
                    text.to_lowercase()
                } else {
                    text
                };
                like(pattern, &text) != *negated
            }
            Predicate::Exists { subquery, negated } => {
                let found = self
                    .frames(&subquery.from, &subquery.joins, env)
                    .iter()
                    .any(|inner| self.test(&subquery.where_clause, inner));
                found != *negated
            }
        }
    }
}

fn float(n: f64) -> Value {
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Comparison the way a loosely typed store compares: numbers against
/// numeric strings, booleans against 0/1.
fn loose_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Array(_), _) | (Value::Object(_), _) | (_, Value::Array(_)) | (_, Value::Object(_)) => {
            (a == b).then_some(Ordering::Equal)
        }
        _ => as_f64(a)?.partial_cmp(&as_f64(b)?),
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    loose_cmp(a, b) == Some(Ordering::Equal)
}

/// Null sorts first, then booleans, numbers, strings
fn sort_order(a: &Value, b: &Value) -> Ordering {
    let rank = |v: &Value| -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    };
    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => loose_cmp(a, b).unwrap_or(Ordering::Equal),
        other => other,
    }
}

fn like(pattern: &str, text: &str) -> bool {
    let mut source = String::from("(?s)^");
    for c in pattern.chars() {
        match c {
            '%' => source.push_str(".*"),
            '_' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).map_or(false, |re| re.is_match(text))
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn apply_function(function: FieldFunction, value: &Value) -> Value {
    if function == FieldFunction::Count {
        return match value {
            Value::Array(items) => Value::from(items.len() as u64),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Array(items)) => Value::from(items.len() as u64),
                _ if s.is_empty() => Value::from(0u64),
                _ => Value::from(s.split(',').count() as u64),
            },
            _ => Value::Null,
        };
    }

    let Some(raw) = value.as_str() else {
        return Value::Null;
    };
    if let Some(dt) = parse_datetime(raw) {
        let part = match function {
            FieldFunction::Year => dt.year() as i64,
            FieldFunction::Month => dt.month() as i64,
            FieldFunction::Week => dt.iso_week().week() as i64,
            FieldFunction::Day => dt.day() as i64,
            FieldFunction::Weekday => dt.weekday().num_days_from_sunday() as i64,
            FieldFunction::Hour => dt.hour() as i64,
            FieldFunction::Minute => dt.minute() as i64,
            FieldFunction::Second => dt.second() as i64,
            FieldFunction::Count => return Value::Null,
        };
        return Value::from(part);
    }
    match NaiveTime::parse_from_str(raw, "%H:%M:%S") {
        Ok(t) => match function {
            FieldFunction::Hour => Value::from(t.hour() as i64),
            FieldFunction::Minute => Value::from(t.minute() as i64),
            FieldFunction::Second => Value::from(t.second() as i64),
            _ => Value::Null,
        },
        Err(_) => Value::Null,
    }
}
