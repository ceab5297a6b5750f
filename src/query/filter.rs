//! Filter trees
//!
//! Parsed from the JSON filter syntax:
//!
//! ```json
//! {"_and": [{"status": {"_eq": "published"}}, {"author": {"name": {"_icontains": "ann"}}}]}
//! ```
//!
//! Keys starting with `_` are logical connectives or operators; every other
//! key names a field. A field whose value holds further field keys is a
//! relational filter on the related collection.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOperator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    Nin,
    Null,
    Nnull,
    Contains,
    Ncontains,
    Icontains,
    Nicontains,
    StartsWith,
    NstartsWith,
    IstartsWith,
    NistartsWith,
    EndsWith,
    NendsWith,
    IendsWith,
    NiendsWith,
    Between,
    Nbetween,
    Empty,
    Nempty,
}

impl FilterOperator {
    const ALL: [FilterOperator; 26] = [
        FilterOperator::Eq,
        FilterOperator::Neq,
        FilterOperator::Lt,
        FilterOperator::Lte,
        FilterOperator::Gt,
        FilterOperator::Gte,
        FilterOperator::In,
        FilterOperator::Nin,
        FilterOperator::Null,
        FilterOperator::Nnull,
        FilterOperator::Contains,
        FilterOperator::Ncontains,
        FilterOperator::Icontains,
        FilterOperator::Nicontains,
        FilterOperator::StartsWith,
        FilterOperator::NstartsWith,
        FilterOperator::IstartsWith,
        FilterOperator::NistartsWith,
        FilterOperator::EndsWith,
        FilterOperator::NendsWith,
        FilterOperator::IendsWith,
        FilterOperator::NiendsWith,
        FilterOperator::Between,
        FilterOperator::Nbetween,
        FilterOperator::Empty,
        FilterOperator::Nempty,
    ];

    /// Get the operator key as written in filters
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "_eq",
            FilterOperator::Neq => "_neq",
            FilterOperator::Lt => "_lt",
            FilterOperator::Lte => "_lte",
            FilterOperator::Gt => "_gt",
            FilterOperator::Gte => "_gte",
            FilterOperator::In => "_in",
            FilterOperator::Nin => "_nin",
            FilterOperator::Null => "_null",
            FilterOperator::Nnull => "_nnull",
            FilterOperator::Contains => "_contains",
            FilterOperator::Ncontains => "_ncontains",
            FilterOperator::Icontains => "_icontains",
            FilterOperator::Nicontains => "_nicontains",
            FilterOperator::StartsWith => "_starts_with",
            FilterOperator::NstartsWith => "_nstarts_with",
            FilterOperator::IstartsWith => "_istarts_with",
            FilterOperator::NistartsWith => "_nistarts_with",
            FilterOperator::EndsWith => "_ends_with",
            FilterOperator::NendsWith => "_nends_with",
            FilterOperator::IendsWith => "_iends_with",
            FilterOperator::NiendsWith => "_niends_with",
            FilterOperator::Between => "_between",
            FilterOperator::Nbetween => "_nbetween",
            FilterOperator::Empty => "_empty",
            FilterOperator::Nempty => "_nempty",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| op.as_str() == key)
    }

    /// Substring/prefix/suffix operators
    pub fn is_string_op(&self) -> bool {
        matches!(
            self,
            FilterOperator::Contains
                | FilterOperator::Ncontains
                | FilterOperator::Icontains
                | FilterOperator::Nicontains
                | FilterOperator::StartsWith
                | FilterOperator::NstartsWith
                | FilterOperator::IstartsWith
                | FilterOperator::NistartsWith
                | FilterOperator::EndsWith
                | FilterOperator::NendsWith
                | FilterOperator::IendsWith
                | FilterOperator::NiendsWith
        )
    }

    pub fn is_range_op(&self) -> bool {
        matches!(
            self,
            FilterOperator::Lt
                | FilterOperator::Lte
                | FilterOperator::Gt
                | FilterOperator::Gte
                | FilterOperator::Between
                | FilterOperator::Nbetween
        )
    }
}

/// How a relational filter quantifies over the related rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    /// Nested field filter without `_some`/`_none`
    Implicit,
    Some,
    None,
}

/// Filter tree
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    /// `field` may carry a function, e.g. `year(date_created)`
    Condition {
        field: String,
        operator: FilterOperator,
        value: Value,
    },
    Relation {
        field: String,
        quantifier: Quantifier,
        filter: Box<Filter>,
    },
}

impl Filter {
    /// A filter that matches every row
    pub fn empty() -> Self {
        Filter::And(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Filter::And(items) => items.iter().all(Filter::is_empty),
            _ => false,
        }
    }

    pub fn condition(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Filter::Condition {
            field: field.into(),
            operator,
            value,
        }
    }

    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::condition(field, FilterOperator::Eq, value)
    }

    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::condition(field, FilterOperator::In, Value::Array(values))
    }

    /// AND-combines, dropping empty operands
    pub fn and(filters: Vec<Filter>) -> Self {
        let mut parts: Vec<Filter> = filters.into_iter().filter(|f| !f.is_empty()).collect();
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Filter::And(parts)
        }
    }

    /// Parses the JSON filter syntax
    pub fn from_value(value: &Value) -> EngineResult<Self> {
        match value {
            Value::Null => Ok(Filter::empty()),
            Value::Object(map) => parse_object(map),
            other => Err(EngineError::invalid_query(format!(
                "filter must be an object, got {}",
                other
            ))),
        }
    }

    /// Rewrites every comparison value
    pub fn map_values<F>(&self, f: &F) -> Filter
    where
        F: Fn(&Value) -> Value,
    {
        match self {
            Filter::And(items) => Filter::And(items.iter().map(|i| i.map_values(f)).collect()),
            Filter::Or(items) => Filter::Or(items.iter().map(|i| i.map_values(f)).collect()),
            Filter::Condition {
                field,
                operator,
                value,
            } => Filter::Condition {
                field: field.clone(),
                operator: *operator,
                value: map_value(value, f),
            },
            Filter::Relation {
                field,
                quantifier,
                filter,
            } => Filter::Relation {
                field: field.clone(),
                quantifier: *quantifier,
                filter: Box::new(filter.map_values(f)),
            },
        }
    }

    /// Top-level field names this filter touches
    pub fn fields(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Filter::And(items) | Filter::Or(items) => {
                items.iter().for_each(|i| i.collect_fields(out))
            }
            Filter::Condition { field, .. } | Filter::Relation { field, .. } => {
                if !out.contains(&field.as_str()) {
                    out.push(field.as_str())
                }
            }
        }
    }
}

impl TryFrom<Value> for Filter {
    type Error = EngineError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Filter::from_value(&value)
    }
}

fn map_value<F>(value: &Value, f: &F) -> Value
where
    F: Fn(&Value) -> Value,
{
    match value {
        Value::Array(items) => Value::Array(items.iter().map(|v| map_value(v, f)).collect()),
        other => f(other),
    }
}

fn parse_object(map: &Map<String, Value>) -> EngineResult<Filter> {
    let mut parts = Vec::new();

    for (key, value) in map {
        match key.as_str() {
            "_and" | "_or" => {
                let items = value.as_array().ok_or_else(|| {
                    EngineError::invalid_query(format!("\"{}\" expects an array", key))
                })?;
                let children = items
                    .iter()
                    .map(Filter::from_value)
                    .collect::<EngineResult<Vec<_>>>()?;
                parts.push(if key == "_and" {
                    Filter::And(children)
                } else {
                    Filter::Or(children)
                });
            }
            k if k.starts_with('_') => {
                return Err(EngineError::invalid_query(format!(
                    "operator \"{}\" used without a field",
                    k
                )))
            }
            field => parts.push(parse_field(field, value)?),
        }
    }

    Ok(collapse(parts))
}

fn parse_field(field: &str, value: &Value) -> EngineResult<Filter> {
    let map = value.as_object().ok_or_else(|| {
        EngineError::invalid_query(format!(
            "filter for field \"{}\" must be an object",
            field
        ))
    })?;

    let mut parts = Vec::new();
    let mut nested = Map::new();

    for (key, inner) in map {
        if key == "_some" || key == "_none" {
            let quantifier = if key == "_some" {
                Quantifier::Some
            } else {
                Quantifier::None
            };
            parts.push(Filter::Relation {
                field: field.to_string(),
                quantifier,
                filter: Box::new(Filter::from_value(inner)?),
            });
        } else if let Some(operator) = FilterOperator::from_key(key) {
            parts.push(Filter::Condition {
                field: field.to_string(),
                operator,
                value: inner.clone(),
            });
        } else if key == "_and" || key == "_or" || !key.starts_with('_') {
            nested.insert(key.clone(), inner.clone());
        } else {
            return Err(EngineError::invalid_query(format!(
                "unknown filter operator \"{}\"",
                key
            )));
        }
    }

    if !nested.is_empty() {
        parts.push(Filter::Relation {
            field: field.to_string(),
            quantifier: Quantifier::Implicit,
            filter: Box::new(parse_object(&nested)?),
        });
    }

    Ok(collapse(parts))
}

fn collapse(mut parts: Vec<Filter>) -> Filter {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        Filter::And(parts)
    }
}
