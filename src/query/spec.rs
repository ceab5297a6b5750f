//! Per-level query specification
//!
//! One `QuerySpec` describes what to fetch from a single collection. Nested
//! levels get their own spec through `deep`, keyed by relation alias (or
//! `field:collection` for any-to-one branches).

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{EngineError, EngineResult};

use super::filter::Filter;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Sort specification; `field` may be a dotted many-to-one path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }

    /// Parses `field` / `-field`
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('-') {
            Some(field) => Self::desc(field),
            None => Self::asc(raw),
        }
    }
}

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggregateFunction {
    Count,
    CountDistinct,
    CountAll,
    Sum,
    SumDistinct,
    Avg,
    AvgDistinct,
    Min,
    Max,
}

impl AggregateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::CountDistinct => "countDistinct",
            AggregateFunction::CountAll => "countAll",
            AggregateFunction::Sum => "sum",
            AggregateFunction::SumDistinct => "sumDistinct",
            AggregateFunction::Avg => "avg",
            AggregateFunction::AvgDistinct => "avgDistinct",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "count" => AggregateFunction::Count,
            "countDistinct" => AggregateFunction::CountDistinct,
            "countAll" => AggregateFunction::CountAll,
            "sum" => AggregateFunction::Sum,
            "sumDistinct" => AggregateFunction::SumDistinct,
            "avg" => AggregateFunction::Avg,
            "avgDistinct" => AggregateFunction::AvgDistinct,
            "min" => AggregateFunction::Min,
            "max" => AggregateFunction::Max,
            _ => return None,
        })
    }

    /// Functions that only make sense on numeric columns
    pub fn requires_numeric(&self) -> bool {
        matches!(
            self,
            AggregateFunction::Sum
                | AggregateFunction::SumDistinct
                | AggregateFunction::Avg
                | AggregateFunction::AvgDistinct
        )
    }

    pub fn is_distinct(&self) -> bool {
        matches!(
            self,
            AggregateFunction::CountDistinct
                | AggregateFunction::SumDistinct
                | AggregateFunction::AvgDistinct
        )
    }
}

/// One aggregate function over a list of fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSpec {
    pub function: AggregateFunction,
    pub fields: Vec<String>,
}

/// Declarative per-level query
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "Value")]
pub struct QuerySpec {
    pub fields: Option<Vec<String>>,
    pub filter: Option<Filter>,
    pub sort: Option<Vec<SortSpec>>,
    /// `-1` is unbounded
    pub limit: Option<i64>,
    pub offset: Option<u64>,
    /// 1-based; authoritative over `offset` when a limit is set
    pub page: Option<u64>,
    pub search: Option<String>,
    pub aggregate: Vec<AggregateSpec>,
    pub group: Option<Vec<String>>,
    pub deep: BTreeMap<String, QuerySpec>,
    /// Output key -> field
    pub alias: BTreeMap<String, String>,
}

impl QuerySpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(sort);
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn with_aggregate(mut self, function: AggregateFunction, fields: &[&str]) -> Self {
        self.aggregate.push(AggregateSpec {
            function,
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    pub fn with_group(mut self, group: &[&str]) -> Self {
        self.group = Some(group.iter().map(|g| g.to_string()).collect());
        self
    }

    pub fn with_deep(mut self, key: impl Into<String>, spec: QuerySpec) -> Self {
        self.deep.insert(key.into(), spec);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>, field: impl Into<String>) -> Self {
        self.alias.insert(alias.into(), field.into());
        self
    }

    /// Whether rows are aggregated rather than fetched one by one
    pub fn is_aggregate(&self) -> bool {
        !self.aggregate.is_empty() || self.group.is_some()
    }

    /// Row limit after applying the default; `None` is unbounded
    pub fn effective_limit(&self, default_limit: i64) -> Option<u64> {
        let limit = self.limit.unwrap_or(default_limit);
        if limit < 0 {
            None
        } else {
            Some(limit as u64)
        }
    }

    /// Row offset; `page` wins over `offset` when both are present
    pub fn effective_offset(&self, default_limit: i64) -> Option<u64> {
        if let Some(page) = self.page {
            if let Some(limit) = self.effective_limit(default_limit) {
                return Some(page.saturating_sub(1).saturating_mul(limit)).filter(|o| *o > 0);
            }
        }
        self.offset.filter(|o| *o > 0)
    }

    /// Parses a top-level query object
    pub fn from_value(value: &Value) -> EngineResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| EngineError::invalid_query("query must be an object"))?;
        parse_query(map, false)
    }

    /// Parses a `deep` entry where parameters carry a `_` prefix
    pub fn from_deep_value(value: &Value) -> EngineResult<Self> {
        let map = value
            .as_object()
            .ok_or_else(|| EngineError::invalid_query("deep entry must be an object"))?;
        parse_query(map, true)
    }
}

impl TryFrom<Value> for QuerySpec {
    type Error = EngineError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        QuerySpec::from_value(&value)
    }
}

fn parse_query(map: &Map<String, Value>, deep_style: bool) -> EngineResult<QuerySpec> {
    let mut spec = QuerySpec::default();

    for (raw_key, value) in map {
        let key = if deep_style {
            match raw_key.strip_prefix('_') {
                Some(param) => param,
                None => {
                    spec.deep
                        .insert(raw_key.clone(), QuerySpec::from_deep_value(value)?);
                    continue;
                }
            }
        } else {
            raw_key.as_str()
        };

        match key {
            "fields" => spec.fields = Some(string_list(key, value)?),
            "filter" => spec.filter = Some(Filter::from_value(value)?),
            "sort" => {
                spec.sort = Some(
                    string_list(key, value)?
                        .iter()
                        .map(|s| SortSpec::parse(s))
                        .collect(),
                )
            }
            "limit" => {
                let limit = int_param(key, value)?;
                if limit < -1 {
                    return Err(EngineError::invalid_query("limit must be -1 or greater"));
                }
                spec.limit = Some(limit);
            }
            "offset" => spec.offset = Some(uint_param(key, value)?),
            "page" => {
                let page = uint_param(key, value)?;
                if page == 0 {
                    return Err(EngineError::invalid_query("page is 1-based"));
                }
                spec.page = Some(page);
            }
            "search" => match value {
                Value::Null => {}
                Value::String(s) => spec.search = Some(s.clone()),
                Value::Number(n) => spec.search = Some(n.to_string()),
                _ => return Err(EngineError::invalid_query("search must be a string")),
            },
            "aggregate" => spec.aggregate = parse_aggregate(value)?,
            "group" | "groupBy" => spec.group = Some(string_list(key, value)?),
            "deep" if !deep_style => {
                let entries = value
                    .as_object()
                    .ok_or_else(|| EngineError::invalid_query("deep must be an object"))?;
                for (relation, nested) in entries {
                    spec.deep
                        .insert(relation.clone(), QuerySpec::from_deep_value(nested)?);
                }
            }
            "alias" => {
                let entries = value
                    .as_object()
                    .ok_or_else(|| EngineError::invalid_query("alias must be an object"))?;
                for (alias, field) in entries {
                    let field = field.as_str().ok_or_else(|| {
                        EngineError::invalid_query(format!(
                            "alias \"{}\" must point to a field name",
                            alias
                        ))
                    })?;
                    if alias.contains('.') || field.contains('.') {
                        return Err(EngineError::invalid_query(format!(
                            "alias \"{}\" cannot contain a relational path",
                            alias
                        )));
                    }
                    spec.alias.insert(alias.clone(), field.to_string());
                }
            }
            other => {
                return Err(EngineError::invalid_query(format!(
                    "unknown query parameter \"{}\"",
                    other
                )))
            }
        }
    }

    Ok(spec)
}

fn string_list(key: &str, value: &Value) -> EngineResult<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    match value {
        Value::String(s) => {
            for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                out.push(part.to_string());
            }
        }
        Value::Array(items) => {
            for item in items {
                let s = item.as_str().ok_or_else(|| {
                    EngineError::invalid_query(format!("\"{}\" expects a list of strings", key))
                })?;
                out.push(s.trim().to_string());
            }
        }
        _ => {
            return Err(EngineError::invalid_query(format!(
                "\"{}\" expects a string or a list of strings",
                key
            )))
        }
    }
    let mut seen = Vec::with_capacity(out.len());
    for item in out {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    Ok(seen)
}

fn int_param(key: &str, value: &Value) -> EngineResult<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| EngineError::invalid_query(format!("\"{}\" must be an integer", key)))
}

fn uint_param(key: &str, value: &Value) -> EngineResult<u64> {
    let n = int_param(key, value)?;
    u64::try_from(n)
        .map_err(|_| EngineError::invalid_query(format!("\"{}\" must not be negative", key)))
}

fn parse_aggregate(value: &Value) -> EngineResult<Vec<AggregateSpec>> {
    let map = value
        .as_object()
        .ok_or_else(|| EngineError::invalid_query("aggregate must be an object"))?;

    map.iter()
        .map(|(name, fields)| {
            let function = AggregateFunction::from_name(name).ok_or_else(|| {
                EngineError::invalid_query(format!("unknown aggregate function \"{}\"", name))
            })?;
            Ok(AggregateSpec {
                function,
                fields: string_list(name, fields)?,
            })
        })
        .collect()
}
