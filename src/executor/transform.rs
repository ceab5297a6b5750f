//! Read transforms applied to decoded rows
//!
//! Row stores hand back whatever their driver decodes: booleans as 0/1,
//! json as text, csv as one string. Values are normalized here by the
//! declared field type before any merging happens.

use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Number, Value};

use crate::compiler::{key_alias, AliasMap, Selection};
use crate::schema::{FieldOverview, FieldType, SchemaOverview};
use crate::store::Row;

/// Replacement for concealed and hashed values
pub const MASK: &str = "**********";

/// Moves multi-segment outputs (`sum->price`) under their path
pub fn nest_outputs(mut row: Row, aliases: &AliasMap) -> Row {
    for (alias, path) in aliases.outputs() {
        if path.len() < 2 {
            continue;
        }
        let Some(value) = row.remove(alias) else {
            continue;
        };
        insert_path(&mut row, path, value);
    }
    row
}

fn insert_path(row: &mut Row, path: &[String], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut target = row;
    for segment in parents {
        let entry = target
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        target = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    target.insert(last.clone(), value);
}

/// Coerces every selected column of `rows` in place
pub fn coerce_rows(
    schema: &SchemaOverview,
    collection: &str,
    selections: &[Selection],
    rows: &mut [Row],
) {
    let columns: Vec<(String, &FieldOverview)> = selections
        .iter()
        .filter_map(|selection| match selection {
            Selection::Field {
                field,
                function: None,
                alias,
                ..
            } => Some((alias.clone(), field.as_str())),
            Selection::Helper { field, .. } => Some((key_alias(field), field.as_str())),
            Selection::Field { .. } => None,
        })
        .filter_map(|(alias, field)| {
            schema
                .field(collection, field)
                .ok()
                .filter(|overview| !overview.is_alias())
                .map(|overview| (alias, overview))
        })
        .collect();

    if columns.is_empty() {
        return;
    }

    for row in rows.iter_mut() {
        for (alias, overview) in &columns {
            if let Some(value) = row.get_mut(alias.as_str()) {
                let raw = std::mem::take(value);
                *value = coerce_value(overview, raw);
            }
        }
    }
}

/// Normalizes one decoded value by its field's type and flags
pub fn coerce_value(field: &FieldOverview, value: Value) -> Value {
    if value.is_null() {
        return value;
    }

    if field.has_special("conceal") || field.has_special("hash") || field.field_type == FieldType::Hash
    {
        return Value::String(MASK.to_string());
    }

    if field.field_type == FieldType::Boolean || field.has_special("cast-boolean") {
        return to_bool(value);
    }

    if field.field_type == FieldType::Json || field.has_special("cast-json") {
        return match value {
            Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
            other => other,
        };
    }

    if field.field_type == FieldType::Csv || field.has_special("cast-csv") {
        return match value {
            Value::String(text) if text.is_empty() => Value::Array(Vec::new()),
            Value::String(text) => Value::Array(
                text.split(',')
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ),
            other => other,
        };
    }

    match (field.field_type, value) {
        (t, Value::String(text)) if t.is_integer() => text
            .trim()
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or(Value::String(text)),
        (FieldType::Float | FieldType::Decimal, Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::String(text)),
        (FieldType::DateTime, Value::String(text)) => Value::String(normalize_datetime(text)),
        (FieldType::Timestamp, Value::String(text)) => Value::String(normalize_timestamp(text)),
        (_, other) => other,
    }
}

fn to_bool(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::Bool(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Value::Bool(true),
            "false" | "0" | "" => Value::Bool(false),
            _ => Value::String(text),
        },
        other => other,
    }
}

/// `2024-01-02 03:04:05` becomes `2024-01-02T03:04:05`
fn normalize_datetime(text: String) -> String {
    match NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S") {
        Ok(parsed) => parsed.format("%Y-%m-%dT%H:%M:%S").to_string(),
        Err(_) => text,
    }
}

/// Timestamps come back as RFC 3339 in UTC
fn normalize_timestamp(text: String) -> String {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&text) {
        return parsed
            .with_timezone(&chrono::Utc)
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    }
    match NaiveDateTime::parse_from_str(&text, "%Y-%m-%d %H:%M:%S") {
        Ok(parsed) => parsed
            .and_utc()
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        Err(_) => text,
    }
}
