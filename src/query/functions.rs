//! Field functions (`year(date_created)`, `count(comments)`, ...)

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{EngineError, EngineResult};
use crate::schema::FieldType;

/// Functions applicable to a single field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldFunction {
    Year,
    Month,
    Week,
    Day,
    Weekday,
    Hour,
    Minute,
    Second,
    Count,
}

impl FieldFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldFunction::Year => "year",
            FieldFunction::Month => "month",
            FieldFunction::Week => "week",
            FieldFunction::Day => "day",
            FieldFunction::Weekday => "weekday",
            FieldFunction::Hour => "hour",
            FieldFunction::Minute => "minute",
            FieldFunction::Second => "second",
            FieldFunction::Count => "count",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "year" => FieldFunction::Year,
            "month" => FieldFunction::Month,
            "week" => FieldFunction::Week,
            "day" => FieldFunction::Day,
            "weekday" => FieldFunction::Weekday,
            "hour" => FieldFunction::Hour,
            "minute" => FieldFunction::Minute,
            "second" => FieldFunction::Second,
            "count" => FieldFunction::Count,
            _ => return None,
        })
    }

    /// Whether the function is defined on a column of this type.
    ///
    /// `count` on alias fields (relational counts) is checked by the caller.
    pub fn supports(&self, field_type: FieldType) -> bool {
        match self {
            FieldFunction::Year
            | FieldFunction::Month
            | FieldFunction::Week
            | FieldFunction::Day
            | FieldFunction::Weekday => field_type.has_date_part(),
            FieldFunction::Hour | FieldFunction::Minute | FieldFunction::Second => {
                field_type.has_time_part()
            }
            FieldFunction::Count => matches!(field_type, FieldType::Json | FieldType::Csv),
        }
    }

    /// Output key for `fn(field)`
    pub fn output_key(&self, field: &str) -> String {
        format!("{}_{}", field, self.as_str())
    }
}

fn function_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\(([^()]*)\)$").expect("static pattern compiles")
    })
}

/// Field reference with an optional function applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub field: String,
    pub function: Option<FieldFunction>,
}

impl FieldRef {
    /// Parses `field` or `fn(field)`.
    pub fn parse(raw: &str) -> EngineResult<Self> {
        if !raw.contains('(') && !raw.contains(')') {
            return Ok(Self {
                field: raw.to_string(),
                function: None,
            });
        }

        let caps = function_pattern().captures(raw).ok_or_else(|| {
            EngineError::invalid_query(format!("malformed function field \"{}\"", raw))
        })?;

        let name = &caps[1];
        let field = caps[2].trim();
        if field.is_empty() {
            return Err(EngineError::invalid_query(format!(
                "function \"{}\" needs a field argument",
                name
            )));
        }

        let function = FieldFunction::from_name(name)
            .ok_or_else(|| EngineError::unsupported_function(name, field, "unknown"))?;

        Ok(Self {
            field: field.to_string(),
            function: Some(function),
        })
    }

    /// Output key of the reference
    pub fn output_key(&self) -> String {
        match self.function {
            Some(function) => function.output_key(&self.field),
            None => self.field.clone(),
        }
    }
}
