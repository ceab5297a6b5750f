//! Permission resolution
//!
//! Turns the effective rule list into a per-collection outcome:
//! admins are unrestricted, a collection without any matching rule is
//! denied outright, and several matching rules union their fields and
//! OR-combine their row predicates.

use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::Value;

use crate::query::Filter;

use super::rules::{Accountability, Action, FieldAccess, PermissionRule};

/// Access granted by one matching rule
#[derive(Debug, Clone, PartialEq)]
pub struct RuleAccess {
    /// Row predicate with dynamic variables substituted; `None` is every row
    pub filter: Option<Filter>,
    pub fields: FieldAccess,
}

/// Result of resolving one collection and action
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionOutcome {
    /// Admin accountability: all fields, no predicate
    Unrestricted,
    /// At least one rule applies
    Permitted(Vec<RuleAccess>),
    /// No rule applies; every row is excluded
    DeniedAll,
}

impl PermissionOutcome {
    pub fn is_denied(&self) -> bool {
        matches!(self, PermissionOutcome::DeniedAll)
    }

    /// Whether any rule exposes `field`
    pub fn allows_field(&self, field: &str) -> bool {
        match self {
            PermissionOutcome::Unrestricted => true,
            PermissionOutcome::DeniedAll => false,
            PermissionOutcome::Permitted(rules) => rules.iter().any(|r| r.fields.contains(field)),
        }
    }

    /// Row predicates of the matching rules, in rule order
    pub fn cases(&self) -> Vec<Filter> {
        match self {
            PermissionOutcome::Permitted(rules) => rules
                .iter()
                .map(|r| r.filter.clone().unwrap_or_else(Filter::empty))
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Indices into [`cases`](Self::cases) under which `field` is readable.
    ///
    /// `None` means the field is readable on every visible row. An empty
    /// list means it is readable on none and is returned as `null`.
    pub fn when_case(&self, field: &str) -> Option<Vec<usize>> {
        match self {
            PermissionOutcome::Unrestricted => None,
            PermissionOutcome::DeniedAll => Some(Vec::new()),
            PermissionOutcome::Permitted(rules) => {
                let indices: Vec<usize> = rules
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.fields.contains(field))
                    .map(|(i, _)| i)
                    .collect();

                let all_rows_visible_through_granting_rule = indices.len() == rules.len()
                    || indices.iter().any(|&i| rules[i].filter.is_none());

                if all_rows_visible_through_granting_rule {
                    None
                } else {
                    Some(indices)
                }
            }
        }
    }
}

/// Resolves permission outcomes for one accountability
pub struct PermissionResolver<'a> {
    accountability: &'a Accountability,
    rules: &'a [PermissionRule],
    now: DateTime<Utc>,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(accountability: &'a Accountability, rules: &'a [PermissionRule]) -> Self {
        Self {
            accountability,
            rules,
            now: Utc::now(),
        }
    }

    /// Pins `$NOW` for deterministic resolution
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn resolve(&self, collection: &str, action: Action) -> PermissionOutcome {
        if self.accountability.admin {
            return PermissionOutcome::Unrestricted;
        }

        let matching: Vec<RuleAccess> = self
            .rules
            .iter()
            .filter(|r| r.applies_to(collection, action))
            .map(|r| RuleAccess {
                filter: r
                    .permissions
                    .as_ref()
                    .filter(|f| !f.is_empty())
                    .map(|f| f.map_values(&|v| self.substitute(v))),
                fields: r.fields.clone(),
            })
            .collect();

        if matching.is_empty() {
            PermissionOutcome::DeniedAll
        } else {
            PermissionOutcome::Permitted(matching)
        }
    }

    /// Replaces `$CURRENT_USER`, `$CURRENT_ROLE`, `$CURRENT_ROLES` and `$NOW`
    fn substitute(&self, value: &Value) -> Value {
        let Value::String(s) = value else {
            return value.clone();
        };

        match s.as_str() {
            "$CURRENT_USER" => opt_string(&self.accountability.user),
            "$CURRENT_ROLE" => opt_string(&self.accountability.role),
            "$CURRENT_ROLES" => Value::Array(
                self.accountability
                    .roles
                    .iter()
                    .cloned()
                    .map(Value::String)
                    .collect(),
            ),
            "$NOW" => Value::String(self.now.to_rfc3339()),
            other => match adjusted_now(other, self.now) {
                Some(at) => Value::String(at.to_rfc3339()),
                None => value.clone(),
            },
        }
    }
}

fn opt_string(value: &Option<String>) -> Value {
    value.clone().map(Value::String).unwrap_or(Value::Null)
}

fn now_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\$NOW\(\s*([+-]?\d+)\s*(second|minute|hour|day|week)s?\s*\)$")
            .expect("static pattern compiles")
    })
}

/// `$NOW(-1 day)`, `$NOW(+3 hours)`
fn adjusted_now(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = now_pattern().captures(raw)?;
    let amount: i64 = caps[1].parse().ok()?;
    // Out-of-range offsets leave the value untouched
    let delta = match &caps[2] {
        "second" => Duration::try_seconds(amount),
        "minute" => Duration::try_minutes(amount),
        "hour" => Duration::try_hours(amount),
        "day" => Duration::try_days(amount),
        "week" => Duration::try_weeks(amount),
        _ => None,
    }?;
    now.checked_add_signed(delta)
}
