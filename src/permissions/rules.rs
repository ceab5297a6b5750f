//! Accountability and permission rules

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineError;
use crate::query::Filter;

/// Resolved identity of the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accountability {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    /// Admins bypass every permission rule
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub app: bool,
}

impl Accountability {
    pub fn admin() -> Self {
        Self {
            admin: true,
            app: true,
            ..Self::default()
        }
    }

    pub fn user(user: impl Into<String>, role: impl Into<String>) -> Self {
        let role = role.into();
        Self {
            user: Some(user.into()),
            role: Some(role.clone()),
            roles: vec![role],
            admin: false,
            app: false,
        }
    }

    /// Unauthenticated caller
    pub fn public() -> Self {
        Self::default()
    }
}

/// Action a rule grants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
    Share,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Read => "read",
            Action::Update => "update",
            Action::Delete => "delete",
            Action::Share => "share",
        }
    }
}

/// Fields a rule grants
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Value")]
pub enum FieldAccess {
    All,
    List(BTreeSet<String>),
}

impl FieldAccess {
    pub fn list(fields: &[&str]) -> Self {
        if fields.contains(&"*") {
            return FieldAccess::All;
        }
        FieldAccess::List(fields.iter().map(|f| f.to_string()).collect())
    }

    pub fn contains(&self, field: &str) -> bool {
        match self {
            FieldAccess::All => true,
            FieldAccess::List(fields) => fields.contains(field),
        }
    }
}

impl Default for FieldAccess {
    fn default() -> Self {
        FieldAccess::List(BTreeSet::new())
    }
}

impl TryFrom<Value> for FieldAccess {
    type Error = EngineError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let names: Vec<String> = match value {
            Value::Null => Vec::new(),
            Value::String(s) => s.split(',').map(|p| p.trim().to_string()).collect(),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s),
                    other => Err(EngineError::invalid_config(format!(
                        "permission fields must be strings, got {}",
                        other
                    ))),
                })
                .collect::<Result<_, _>>()?,
            other => {
                return Err(EngineError::invalid_config(format!(
                    "permission fields must be \"*\" or a list, got {}",
                    other
                )))
            }
        };

        if names.iter().any(|n| n == "*") {
            Ok(FieldAccess::All)
        } else {
            Ok(FieldAccess::List(
                names.into_iter().filter(|n| !n.is_empty()).collect(),
            ))
        }
    }
}

/// One effective permission rule for the current accountability
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PermissionRule {
    pub collection: String,
    pub action: Action,
    /// Row predicate; `None` grants every row
    #[serde(default)]
    pub permissions: Option<Filter>,
    #[serde(default)]
    pub fields: FieldAccess,
    /// Write-side validation; carried for completeness, unused by reads
    #[serde(default)]
    pub validation: Option<Filter>,
}

impl PermissionRule {
    /// Read rule over all rows and fields
    pub fn read_all(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            action: Action::Read,
            permissions: None,
            fields: FieldAccess::All,
            validation: None,
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.permissions = Some(filter);
        self
    }

    pub fn with_fields(mut self, fields: &[&str]) -> Self {
        self.fields = FieldAccess::list(fields);
        self
    }

    pub fn applies_to(&self, collection: &str, action: Action) -> bool {
        self.collection == collection && self.action == action
    }
}
