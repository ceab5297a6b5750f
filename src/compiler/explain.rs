//! Explain output for compiled levels
//!
//! Deterministic, human-readable view of a clause set.

use std::fmt;

use serde_json::Value;

use crate::error::EngineError;

use super::compiler::CompiledLevel;
use super::render::{quote_ident, render, render_predicate};

/// Explain plan output
#[derive(Debug, Clone)]
pub struct ExplainPlan {
    /// Whether compilation succeeded
    pub accepted: bool,
    pub collection: Option<String>,
    /// Rendered statement
    pub sql: Option<String>,
    pub bindings: Vec<Value>,
    /// `path -> alias` for every generated join
    pub joins: Vec<String>,
    /// Rendered where clause
    pub predicate: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Relational branches resolved after this level
    pub branches: Vec<String>,
    pub rejection_reason: Option<String>,
    pub rejection_code: Option<String>,
}

impl ExplainPlan {
    /// Creates an explain plan from a compiled level
    pub fn from_level(level: &CompiledLevel) -> Self {
        let clauses = &level.clauses;
        let (sql, bindings) = render(clauses);
        let (predicate, _) = render_predicate(&clauses.where_clause, &clauses.bindings);

        let joins = clauses
            .joins
            .iter()
            .map(|join| {
                let path = level
                    .aliases
                    .path_for_alias(&join.table.alias)
                    .unwrap_or(&join.table.collection);
                format!(
                    "{} {} AS {} ({})",
                    join.kind.as_sql(),
                    quote_ident(&join.table.collection),
                    quote_ident(&join.table.alias),
                    path
                )
            })
            .collect();

        Self {
            accepted: true,
            collection: Some(clauses.from.collection.clone()),
            sql: Some(sql),
            bindings,
            joins,
            predicate: Some(predicate),
            limit: clauses.limit,
            offset: clauses.offset,
            branches: Vec::new(),
            rejection_reason: None,
            rejection_code: None,
        }
    }

    /// Creates an explain plan from a compilation error
    pub fn from_error(err: &EngineError) -> Self {
        Self {
            accepted: false,
            collection: None,
            sql: None,
            bindings: Vec::new(),
            joins: Vec::new(),
            predicate: None,
            limit: None,
            offset: None,
            branches: Vec::new(),
            rejection_reason: Some(err.to_string()),
            rejection_code: Some(err.code().code().to_string()),
        }
    }

    pub fn with_branches(mut self, branches: Vec<String>) -> Self {
        self.branches = branches;
        self
    }
}

impl fmt::Display for ExplainPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== EXPLAIN PLAN ===")?;

        if self.accepted {
            writeln!(f, "Status: ACCEPTED")?;
            if let Some(collection) = &self.collection {
                writeln!(f, "Collection: {}", collection)?;
            }
            if let Some(sql) = &self.sql {
                writeln!(f, "SQL: {}", sql)?;
            }
            if !self.bindings.is_empty() {
                writeln!(f, "Bindings:")?;
                for (i, value) in self.bindings.iter().enumerate() {
                    writeln!(f, "  {}: {}", i + 1, value)?;
                }
            }
            if !self.joins.is_empty() {
                writeln!(f, "Joins:")?;
                for join in &self.joins {
                    writeln!(f, "  - {}", join)?;
                }
            }
            if let Some(predicate) = &self.predicate {
                writeln!(f, "Where: {}", predicate)?;
            }
            if let Some(limit) = self.limit {
                writeln!(f, "Limit: {}", limit)?;
            }
            if let Some(offset) = self.offset {
                writeln!(f, "Offset: {}", offset)?;
            }
            if !self.branches.is_empty() {
                writeln!(f, "Branches:")?;
                for branch in &self.branches {
                    writeln!(f, "  - {}", branch)?;
                }
            }
        } else {
            writeln!(f, "Status: REJECTED")?;
            if let Some(code) = &self.rejection_code {
                writeln!(f, "Error Code: {}", code)?;
            }
            if let Some(reason) = &self.rejection_reason {
                writeln!(f, "Reason: {}", reason)?;
            }
        }

        Ok(())
    }
}
