//! Engine tunables
//!
//! Loaded from a JSON file or from environment variables. Missing keys fall
//! back to defaults; invalid values are rejected by `validate`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::observability::Event;

/// Default number of parent keys per relational batch
pub const DEFAULT_RELATIONAL_BATCH_SIZE: usize = 25;

/// Default row limit applied when a query gives none
pub const DEFAULT_QUERY_LIMIT: i64 = 100;

pub const ENV_RELATIONAL_BATCH_SIZE: &str = "RELATIONAL_BATCH_SIZE";
pub const ENV_SEARCH_MAX_DEPTH: &str = "RELATIONAL_SEARCH_MAX_DEPTH";
pub const ENV_QUERY_LIMIT_DEFAULT: &str = "QUERY_LIMIT_DEFAULT";

fn default_batch_size() -> usize {
    DEFAULT_RELATIONAL_BATCH_SIZE
}

fn default_limit() -> i64 {
    DEFAULT_QUERY_LIMIT
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Parent keys per `IN` set before a branch query is split
    #[serde(default = "default_batch_size")]
    pub relational_batch_size: usize,

    /// Relational search depth; `None` is unbounded (cycles still stop it)
    #[serde(default)]
    pub search_max_depth: Option<u32>,

    /// Limit applied when a query does not set one; `-1` disables it
    #[serde(default = "default_limit")]
    pub default_limit: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            relational_batch_size: DEFAULT_RELATIONAL_BATCH_SIZE,
            search_max_depth: None,
            default_limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Read tunables from the process environment
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read tunables through an arbitrary lookup
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_RELATIONAL_BATCH_SIZE) {
            config.relational_batch_size = raw.trim().parse().map_err(|_| {
                EngineError::invalid_config(format!(
                    "{} must be a positive integer, got \"{}\"",
                    ENV_RELATIONAL_BATCH_SIZE, raw
                ))
            })?;
        }

        if let Some(raw) = lookup(ENV_SEARCH_MAX_DEPTH) {
            config.search_max_depth = parse_depth(&raw)?;
        }

        if let Some(raw) = lookup(ENV_QUERY_LIMIT_DEFAULT) {
            config.default_limit = raw.trim().parse().map_err(|_| {
                EngineError::invalid_config(format!(
                    "{} must be an integer, got \"{}\"",
                    ENV_QUERY_LIMIT_DEFAULT, raw
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EngineError::invalid_config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            EngineError::invalid_config(format!("Invalid JSON in {}: {}", path.display(), e))
        })?;
        config.validate()?;
        debug!(
            event = Event::ConfigLoaded.as_str(),
            path = %path.display(),
            batch_size = config.relational_batch_size,
            search_max_depth = ?config.search_max_depth,
        );
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> EngineResult<()> {
        if self.relational_batch_size == 0 {
            return Err(EngineError::invalid_config(
                "relational_batch_size must be greater than 0",
            ));
        }
        if self.default_limit == 0 || self.default_limit < -1 {
            return Err(EngineError::invalid_config(
                "default_limit must be positive or -1",
            ));
        }
        Ok(())
    }

    /// Builder-style batch size override
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.relational_batch_size = size;
        self
    }

    /// Builder-style search depth override
    pub fn with_search_max_depth(mut self, depth: Option<u32>) -> Self {
        self.search_max_depth = depth;
        self
    }
}

fn parse_depth(raw: &str) -> EngineResult<Option<u32>> {
    let trimmed = raw.trim();
    if trimmed.is_empty()
        || trimmed == "-1"
        || trimmed.eq_ignore_ascii_case("unbounded")
        || trimmed.eq_ignore_ascii_case("infinity")
    {
        return Ok(None);
    }
    trimmed.parse::<u32>().map(Some).map_err(|_| {
        EngineError::invalid_config(format!(
            "{} must be a non-negative integer or \"unbounded\", got \"{}\"",
            ENV_SEARCH_MAX_DEPTH, raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.relational_batch_size, 25);
        assert_eq!(config.search_max_depth, None);
        assert_eq!(config.default_limit, 100);
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            ("RELATIONAL_BATCH_SIZE", "50"),
            ("RELATIONAL_SEARCH_MAX_DEPTH", "2"),
            ("QUERY_LIMIT_DEFAULT", "-1"),
        ]))
        .unwrap();
        assert_eq!(config.relational_batch_size, 50);
        assert_eq!(config.search_max_depth, Some(2));
        assert_eq!(config.default_limit, -1);
    }

    #[test]
    fn test_unbounded_depth_spellings() {
        for raw in ["unbounded", "-1", "Infinity", ""] {
            let config =
                EngineConfig::from_lookup(lookup_from(&[("RELATIONAL_SEARCH_MAX_DEPTH", raw)]))
                    .unwrap();
            assert_eq!(config.search_max_depth, None, "raw = {:?}", raw);
        }
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = EngineConfig::from_lookup(lookup_from(&[("RELATIONAL_BATCH_SIZE", "0")]))
            .unwrap_err();
        assert_eq!(err.code().code(), "CONFIG_INVALID");
    }

    #[test]
    fn test_garbage_depth_rejected() {
        assert!(
            EngineConfig::from_lookup(lookup_from(&[("RELATIONAL_SEARCH_MAX_DEPTH", "deep")]))
                .is_err()
        );
    }

    #[test]
    fn test_load_from_file_uses_defaults_for_missing_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"search_max_depth": 1}}"#).unwrap();

        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.search_max_depth, Some(1));
        assert_eq!(config.relational_batch_size, 25);
        assert_eq!(config.default_limit, 100);
    }
}
