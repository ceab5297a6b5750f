//! Request context
//!
//! Immutable inputs for one request, passed by reference through the
//! compiler and executor. The only interior state is the permission cache,
//! which is written once per collection and action and read many times.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::observability::Event;
use crate::permissions::{
    Accountability, Action, PermissionOutcome, PermissionResolver, PermissionRule,
};
use crate::schema::SchemaOverview;

/// Context carried through one request
#[derive(Debug)]
pub struct RequestContext {
    /// Request ID for tracing
    pub request_id: Uuid,
    pub accountability: Accountability,
    pub schema: Arc<SchemaOverview>,
    pub config: EngineConfig,
    rules: Vec<PermissionRule>,
    now: DateTime<Utc>,
    permission_cache: RwLock<HashMap<(String, Action), Arc<PermissionOutcome>>>,
    started_at: Instant,
}

impl RequestContext {
    pub fn new(
        accountability: Accountability,
        schema: Arc<SchemaOverview>,
        rules: Vec<PermissionRule>,
        config: EngineConfig,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            accountability,
            schema,
            config,
            rules,
            now: Utc::now(),
            permission_cache: RwLock::new(HashMap::new()),
            started_at: Instant::now(),
        }
    }

    /// Admin context with default configuration
    pub fn admin(schema: Arc<SchemaOverview>) -> Self {
        Self::new(
            Accountability::admin(),
            schema,
            Vec::new(),
            EngineConfig::default(),
        )
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Pins the clock used for `$NOW`
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn schema(&self) -> &SchemaOverview {
        &self.schema
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u128 {
        self.started_at.elapsed().as_millis()
    }

    /// Resolves (and caches) the permission outcome for a collection
    pub fn permissions(&self, collection: &str, action: Action) -> Arc<PermissionOutcome> {
        let key = (collection.to_string(), action);

        {
            let cache = self
                .permission_cache
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(outcome) = cache.get(&key) {
                return Arc::clone(outcome);
            }
        }

        let outcome = PermissionResolver::new(&self.accountability, &self.rules)
            .with_now(self.now)
            .resolve(collection, action);

        if outcome.is_denied() {
            debug!(
                event = Event::PermissionDeniedAll.as_str(),
                request_id = %self.request_id,
                collection,
                action = action.as_str(),
            );
        } else {
            debug!(
                event = Event::PermissionResolved.as_str(),
                request_id = %self.request_id,
                collection,
                action = action.as_str(),
            );
        }

        let mut cache = self
            .permission_cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(cache.entry(key).or_insert_with(|| Arc::new(outcome)))
    }

    /// Read outcome shorthand
    pub fn read_permissions(&self, collection: &str) -> Arc<PermissionOutcome> {
        self.permissions(collection, Action::Read)
    }
}
