//! Observable engine events
//!
//! Every structured log line the engine emits carries one of these names in
//! its `event` field.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Request lifecycle
    /// Root execution begins
    RequestBegin,
    /// Root execution finished and the tree was shaped
    RequestComplete,
    /// Any branch failed and the tree was discarded
    RequestFailed,
    /// Root query returned no rows; children were skipped
    RootEmpty,

    // Compilation
    /// A level was compiled into a clause set
    LevelCompiled,
    /// Search term expanded into a predicate
    SearchExpanded,

    // Permissions
    /// Permission outcome resolved for a collection and action
    PermissionResolved,
    /// No rule matched; the level compiles to an always-false predicate
    PermissionDeniedAll,

    // Branches
    /// Branch state changed
    BranchTransition,
    /// One batched branch query issued
    BranchQuery,
    /// Branch had no parent keys; nothing was issued
    BranchSkipped,
    /// Branch rows folded onto parents
    BranchMerged,

    // Configuration
    ConfigLoaded,
    SchemaLoaded,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::RequestBegin => "REQUEST_BEGIN",
            Event::RequestComplete => "REQUEST_COMPLETE",
            Event::RequestFailed => "REQUEST_FAILED",
            Event::RootEmpty => "ROOT_EMPTY",

            Event::LevelCompiled => "LEVEL_COMPILED",
            Event::SearchExpanded => "SEARCH_EXPANDED",

            Event::PermissionResolved => "PERMISSION_RESOLVED",
            Event::PermissionDeniedAll => "PERMISSION_DENIED_ALL",

            Event::BranchTransition => "BRANCH_TRANSITION",
            Event::BranchQuery => "BRANCH_QUERY",
            Event::BranchSkipped => "BRANCH_SKIPPED",
            Event::BranchMerged => "BRANCH_MERGED",

            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::SchemaLoaded => "SCHEMA_LOADED",
        }
    }

    /// Events that end a request unsuccessfully
    pub fn is_failure(&self) -> bool {
        matches!(self, Event::RequestFailed)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
