//! Branch state machine
//!
//! Every relational branch moves through the same states:
//!
//! ```text
//! Pending -> Compiling -> Querying -> ExpandingChildren -> Merging -> Done
//! ```
//!
//! `Failed` is reachable from any state except `Done`. Transitions are
//! explicit; nothing is inferred from timing.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::observability::Event;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BranchState {
    #[default]
    Pending,
    Compiling,
    Querying,
    ExpandingChildren,
    Merging,
    Done,
    Failed(String),
}

impl BranchState {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Compiling => "Compiling",
            Self::Querying => "Querying",
            Self::ExpandingChildren => "ExpandingChildren",
            Self::Merging => "Merging",
            Self::Done => "Done",
            Self::Failed(_) => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    fn forbidden(self, to: &str) -> EngineResult<Self> {
        Err(EngineError::invalid_transition(self.state_name(), to))
    }

    pub fn begin_compile(self) -> EngineResult<Self> {
        match self {
            Self::Pending => Ok(Self::Compiling),
            other => other.forbidden("Compiling"),
        }
    }

    pub fn begin_query(self) -> EngineResult<Self> {
        match self {
            Self::Compiling => Ok(Self::Querying),
            other => other.forbidden("Querying"),
        }
    }

    pub fn begin_children(self) -> EngineResult<Self> {
        match self {
            Self::Querying => Ok(Self::ExpandingChildren),
            other => other.forbidden("ExpandingChildren"),
        }
    }

    /// A branch with no parent keys goes straight from `Pending` to merging
    pub fn begin_merge(self) -> EngineResult<Self> {
        match self {
            Self::Pending | Self::ExpandingChildren => Ok(Self::Merging),
            other => other.forbidden("Merging"),
        }
    }

    pub fn complete(self) -> EngineResult<Self> {
        match self {
            Self::Merging => Ok(Self::Done),
            other => other.forbidden("Done"),
        }
    }

    pub fn fail(self, reason: impl Into<String>) -> EngineResult<Self> {
        match self {
            Self::Done => self.forbidden("Failed"),
            _ => Ok(Self::Failed(reason.into())),
        }
    }
}

/// Branch state plus the identity it is logged under
#[derive(Debug)]
pub(crate) struct BranchTracker {
    request_id: Uuid,
    collection: String,
    field: String,
    state: BranchState,
}

impl BranchTracker {
    pub fn new(request_id: Uuid, collection: &str, field: &str) -> Self {
        Self {
            request_id,
            collection: collection.to_string(),
            field: field.to_string(),
            state: BranchState::Pending,
        }
    }

    /// Applies `step` to the current state and logs the change
    pub fn advance(
        &mut self,
        step: impl FnOnce(BranchState) -> EngineResult<BranchState>,
    ) -> EngineResult<()> {
        let from = self.state.state_name();
        let next = step(std::mem::take(&mut self.state))?;
        debug!(
            event = Event::BranchTransition.as_str(),
            request_id = %self.request_id,
            collection = %self.collection,
            field = %self.field,
            from,
            to = next.state_name(),
        );
        self.state = next;
        Ok(())
    }

    /// Marks the branch failed; a branch already done stays done
    pub fn fail(&mut self, error: &EngineError) {
        let current = std::mem::take(&mut self.state);
        self.state = match current.clone().fail(error.to_string()) {
            Ok(failed) => {
                warn!(
                    event = Event::BranchTransition.as_str(),
                    request_id = %self.request_id,
                    collection = %self.collection,
                    field = %self.field,
                    from = current.state_name(),
                    to = failed.state_name(),
                    error = %error,
                );
                failed
            }
            Err(_) => current,
        };
    }
}
