use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{CoordinatorError, CoordinatorResult};

/// Lifecycle of one request inside the coordinator.
///
/// ```text
/// Received -> Dispatching -> AwaitingEngine -> Completed | Failed
///                         -> Rejected       -> Failed
/// ```
///
/// Requests that never reach an engine (store reads, preference writes) go
/// `Dispatching -> Completed` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestPhase {
    Received,
    Dispatching,
    AwaitingEngine,
    Rejected,
    Completed,
    Failed,
}

impl RequestPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_advance_to(self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        matches!(
            (self, next),
            (Received, Dispatching)
                | (Dispatching, AwaitingEngine)
                | (Dispatching, Rejected)
                | (Dispatching, Completed)
                | (AwaitingEngine, Completed)
                | (AwaitingEngine, Failed)
                | (Rejected, Failed)
        )
    }

    pub fn advance(&mut self, next: RequestPhase) -> CoordinatorResult<()> {
        if !self.can_advance_to(next) {
            return Err(CoordinatorError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        trace!(target: "coordinator", from = ?*self, to = ?next, "request phase");
        *self = next;
        Ok(())
    }
}

/// Final classification of a handled request, kept for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed,
    Failed,
    Rejected,
}
