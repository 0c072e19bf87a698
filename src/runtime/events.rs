//! Event surface emitted while a thread executes.
//!
//! The engine produces a lazy, finite, non-restartable sequence of events per
//! invocation: zero or more step events, then exactly one of `Interrupted`,
//! `Completed`, or `Failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::schema::{StatePartial, WorkflowState};

/// One node finished and its partial update was merged.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepEvent {
    pub node: String,
    pub partial: StatePartial,
    pub at: DateTime<Utc>,
}

/// Progress events streamed to the caller as the walk advances.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ExecutionEvent {
    Step(StepEvent),
    /// The thread suspended at a gate; the payload travels verbatim to the
    /// external actor.
    Interrupted { node: String, payload: Value },
    Completed { state: WorkflowState },
    Failed { error: String },
}

impl ExecutionEvent {
    pub(crate) fn step(node: &str, partial: StatePartial) -> Self {
        Self::Step(StepEvent {
            node: node.to_string(),
            partial,
            at: Utc::now(),
        })
    }

    /// True for the event that ends a stream.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Step(_))
    }
}

/// Final result of one engine invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed(WorkflowState),
    /// Suspended at `node` awaiting external input.
    Suspended { node: String, payload: Value },
}

/// Invocation state machine phases, surfaced in tracing spans.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunStatus {
    Ready,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}
