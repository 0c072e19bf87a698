//! Durable checkpoints: the resumable record of one thread's execution.
//!
//! The store owns execution state exclusively, keyed by thread id. The engine
//! reads a copy, computes updates, and writes back through versioned saves.
//! Saves are compare-and-swap: a save must carry exactly the stored version
//! plus one, so two racing resumptions of the same thread cannot silently
//! lose each other's updates.

use std::sync::Mutex;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::schema::WorkflowState;

/// Interrupt recorded when a thread suspended at a gate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub node: String,
    pub payload: Value,
}

/// Everything needed to resume a thread where it left off.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionState {
    pub state: WorkflowState,
    /// Nodes already executed in the current pass over the graph.
    pub executed: FxHashSet<String>,
    /// Superstep counter, monotone per thread.
    pub step: u64,
    #[serde(default)]
    pub pending_interrupt: Option<PendingInterrupt>,
    /// Optimistic-concurrency version; bumped by one on every save.
    pub version: u64,
}

impl ExecutionState {
    /// Unsaved initial checkpoint at version zero. The first save carries
    /// version one.
    #[must_use]
    pub fn fresh(state: WorkflowState) -> Self {
        Self {
            state,
            executed: FxHashSet::default(),
            step: 0,
            pending_interrupt: None,
            version: 0,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error("version conflict on thread '{thread_id}': tried to save version {attempted}, store holds {stored}")]
    #[diagnostic(
        code(flowloom::checkpoint::version_conflict),
        help("Another invocation updated this thread concurrently. Reload and retry.")
    )]
    VersionConflict {
        thread_id: String,
        attempted: u64,
        stored: u64,
    },

    #[error("checkpoint backend error: {0}")]
    #[diagnostic(code(flowloom::checkpoint::backend))]
    Backend(String),

    #[error(transparent)]
    #[diagnostic(code(flowloom::checkpoint::serde_json))]
    Serde(#[from] serde_json::Error),
}

/// Persistence boundary for execution state.
///
/// `save` must enforce compare-and-swap on `version`: the incoming state's
/// version must equal the stored version plus one (or one when nothing is
/// stored yet), otherwise the save fails with
/// [`CheckpointError::VersionConflict`] and the store is unchanged.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    async fn load(&self, thread_id: &str) -> Result<Option<ExecutionState>, CheckpointError>;
    async fn save(&self, thread_id: &str, state: ExecutionState) -> Result<(), CheckpointError>;
}

/// Mutex-guarded map store. The reference implementation of the CAS
/// discipline; durable backends substitute behind the same trait.
#[derive(Default)]
pub struct InMemoryCheckpointer {
    states: Mutex<FxHashMap<String, ExecutionState>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn load(&self, thread_id: &str) -> Result<Option<ExecutionState>, CheckpointError> {
        let states = self.states.lock().expect("checkpoint store lock poisoned");
        Ok(states.get(thread_id).cloned())
    }

    #[instrument(skip(self, state), fields(version = state.version), err)]
    async fn save(&self, thread_id: &str, state: ExecutionState) -> Result<(), CheckpointError> {
        let mut states = self.states.lock().expect("checkpoint store lock poisoned");
        let stored = states.get(thread_id).map_or(0, |s| s.version);
        if state.version != stored + 1 {
            return Err(CheckpointError::VersionConflict {
                thread_id: thread_id.to_string(),
                attempted: state.version,
                stored,
            });
        }
        states.insert(thread_id.to_string(), state);
        Ok(())
    }
}
