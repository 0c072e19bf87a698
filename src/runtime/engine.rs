//! The execution engine: walks a compiled graph as a state machine, one
//! superstep at a time.
//!
//! Each superstep dispatches the current topological frontier concurrently,
//! waits for every member at a barrier, then merges their partial updates
//! through the reducers in frontier order. Step N's effects are fully applied
//! before step N+1 begins. A node may suspend the whole thread by returning
//! an interrupt; the engine checkpoints and hands the payload to the caller,
//! and a later resume call re-enters the interrupted node with the human
//! response on the snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::future::join_all;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::instrument;

use crate::graph::CompiledGraph;
use crate::llm::LanguageModel;
use crate::message::Message;
use crate::node::{NodeContext, NodeError, NodeOutput};
use crate::reducers::{ReducerError, ReducerRegistry};
use crate::registry::{GraphRegistry, RegistryError};
use crate::runtime::checkpoint::{
    CheckpointError, Checkpointer, ExecutionState, PendingInterrupt,
};
use crate::runtime::events::{ExecutionEvent, RunOutcome, RunStatus};
use crate::schema::StateSnapshot;

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error("node '{node}' failed")]
    #[diagnostic(
        code(flowloom::engine::node_failed),
        help("The last checkpoint remains the resumable point for this thread.")
    )]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Reducer(#[from] ReducerError),

    #[error("thread '{thread_id}' has no pending interrupt to resume")]
    #[diagnostic(
        code(flowloom::engine::no_pending_interrupt),
        help("Resume is only valid on a thread suspended at a gate.")
    )]
    NoPendingInterrupt { thread_id: String },

    #[error("invocation cancelled")]
    #[diagnostic(code(flowloom::engine::cancelled))]
    Cancelled,
}

/// What an invocation starts from: a fresh user message or an answer to a
/// pending interrupt.
#[derive(Clone, Debug)]
pub enum RunInput {
    /// Begin a new pass over the graph. On a thread with history this
    /// appends the message and walks the graph again from the start.
    Start { message: String },
    /// Answer the pending interrupt; the value lands on the snapshot's
    /// `resume` field for the re-entered node.
    Resume(Value),
}

/// Cooperative cancellation flag checked before each superstep.
///
/// Cancellation never interrupts a node mid-flight; the walk stops at the
/// next step boundary and the last checkpoint remains the resumable point.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Handle to a spawned streaming invocation.
pub struct InvocationHandle {
    task: JoinHandle<Result<RunOutcome, EngineError>>,
    cancel: CancelToken,
}

impl InvocationHandle {
    /// Wait for the invocation to finish and return its outcome.
    pub async fn join(self) -> Result<RunOutcome, EngineError> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(_) => Err(EngineError::Cancelled),
        }
    }

    /// Request a cooperative stop at the next step boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Abort the task immediately. Prefer [`cancel`](Self::cancel), which
    /// lets in-flight nodes finish and checkpoints stay consistent.
    pub fn abort(&self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Walks compiled graphs against checkpointed state.
///
/// Cheap to clone; all fields are shared handles. One engine serves any
/// number of concurrently-in-flight threads, each advancing its own state
/// machine. Per-thread writes are serialized by the checkpoint store's
/// versioned saves.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<GraphRegistry>,
    checkpointer: Arc<dyn Checkpointer>,
    language_model: Arc<dyn LanguageModel>,
    reducers: ReducerRegistry,
}

impl Engine {
    #[must_use]
    pub fn new(
        registry: Arc<GraphRegistry>,
        checkpointer: Arc<dyn Checkpointer>,
        language_model: Arc<dyn LanguageModel>,
    ) -> Self {
        Self {
            registry,
            checkpointer,
            language_model,
            reducers: ReducerRegistry::default(),
        }
    }

    #[must_use]
    pub fn with_reducers(mut self, reducers: ReducerRegistry) -> Self {
        self.reducers = reducers;
        self
    }

    /// Run to a terminal state, discarding progress events.
    pub async fn run(
        &self,
        graph: &str,
        thread_id: &str,
        input: RunInput,
    ) -> Result<RunOutcome, EngineError> {
        let (events, _drop) = flume::unbounded();
        self.drive(graph, thread_id, input, events, CancelToken::new())
            .await
    }

    /// Run to a terminal state under an external cancellation token.
    pub async fn run_with_cancel(
        &self,
        graph: &str,
        thread_id: &str,
        input: RunInput,
        cancel: CancelToken,
    ) -> Result<RunOutcome, EngineError> {
        let (events, _drop) = flume::unbounded();
        self.drive(graph, thread_id, input, events, cancel).await
    }

    /// Spawn the invocation and stream its events.
    ///
    /// The receiver yields zero or more step events followed by exactly one
    /// terminal event, then closes. Dropping the receiver never stalls the
    /// invocation.
    #[must_use]
    pub fn run_streaming(
        &self,
        graph: &str,
        thread_id: &str,
        input: RunInput,
    ) -> (InvocationHandle, flume::Receiver<ExecutionEvent>) {
        let (tx, rx) = flume::unbounded();
        let cancel = CancelToken::new();
        let engine = self.clone();
        let graph = graph.to_string();
        let thread_id = thread_id.to_string();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            engine.drive(&graph, &thread_id, input, tx, token).await
        });
        (InvocationHandle { task, cancel }, rx)
    }

    #[instrument(skip(self, input, events, cancel), err)]
    async fn drive(
        &self,
        graph: &str,
        thread_id: &str,
        input: RunInput,
        events: flume::Sender<ExecutionEvent>,
        cancel: CancelToken,
    ) -> Result<RunOutcome, EngineError> {
        let compiled = self.registry.compiled(graph)?;
        let mut exec = self.load_or_init(&compiled, thread_id, input).await?;
        tracing::debug!(status = %RunStatus::Ready, step = exec.step, "invocation starting");

        loop {
            if cancel.is_cancelled() {
                events
                    .send(ExecutionEvent::Failed {
                        error: EngineError::Cancelled.to_string(),
                    })
                    .ok();
                return Err(EngineError::Cancelled);
            }

            let frontier = compiled.frontier(&exec.executed);
            if frontier.is_empty() {
                exec.version += 1;
                self.checkpointer.save(thread_id, exec.clone()).await?;
                tracing::info!(status = %RunStatus::Completed, step = exec.step, "walk finished");
                events
                    .send(ExecutionEvent::Completed {
                        state: exec.state.clone(),
                    })
                    .ok();
                return Ok(RunOutcome::Completed(exec.state));
            }

            exec.step += 1;
            let resume_was_set = exec.state.resume.is_some();
            tracing::debug!(
                status = %RunStatus::Running,
                step = exec.step,
                frontier = ?frontier,
                "dispatching frontier"
            );

            let snapshot = exec.state.snapshot();
            let runs = frontier.iter().map(|name| {
                self.execute_node(&compiled, name, snapshot.clone(), exec.step)
            });
            let results = join_all(runs).await;

            // Barrier: every frontier member finished. Merge partials in
            // frontier order; the first interrupt (in that same order) wins.
            let mut interrupt: Option<PendingInterrupt> = None;
            for (name, result) in frontier.iter().zip(results) {
                match result {
                    Ok(NodeOutput::Partial(partial)) => {
                        self.reducers.apply_all(&mut exec.state, &partial)?;
                        exec.executed.insert(name.clone());
                        events.send(ExecutionEvent::step(name, partial)).ok();
                    }
                    Ok(NodeOutput::Interrupt(payload)) => {
                        if interrupt.is_none() {
                            interrupt = Some(PendingInterrupt {
                                node: name.clone(),
                                payload,
                            });
                        }
                    }
                    Err(source) => {
                        let err = EngineError::Node {
                            node: name.clone(),
                            source,
                        };
                        tracing::warn!(status = %RunStatus::Failed, node = %name, "node failed");
                        events
                            .send(ExecutionEvent::Failed {
                                error: err.to_string(),
                            })
                            .ok();
                        return Err(err);
                    }
                }
            }

            // The resume payload is visible for exactly one superstep.
            if resume_was_set {
                exec.state.resume = None;
            }

            if let Some(pending) = interrupt {
                // The interrupted node is not marked executed, so a resumed
                // walk re-enters it. Siblings that completed this step keep
                // their merged updates.
                exec.pending_interrupt = Some(pending.clone());
                exec.version += 1;
                self.checkpointer.save(thread_id, exec.clone()).await?;
                tracing::info!(status = %RunStatus::Suspended, node = %pending.node, "thread suspended");
                events
                    .send(ExecutionEvent::Interrupted {
                        node: pending.node.clone(),
                        payload: pending.payload.clone(),
                    })
                    .ok();
                return Ok(RunOutcome::Suspended {
                    node: pending.node,
                    payload: pending.payload,
                });
            }

            exec.version += 1;
            self.checkpointer.save(thread_id, exec.clone()).await?;
        }
    }

    /// Build the invocation's starting checkpoint from the stored one (if
    /// any) and the run input.
    async fn load_or_init(
        &self,
        compiled: &CompiledGraph,
        thread_id: &str,
        input: RunInput,
    ) -> Result<ExecutionState, EngineError> {
        let stored = self.checkpointer.load(thread_id).await?;
        match input {
            RunInput::Start { message } => Ok(match stored {
                // A new message on an existing thread starts a fresh pass
                // over the graph, keeping accumulated state. Any pending
                // interrupt is abandoned in favor of the new message.
                Some(mut exec) => {
                    exec.executed.clear();
                    exec.pending_interrupt = None;
                    exec.state.resume = None;
                    exec.state.messages.push(Message::user(&message));
                    exec
                }
                None => ExecutionState::fresh(compiled.schema().initial_state(&message)),
            }),
            RunInput::Resume(value) => {
                let mut exec = stored.ok_or_else(|| EngineError::NoPendingInterrupt {
                    thread_id: thread_id.to_string(),
                })?;
                if exec.pending_interrupt.take().is_none() {
                    return Err(EngineError::NoPendingInterrupt {
                        thread_id: thread_id.to_string(),
                    });
                }
                exec.state.resume = Some(value);
                Ok(exec)
            }
        }
    }

    /// Execute one node, exhausting its retry policy before giving up.
    /// Config is read at dispatch time so hot-swapped values apply without
    /// recompilation. Interrupts are outcomes, not failures, and are never
    /// retried.
    async fn execute_node(
        &self,
        compiled: &CompiledGraph,
        name: &str,
        snapshot: StateSnapshot,
        step: u64,
    ) -> Result<NodeOutput, NodeError> {
        let node = compiled
            .node(name)
            .ok_or(NodeError::MissingInput { what: "registered node implementation" })?;
        let config = self.registry.node_config(name);
        let policy = config.retry.clone();
        let ctx = NodeContext {
            node: name.to_string(),
            step,
            config,
            language_model: Arc::clone(&self.language_model),
        };

        let mut attempt = 1;
        loop {
            match node.run(snapshot.clone(), ctx.clone()).await {
                Ok(output) => return Ok(output),
                Err(err) if attempt < policy.max_attempts => {
                    tracing::warn!(node = %name, attempt, error = %err, "node attempt failed, retrying");
                    tokio::time::sleep(policy.backoff_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
