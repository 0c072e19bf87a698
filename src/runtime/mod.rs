//! Workflow runtime: checkpoint persistence, the execution engine, and the
//! streamed event surface.

pub mod checkpoint;
pub mod engine;
pub mod events;

pub use checkpoint::{
    CheckpointError, Checkpointer, ExecutionState, InMemoryCheckpointer, PendingInterrupt,
};
pub use engine::{CancelToken, Engine, EngineError, InvocationHandle, RunInput};
pub use events::{ExecutionEvent, RunOutcome, RunStatus, StepEvent};
