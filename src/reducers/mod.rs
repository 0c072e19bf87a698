//! Merge strategies for combining partial state updates into the live state.
//!
//! Each [`WorkflowState`](crate::schema::WorkflowState) field has one reducer.
//! Two families exist: *append* (ordered concatenation, used for messages and
//! steps) and *shallow-merge* (key-wise overwrite, used for analysis).
//! Reducers are applied at fan-in barriers only, so concurrent branches never
//! observe each other's half-applied updates.

mod append;
mod map_merge;
mod registry;

pub use append::{AppendMessages, AppendSteps};
pub use map_merge::MergeAnalysis;
pub use registry::ReducerRegistry;

use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use crate::schema::{StatePartial, WorkflowState};

/// Unified reducer contract: mutate the state using one field of a partial.
///
/// Implementations must be associative enough that fan-in order does not
/// change the final value for disjoint inputs; overlapping map keys follow
/// last-writer-wins by arrival order.
pub trait Reducer: Send + Sync {
    fn apply(&self, state: &mut WorkflowState, update: &StatePartial);
}

/// The state fields reducers are registered under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Field {
    Messages,
    Steps,
    Analysis,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Messages => write!(f, "messages"),
            Self::Steps => write!(f, "steps"),
            Self::Analysis => write!(f, "analysis"),
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ReducerError {
    #[error("no reducer registered for field: {0}")]
    #[diagnostic(
        code(flowloom::reducers::unknown_field),
        help("Register a reducer for the field before applying updates to it.")
    )]
    UnknownField(Field),
}
