use super::Reducer;
use crate::schema::{StatePartial, WorkflowState};

/// Ordered concatenation of conversation messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppendMessages;

impl Reducer for AppendMessages {
    fn apply(&self, state: &mut WorkflowState, update: &StatePartial) {
        if let Some(messages) = &update.messages
            && !messages.is_empty()
        {
            state.messages.extend(messages.iter().cloned());
        }
    }
}

/// Ordered concatenation of the execution trace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppendSteps;

impl Reducer for AppendSteps {
    fn apply(&self, state: &mut WorkflowState, update: &StatePartial) {
        if let Some(steps) = &update.steps
            && !steps.is_empty()
        {
            state.steps.extend(steps.iter().cloned());
        }
    }
}
