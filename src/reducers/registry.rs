use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::instrument;

use super::{AppendMessages, AppendSteps, Field, MergeAnalysis, Reducer, ReducerError};
use crate::schema::{StatePartial, WorkflowState};

/// Maps each state field to the reducers that merge updates into it.
///
/// The default registry wires the three standard fields (messages, steps,
/// analysis). Multiple reducers per field are applied in registration order.
#[derive(Clone)]
pub struct ReducerRegistry {
    reducers: FxHashMap<Field, Vec<Arc<dyn Reducer>>>,
}

/// Skip reducer invocation when the partial carries nothing for the field.
fn field_guard(field: Field, partial: &StatePartial) -> bool {
    match field {
        Field::Messages => partial.messages.as_ref().is_some_and(|v| !v.is_empty()),
        Field::Steps => partial.steps.as_ref().is_some_and(|v| !v.is_empty()),
        Field::Analysis => partial.analysis.as_ref().is_some_and(|m| !m.is_empty()),
    }
}

impl Default for ReducerRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry
            .register(Field::Messages, Arc::new(AppendMessages))
            .register(Field::Steps, Arc::new(AppendSteps))
            .register(Field::Analysis, Arc::new(MergeAnalysis));
        registry
    }
}

impl ReducerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            reducers: FxHashMap::default(),
        }
    }

    pub fn register(&mut self, field: Field, reducer: Arc<dyn Reducer>) -> &mut Self {
        self.reducers.entry(field).or_default().push(reducer);
        self
    }

    /// Apply one field's reducers if the partial carries data for it.
    #[instrument(skip(self, state, update), err)]
    pub fn try_update(
        &self,
        field: Field,
        state: &mut WorkflowState,
        update: &StatePartial,
    ) -> Result<(), ReducerError> {
        if !field_guard(field, update) {
            return Ok(());
        }
        let reducers = self
            .reducers
            .get(&field)
            .ok_or(ReducerError::UnknownField(field))?;
        for reducer in reducers {
            reducer.apply(state, update);
        }
        Ok(())
    }

    /// Apply every registered field's reducers where the partial supplies a
    /// value, leaving untouched fields unchanged.
    pub fn apply_all(
        &self,
        state: &mut WorkflowState,
        update: &StatePartial,
    ) -> Result<(), ReducerError> {
        for field in self.reducers.keys().copied().collect::<Vec<_>>() {
            self.try_update(field, state, update)?;
        }
        Ok(())
    }
}
