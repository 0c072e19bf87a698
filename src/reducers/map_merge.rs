use super::Reducer;
use crate::schema::{StatePartial, WorkflowState};

/// Shallow key-wise merge of analysis results.
///
/// Keys within a single partial are applied in sorted order so map iteration
/// order never leaks into the outcome; across partials the barrier applies
/// them in execution order, which makes overlapping keys last-writer-wins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MergeAnalysis;

impl Reducer for MergeAnalysis {
    fn apply(&self, state: &mut WorkflowState, update: &StatePartial) {
        if let Some(analysis) = &update.analysis
            && !analysis.is_empty()
        {
            let mut pairs: Vec<_> = analysis.iter().collect();
            pairs.sort_by(|(left, _), (right, _)| left.cmp(right));
            for (key, value) in pairs {
                state.analysis.insert(key.clone(), value.clone());
            }
        }
    }
}
