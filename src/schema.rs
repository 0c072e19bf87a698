//! Typed workflow state and the closed set of state schemas.
//!
//! State is a concrete struct, not a string-keyed bag: every field has an
//! explicit merge rule applied at fan-in barriers. [`StateSchema`] is the
//! closed set of shapes a graph can declare; unknown schema names degrade to
//! [`StateSchema::Default`] rather than failing, so a misconfigured graph
//! still gets a usable state.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::message::Message;

/// The closed set of state shapes graphs can be declared over.
///
/// Each variant seeds different `analysis` defaults; the field set and merge
/// rules are shared. Parsing is lenient: an unrecognized name maps to
/// [`Default`](Self::Default).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateSchema {
    SequentialResearch,
    ConcurrentResearch,
    Monetization,
    Default,
}

impl StateSchema {
    /// Resolve a schema by its configured name. Unknown names fall back to
    /// `Default`. A deliberate leniency, not an error.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "sequential-research" => Self::SequentialResearch,
            "concurrent-research" => Self::ConcurrentResearch,
            "monetization" => Self::Monetization,
            _ => Self::Default,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SequentialResearch => "sequential-research",
            Self::ConcurrentResearch => "concurrent-research",
            Self::Monetization => "monetization",
            Self::Default => "default",
        }
    }

    /// Build the starting state for a fresh thread, seeded with the inbound
    /// user message and the schema's analysis defaults.
    #[must_use]
    pub fn initial_state(&self, user_text: &str) -> WorkflowState {
        let mut analysis = FxHashMap::default();
        analysis.insert("schema".to_string(), json!(self.name()));
        match self {
            Self::SequentialResearch => {
                analysis.insert("findings".to_string(), json!([]));
            }
            Self::ConcurrentResearch => {
                analysis.insert("findings".to_string(), json!({}));
            }
            Self::Monetization => {
                analysis.insert("opportunities".to_string(), json!([]));
            }
            Self::Default => {}
        }
        WorkflowState {
            messages: vec![Message::user(user_text)],
            steps: Vec::new(),
            analysis,
            resume: None,
        }
    }
}

/// The live value of all state fields for one thread.
///
/// Mutated only through [`ReducerRegistry::apply_all`](crate::reducers::ReducerRegistry::apply_all)
/// at fan-in barriers; nodes receive an immutable [`StateSnapshot`] and
/// return a [`StatePartial`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    /// Conversation log (append reducer).
    pub messages: Vec<Message>,
    /// Names of completed work items, in execution order (append reducer).
    pub steps: Vec<String>,
    /// Analysis results keyed by name (shallow-merge reducer, last writer
    /// wins on overlapping keys by arrival order at the barrier).
    pub analysis: FxHashMap<String, Value>,
    /// Human response supplied when resuming a suspended thread. Overwritten
    /// on each resume, cleared once the interrupted node has consumed it.
    #[serde(default)]
    pub resume: Option<Value>,
}

impl WorkflowState {
    /// Point-in-time view handed to nodes. Cloned so node execution can
    /// overlap with nothing mutating underneath it.
    #[must_use]
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            messages: self.messages.clone(),
            steps: self.steps.clone(),
            analysis: self.analysis.clone(),
            resume: self.resume.clone(),
        }
    }

    /// Most recent user message, if any. Convenience for node prompts.
    #[must_use]
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.has_role(Message::USER))
    }
}

/// Immutable snapshot of [`WorkflowState`] passed to node execution.
#[derive(Clone, Debug)]
pub struct StateSnapshot {
    pub messages: Vec<Message>,
    pub steps: Vec<String>,
    pub analysis: FxHashMap<String, Value>,
    pub resume: Option<Value>,
}

impl StateSnapshot {
    #[must_use]
    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.has_role(Message::USER))
    }
}

/// Partial state update produced by one node execution.
///
/// All fields are optional; the reducers apply only the fields a node
/// supplies and leave the rest untouched.
///
/// # Examples
///
/// ```
/// use flowloom::message::Message;
/// use flowloom::schema::StatePartial;
///
/// let partial = StatePartial::new()
///     .with_messages(vec![Message::assistant("done")])
///     .with_steps(vec!["summarize".into()]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePartial {
    pub messages: Option<Vec<Message>>,
    pub steps: Option<Vec<String>>,
    pub analysis: Option<FxHashMap<String, Value>>,
}

impl StatePartial {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    #[must_use]
    pub fn with_steps(mut self, steps: Vec<String>) -> Self {
        self.steps = Some(steps);
        self
    }

    #[must_use]
    pub fn with_analysis(mut self, analysis: FxHashMap<String, Value>) -> Self {
        self.analysis = Some(analysis);
        self
    }

    /// Single-entry analysis convenience.
    #[must_use]
    pub fn with_analysis_entry(mut self, key: &str, value: Value) -> Self {
        let map = self.analysis.get_or_insert_with(FxHashMap::default);
        map.insert(key.to_string(), value);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.as_ref().is_none_or(|m| m.is_empty())
            && self.steps.as_ref().is_none_or(|s| s.is_empty())
            && self.analysis.as_ref().is_none_or(|a| a.is_empty())
    }
}
