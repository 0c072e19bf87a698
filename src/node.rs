//! Node execution contract: the unit of work inside a workflow graph.
//!
//! A node reads an immutable state snapshot and either returns a partial
//! state update or requests an interrupt, suspending the thread until an
//! external actor supplies input.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::llm::LanguageModel;
use crate::schema::{StatePartial, StateSnapshot};

/// Executable workflow node.
///
/// Nodes should be stateless: everything they need arrives in the snapshot
/// and context, everything they produce leaves in the output. Fatal problems
/// are returned as `Err(NodeError)` and abort the invocation; the last
/// checkpoint remains the resumable point.
///
/// # Examples
///
/// ```
/// use flowloom::node::{Node, NodeContext, NodeError, NodeOutput};
/// use flowloom::schema::{StatePartial, StateSnapshot};
/// use async_trait::async_trait;
///
/// struct Approval;
///
/// #[async_trait]
/// impl Node for Approval {
///     async fn run(&self, snapshot: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
///         match snapshot.resume {
///             // Human already answered: record it and move on.
///             Some(answer) => Ok(NodeOutput::partial(
///                 StatePartial::new().with_analysis_entry("approval", answer),
///             )),
///             // First visit: suspend and ask.
///             None => Ok(NodeOutput::interrupt(serde_json::json!({"prompt": "approve?"}))),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Node: Send + Sync {
    async fn run(&self, snapshot: StateSnapshot, ctx: NodeContext)
    -> Result<NodeOutput, NodeError>;
}

/// What a node execution produced: a state delta, or a suspension request.
#[derive(Clone, Debug)]
pub enum NodeOutput {
    /// Partial state update, merged at the fan-in barrier.
    Partial(StatePartial),
    /// Suspend the thread; the payload travels to the external actor
    /// verbatim (prompt text, options, context).
    Interrupt(Value),
}

impl NodeOutput {
    #[must_use]
    pub fn partial(partial: StatePartial) -> Self {
        Self::Partial(partial)
    }

    #[must_use]
    pub fn interrupt(payload: Value) -> Self {
        Self::Interrupt(payload)
    }
}

/// Execution context handed to each node invocation.
///
/// Carries the node's identity, the current step number, the node's runtime
/// configuration as of dispatch time (so config hot-swaps take effect without
/// recompilation), and the language-model client.
#[derive(Clone)]
pub struct NodeContext {
    pub node: String,
    pub step: u64,
    pub config: NodeConfig,
    pub language_model: Arc<dyn LanguageModel>,
}

impl NodeContext {
    /// Model name from config, or the given fallback.
    #[must_use]
    pub fn model_or(&self, fallback: &str) -> String {
        self.config.model.clone().unwrap_or_else(|| fallback.to_string())
    }

    /// Sampling temperature from config, or the given fallback.
    #[must_use]
    pub fn temperature_or(&self, fallback: f32) -> f32 {
        self.config.temperature.unwrap_or(fallback)
    }
}

/// Untyped per-node runtime configuration.
///
/// Independently mutable on a live registry: changing a node's model or
/// temperature never recompiles graph shape. The engine reads the current
/// value at each dispatch.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl NodeConfig {
    #[must_use]
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Per-node retry policy wrapping node execution.
///
/// Retries are node policy, not an engine loop concern: the engine exhausts
/// the policy for a single node before declaring the invocation failed.
/// The default is a single attempt with no backoff.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Clamped to at least 1.
    #[serde(default = "RetryPolicy::default_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts; attempt N waits N times this.
    #[serde(default)]
    pub backoff_ms: u64,
}

impl RetryPolicy {
    fn default_attempts() -> u32 {
        1
    }

    #[must_use]
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_ms: 0,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff_ms = backoff.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
        }
    }
}

/// Fatal node execution errors. These abort the current invocation as
/// `Failed`; the engine never silently swallows them.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(flowloom::node::missing_input),
        help("Check that an upstream node produced the required data.")
    )]
    MissingInput { what: &'static str },

    #[error("language model error: {0}")]
    #[diagnostic(code(flowloom::node::language_model))]
    LanguageModel(#[from] crate::llm::LanguageModelError),

    #[error(transparent)]
    #[diagnostic(code(flowloom::node::serde_json))]
    Serde(#[from] serde_json::Error),

    #[error("validation failed: {0}")]
    #[diagnostic(code(flowloom::node::validation))]
    ValidationFailed(String),
}
