use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use flowloom::message::Message;
use flowloom::node::{Node, NodeContext, NodeError, NodeOutput};
use flowloom::schema::{StatePartial, StateSnapshot};
use serde_json::json;

/// Records its own name in `steps`.
#[derive(Debug, Clone)]
pub struct RecordStep {
    pub name: &'static str,
}

impl RecordStep {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Node for RecordStep {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::partial(
            StatePartial::new().with_steps(vec![self.name.to_string()]),
        ))
    }
}

/// Writes one analysis entry and records its step.
#[derive(Debug, Clone)]
pub struct Annotate {
    pub name: &'static str,
    pub key: &'static str,
    pub value: serde_json::Value,
}

impl Annotate {
    pub fn new(name: &'static str, key: &'static str, value: serde_json::Value) -> Self {
        Self { name, key, value }
    }
}

#[async_trait]
impl Node for Annotate {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        Ok(NodeOutput::partial(
            StatePartial::new()
                .with_steps(vec![self.name.to_string()])
                .with_analysis_entry(self.key, self.value.clone()),
        ))
    }
}

/// Human-approval gate: interrupts on first entry, consumes the resume value
/// on re-entry.
#[derive(Debug, Clone)]
pub struct Gate;

#[async_trait]
impl Node for Gate {
    async fn run(
        &self,
        snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        match snapshot.resume {
            Some(answer) => Ok(NodeOutput::partial(
                StatePartial::new()
                    .with_steps(vec!["gate".to_string()])
                    .with_analysis_entry("approval", answer),
            )),
            None => Ok(NodeOutput::interrupt(json!({"prompt": "approve?"}))),
        }
    }
}

/// Fails the first `failures` runs, then succeeds. Tracks total attempts.
#[derive(Debug, Clone)]
pub struct Flaky {
    pub name: &'static str,
    remaining: Arc<AtomicU32>,
    pub attempts: Arc<AtomicU32>,
}

impl Flaky {
    pub fn new(name: &'static str, failures: u32) -> Self {
        Self {
            name,
            remaining: Arc::new(AtomicU32::new(failures)),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl Node for Flaky {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(NodeError::ValidationFailed("transient failure".to_string()));
        }
        Ok(NodeOutput::partial(
            StatePartial::new().with_steps(vec![self.name.to_string()]),
        ))
    }
}

/// Always fails.
#[derive(Debug, Clone)]
pub struct AlwaysFails;

#[async_trait]
impl Node for AlwaysFails {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        Err(NodeError::MissingInput { what: "nothing is ever enough" })
    }
}

/// Sleeps, then records its step. For exercising step-boundary cancellation.
#[derive(Debug, Clone)]
pub struct Slow {
    pub name: &'static str,
    pub delay: Duration,
}

#[async_trait]
impl Node for Slow {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        tokio::time::sleep(self.delay).await;
        Ok(NodeOutput::partial(
            StatePartial::new().with_steps(vec![self.name.to_string()]),
        ))
    }
}

/// Replies with a completion using the dispatch-time model config, so tests
/// can observe hot-swapped configuration.
#[derive(Debug, Clone)]
pub struct ModelReporter;

#[async_trait]
impl Node for ModelReporter {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        let model = ctx.model_or("default-model");
        let completion = ctx
            .language_model
            .complete(&model, "report the model", ctx.temperature_or(0.0))
            .await?;
        Ok(NodeOutput::partial(
            StatePartial::new()
                .with_messages(vec![Message::assistant(&completion.text)])
                .with_analysis_entry("model", json!(model)),
        ))
    }
}
