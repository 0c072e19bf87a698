use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use flowloom::node::{Node, NodeConfig, NodeContext, NodeError, NodeOutput, RetryPolicy};
use flowloom::registry::GraphRegistry;
use flowloom::runtime::checkpoint::{CheckpointError, Checkpointer};
use flowloom::runtime::engine::{CancelToken, EngineError, RunInput};
use flowloom::runtime::events::{ExecutionEvent, RunOutcome};
use flowloom::schema::{StatePartial, StateSnapshot};
use serde_json::json;

mod common;
use common::*;

fn gate_graph(registry: &GraphRegistry) {
    registry.register_node("A", RecordStep::new("A"));
    registry.register_node("gate", Gate);
    registry
        .register_graph(linear_spec("approval", "A", "gate"))
        .unwrap();
}

#[tokio::test]
async fn linear_walk_completes_in_order() {
    let registry = Arc::new(GraphRegistry::new());
    registry.register_node("a", RecordStep::new("a"));
    registry.register_node("b", RecordStep::new("b"));
    registry.register_graph(linear_spec("line", "a", "b")).unwrap();

    let (engine, _) = engine_with(Arc::clone(&registry));
    let outcome = engine
        .run("line", "t1", RunInput::Start { message: "hello".into() })
        .await
        .unwrap();

    match outcome {
        RunOutcome::Completed(state) => {
            assert_eq!(state.steps, vec!["a", "b"]);
            assert_eq!(state.messages[0].content, "hello");
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn streaming_yields_steps_then_terminal_event() {
    let registry = Arc::new(GraphRegistry::new());
    registry.register_node("a", RecordStep::new("a"));
    registry.register_node("b", RecordStep::new("b"));
    registry.register_graph(linear_spec("line", "a", "b")).unwrap();

    let (engine, _) = engine_with(Arc::clone(&registry));
    let (handle, events) =
        engine.run_streaming("line", "t1", RunInput::Start { message: "go".into() });
    handle.join().await.unwrap();

    let events: Vec<_> = events.into_iter().collect();
    assert_eq!(events.len(), 3);
    assert!(matches!(&events[0], ExecutionEvent::Step(s) if s.node == "a"));
    assert!(matches!(&events[1], ExecutionEvent::Step(s) if s.node == "b"));
    assert!(events[2].is_terminal());
    assert!(matches!(&events[2], ExecutionEvent::Completed { .. }));
}

#[tokio::test]
async fn gate_suspends_then_resume_runs_to_completion() {
    let registry = Arc::new(GraphRegistry::new());
    gate_graph(&registry);
    let (engine, checkpointer) = engine_with(Arc::clone(&registry));

    let outcome = engine
        .run("approval", "t1", RunInput::Start { message: "hello".into() })
        .await
        .unwrap();
    match outcome {
        RunOutcome::Suspended { node, payload } => {
            assert_eq!(node, "gate");
            assert_eq!(payload, json!({"prompt": "approve?"}));
        }
        other => panic!("expected suspension, got {other:?}"),
    }

    // Progress up to the gate is checkpointed, not recomputed.
    let saved = checkpointer.load("t1").await.unwrap().unwrap();
    assert_eq!(saved.state.steps, vec!["A"]);
    assert_eq!(saved.pending_interrupt.as_ref().unwrap().node, "gate");

    let outcome = engine
        .run("approval", "t1", RunInput::Resume(json!("yes")))
        .await
        .unwrap();
    match outcome {
        RunOutcome::Completed(state) => {
            assert_eq!(state.steps, vec!["A", "gate"]);
            assert_eq!(state.analysis.get("approval"), Some(&json!("yes")));
            // Consumed resume values do not linger.
            assert!(state.resume.is_none());
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn resume_without_pending_interrupt_is_an_error() {
    let registry = Arc::new(GraphRegistry::new());
    registry.register_node("a", RecordStep::new("a"));
    registry.register_node("b", RecordStep::new("b"));
    registry.register_graph(linear_spec("line", "a", "b")).unwrap();
    let (engine, _) = engine_with(Arc::clone(&registry));

    // Unknown thread.
    let err = engine
        .run("line", "ghost", RunInput::Resume(json!("yes")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoPendingInterrupt { .. }));

    // Completed thread.
    engine
        .run("line", "t1", RunInput::Start { message: "go".into() })
        .await
        .unwrap();
    let err = engine
        .run("line", "t1", RunInput::Resume(json!("yes")))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NoPendingInterrupt { .. }));
}

#[tokio::test]
async fn fan_out_merges_disjoint_analysis_at_the_barrier() {
    let registry = Arc::new(GraphRegistry::new());
    registry.register_node("a", RecordStep::new("a"));
    registry.register_node("left", Annotate::new("left", "west", json!(1)));
    registry.register_node("right", Annotate::new("right", "east", json!(2)));
    registry.register_node("join", RecordStep::new("join"));
    registry.register_graph(diamond_spec("diamond")).unwrap();

    let (engine, _) = engine_with(Arc::clone(&registry));
    let outcome = engine
        .run("diamond", "t1", RunInput::Start { message: "fan out".into() })
        .await
        .unwrap();

    match outcome {
        RunOutcome::Completed(state) => {
            // Barrier merge order follows spec node order.
            assert_eq!(state.steps, vec!["a", "left", "right", "join"]);
            assert_eq!(state.analysis.get("west"), Some(&json!(1)));
            assert_eq!(state.analysis.get("east"), Some(&json!(2)));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn interrupt_during_fan_out_keeps_sibling_updates() {
    let registry = Arc::new(GraphRegistry::new());
    registry.register_node("a", RecordStep::new("a"));
    registry.register_node("left", Annotate::new("left", "west", json!(1)));
    registry.register_node("right", Gate);
    registry.register_node("join", RecordStep::new("join"));
    registry.register_graph(diamond_spec("gated-diamond")).unwrap();

    let (engine, checkpointer) = engine_with(Arc::clone(&registry));
    let outcome = engine
        .run("gated-diamond", "t1", RunInput::Start { message: "go".into() })
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Suspended { ref node, .. } if node == "right"));

    // The completed sibling's partial survived the suspension.
    let saved = checkpointer.load("t1").await.unwrap().unwrap();
    assert_eq!(saved.state.analysis.get("west"), Some(&json!(1)));
    assert!(saved.executed.contains("left"));
    assert!(!saved.executed.contains("right"));

    let outcome = engine
        .run("gated-diamond", "t1", RunInput::Resume(json!("ship it")))
        .await
        .unwrap();
    match outcome {
        RunOutcome::Completed(state) => {
            assert_eq!(state.steps, vec!["a", "left", "gate", "join"]);
            assert_eq!(state.analysis.get("approval"), Some(&json!("ship it")));
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn retry_policy_is_exhausted_before_failing() {
    let registry = Arc::new(GraphRegistry::new());
    let flaky = Flaky::new("flaky", 2);
    let attempts = Arc::clone(&flaky.attempts);
    registry.register_node("flaky", flaky);
    registry.register_node("b", RecordStep::new("b"));
    registry.register_graph(linear_spec("retrying", "flaky", "b")).unwrap();
    registry
        .update_node_config("flaky", NodeConfig::default().with_retry(RetryPolicy::attempts(3)))
        .unwrap();

    let (engine, _) = engine_with(Arc::clone(&registry));
    let outcome = engine
        .run("retrying", "t1", RunInput::Start { message: "go".into() })
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(state) if state.steps == vec!["flaky", "b"]));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retry_exhaustion_fails_and_keeps_last_checkpoint() {
    let registry = Arc::new(GraphRegistry::new());
    registry.register_node("a", RecordStep::new("a"));
    let flaky = Flaky::new("flaky", 10);
    let attempts = Arc::clone(&flaky.attempts);
    registry.register_node("flaky", flaky);
    registry.register_graph(linear_spec("doomed", "a", "flaky")).unwrap();
    registry
        .update_node_config("flaky", NodeConfig::default().with_retry(RetryPolicy::attempts(2)))
        .unwrap();

    let (engine, checkpointer) = engine_with(Arc::clone(&registry));
    let err = engine
        .run("doomed", "t1", RunInput::Start { message: "go".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Node { ref node, .. } if node == "flaky"));
    assert_eq!(attempts.load(Ordering::SeqCst), 2);

    // The step that succeeded before the failure remains the resumable point.
    let saved = checkpointer.load("t1").await.unwrap().unwrap();
    assert_eq!(saved.state.steps, vec!["a"]);
    assert_eq!(saved.version, 1);
}

#[tokio::test]
async fn cancelled_token_stops_before_any_step() {
    let registry = Arc::new(GraphRegistry::new());
    registry.register_node("a", RecordStep::new("a"));
    registry.register_node("b", RecordStep::new("b"));
    registry.register_graph(linear_spec("line", "a", "b")).unwrap();

    let (engine, checkpointer) = engine_with(Arc::clone(&registry));
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = engine
        .run_with_cancel("line", "t1", RunInput::Start { message: "go".into() }, cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert!(checkpointer.load("t1").await.unwrap().is_none());
}

#[tokio::test]
async fn cancel_via_handle_stops_at_a_step_boundary() {
    let registry = Arc::new(GraphRegistry::new());
    registry.register_node(
        "slow",
        Slow { name: "slow", delay: Duration::from_millis(100) },
    );
    registry.register_node("b", RecordStep::new("b"));
    registry.register_graph(linear_spec("sluggish", "slow", "b")).unwrap();

    let (engine, checkpointer) = engine_with(Arc::clone(&registry));
    let (handle, events) =
        engine.run_streaming("sluggish", "t1", RunInput::Start { message: "go".into() });
    handle.cancel();
    let err = handle.join().await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));

    let events: Vec<_> = events.into_iter().collect();
    assert!(matches!(events.last(), Some(ExecutionEvent::Failed { .. })));
    // Nothing was checkpointed after the cancelled boundary.
    assert!(checkpointer.load("t1").await.unwrap().is_none());
}

#[tokio::test]
async fn new_message_on_completed_thread_walks_the_graph_again() {
    let registry = Arc::new(GraphRegistry::new());
    registry.register_node("a", RecordStep::new("a"));
    registry.register_node("b", RecordStep::new("b"));
    registry.register_graph(linear_spec("line", "a", "b")).unwrap();

    let (engine, _) = engine_with(Arc::clone(&registry));
    engine
        .run("line", "t1", RunInput::Start { message: "first".into() })
        .await
        .unwrap();
    let outcome = engine
        .run("line", "t1", RunInput::Start { message: "second".into() })
        .await
        .unwrap();

    match outcome {
        RunOutcome::Completed(state) => {
            assert_eq!(state.steps, vec!["a", "b", "a", "b"]);
            let user_texts: Vec<_> = state
                .messages
                .iter()
                .filter(|m| m.has_role("user"))
                .map(|m| m.content.as_str())
                .collect();
            assert_eq!(user_texts, vec!["first", "second"]);
        }
        other => panic!("expected completion, got {other:?}"),
    }
}

#[tokio::test]
async fn hot_swapped_node_config_applies_without_recompilation() {
    let registry = Arc::new(GraphRegistry::new());
    registry.register_node("report", ModelReporter);
    registry.register_node("b", RecordStep::new("b"));
    registry.register_graph(linear_spec("reporting", "report", "b")).unwrap();

    let (engine, _) = engine_with(Arc::clone(&registry));
    let outcome = engine
        .run("reporting", "t1", RunInput::Start { message: "go".into() })
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Completed(ref state) if state.analysis["model"] == json!("default-model")
    ));

    registry
        .update_node_config("report", NodeConfig::default().with_model("fancy-model"))
        .unwrap();
    let outcome = engine
        .run("reporting", "t2", RunInput::Start { message: "go".into() })
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RunOutcome::Completed(ref state) if state.analysis["model"] == json!("fancy-model")
    ));
}

/// Parks until both racing invocations have loaded the same checkpoint, so
/// exactly one of their saves must lose the version race.
#[derive(Clone)]
struct Rendezvous {
    barrier: Arc<tokio::sync::Barrier>,
}

#[async_trait]
impl Node for Rendezvous {
    async fn run(
        &self,
        _snapshot: StateSnapshot,
        _ctx: NodeContext,
    ) -> Result<NodeOutput, NodeError> {
        self.barrier.wait().await;
        Ok(NodeOutput::partial(
            StatePartial::new().with_steps(vec!["rendezvous".to_string()]),
        ))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_invocations_on_one_thread_cannot_both_save() {
    let registry = Arc::new(GraphRegistry::new());
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    registry.register_node("sync", Rendezvous { barrier });
    registry.register_node("b", RecordStep::new("b"));
    registry.register_graph(linear_spec("raced", "sync", "b")).unwrap();

    let (engine, _) = engine_with(Arc::clone(&registry));
    let (first, _e1) =
        engine.run_streaming("raced", "t1", RunInput::Start { message: "one".into() });
    let (second, _e2) =
        engine.run_streaming("raced", "t1", RunInput::Start { message: "two".into() });

    let results = [first.join().await, second.join().await];
    let conflicts = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(EngineError::Checkpoint(CheckpointError::VersionConflict { .. }))
            )
        })
        .count();
    let completions = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(conflicts, 1, "exactly one racer must lose the version check");
    assert_eq!(completions, 1);
}
