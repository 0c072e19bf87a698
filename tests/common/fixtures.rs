use std::sync::Arc;

use flowloom::graph::{GraphSpec, NodeRef};
use flowloom::llm::EchoLanguageModel;
use flowloom::registry::GraphRegistry;
use flowloom::runtime::checkpoint::InMemoryCheckpointer;
use flowloom::runtime::engine::Engine;

/// Engine over a fresh in-memory checkpoint store, sharing the given
/// registry. Returns the store so tests can inspect saved checkpoints.
pub fn engine_with(registry: Arc<GraphRegistry>) -> (Engine, Arc<InMemoryCheckpointer>) {
    let checkpointer = Arc::new(InMemoryCheckpointer::new());
    let engine = Engine::new(
        registry,
        Arc::clone(&checkpointer) as Arc<dyn flowloom::runtime::checkpoint::Checkpointer>,
        Arc::new(EchoLanguageModel),
    );
    (engine, checkpointer)
}

/// `start -> a -> b -> end` over the default schema.
pub fn linear_spec(name: &str, a: &str, b: &str) -> GraphSpec {
    GraphSpec::new(name, "default")
        .with_node(a)
        .with_node(b)
        .with_edge(NodeRef::Start, a)
        .with_edge(a, b)
        .with_edge(b, NodeRef::End)
}

/// Diamond fan-out: `start -> a -> {left, right} -> join -> end`.
pub fn diamond_spec(name: &str) -> GraphSpec {
    GraphSpec::new(name, "concurrent-research")
        .with_node("a")
        .with_node("left")
        .with_node("right")
        .with_node("join")
        .with_edge(NodeRef::Start, "a")
        .with_edge("a", "left")
        .with_edge("a", "right")
        .with_edge("left", "join")
        .with_edge("right", "join")
        .with_edge("join", NodeRef::End)
}
