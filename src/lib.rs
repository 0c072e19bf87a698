//! # Flowloom: graph-driven workflow execution
//!
//! Flowloom runs declaratively-specified multi-step workflows ("graphs")
//! against a typed shared state. Parallel branches merge deterministically
//! through per-field reducers, gate nodes suspend execution until a human
//! supplies input, and every thread resumes from its last checkpoint.
//!
//! ## Core concepts
//!
//! - **Nodes**: async units of work that read a state snapshot and return a
//!   partial update, or request an interrupt ([`node`])
//! - **State**: a concrete [`schema::WorkflowState`] whose fields each carry
//!   a merge rule ([`reducers`])
//! - **Graphs**: named node/edge specifications compiled lazily and cached
//!   by the [`registry::GraphRegistry`]
//! - **Engine**: the per-thread state machine that walks the topological
//!   frontier, fans out, barriers at fan-in, and checkpoints ([`runtime`])
//! - **Router**: the scoring function that picks which graph type handles an
//!   inbound message ([`router`])
//! - **Threads**: one running/suspended/completed graph instance per
//!   `(user, graph type)`, tracked by the [`threads::ThreadManager`]
//!
//! ## Quick start
//!
//! ```
//! use flowloom::graph::{GraphSpec, NodeRef};
//! use flowloom::node::{Node, NodeContext, NodeError, NodeOutput};
//! use flowloom::registry::GraphRegistry;
//! use flowloom::schema::{StatePartial, StateSnapshot};
//! use async_trait::async_trait;
//!
//! struct Hello;
//!
//! #[async_trait]
//! impl Node for Hello {
//!     async fn run(&self, _: StateSnapshot, _: NodeContext) -> Result<NodeOutput, NodeError> {
//!         Ok(NodeOutput::partial(StatePartial::new().with_steps(vec!["hello".into()])))
//!     }
//! }
//!
//! let registry = GraphRegistry::new();
//! registry.register_node("hello", Hello);
//! registry
//!     .register_graph(
//!         GraphSpec::new("greeter", "default")
//!             .with_node("hello")
//!             .with_edge(NodeRef::Start, "hello")
//!             .with_edge("hello", NodeRef::End),
//!     )
//!     .unwrap();
//! ```
//!
//! Execution goes through [`runtime::Engine`] (one graph, one thread id) or
//! the [`dispatcher::Dispatcher`], which routes an inbound user message to a
//! graph type, resolves the thread, and streams step events back.

pub mod dispatcher;
pub mod graph;
pub mod llm;
pub mod message;
pub mod node;
pub mod reducers;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod schema;
pub mod telemetry;
pub mod threads;
