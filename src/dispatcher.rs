//! Top-level control flow: inbound message to streamed execution.
//!
//! The dispatcher is the surface an HTTP or CLI shell talks to. It routes a
//! message to a graph type, resolves the user's thread for that type, and
//! hands the invocation to the engine, returning the event stream.

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::graph::GraphSpec;
use crate::llm::LanguageModel;
use crate::node::NodeConfig;
use crate::registry::{GraphRegistry, RegistryError};
use crate::router::{Router, RouterConfig};
use crate::runtime::checkpoint::Checkpointer;
use crate::runtime::engine::{Engine, EngineError, InvocationHandle, RunInput};
use crate::runtime::events::ExecutionEvent;
use crate::threads::ThreadManager;

#[derive(Debug, Error, Diagnostic)]
pub enum DispatcherError {
    #[error("no graphs registered; nothing to route to")]
    #[diagnostic(
        code(flowloom::dispatcher::no_graphs),
        help("Register at least one graph before dispatching messages.")
    )]
    NoGraphsRegistered,

    #[error("unknown thread '{thread_id}' for user '{user_id}'")]
    #[diagnostic(code(flowloom::dispatcher::unknown_thread))]
    UnknownThread { user_id: String, thread_id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

/// A dispatched invocation: where it landed plus its live stream.
pub struct DispatchedRun {
    pub graph_type: String,
    pub thread_id: String,
    pub root_id: String,
    /// True when this message minted the thread.
    pub thread_created: bool,
    pub handle: InvocationHandle,
    pub events: flume::Receiver<ExecutionEvent>,
}

/// Owns the registry, router, thread store, and engine as one unit.
pub struct Dispatcher {
    registry: Arc<GraphRegistry>,
    threads: Arc<ThreadManager>,
    router: Router,
    engine: Engine,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: Arc<GraphRegistry>,
        checkpointer: Arc<dyn Checkpointer>,
        language_model: Arc<dyn LanguageModel>,
        router_config: RouterConfig,
    ) -> Self {
        let engine = Engine::new(
            Arc::clone(&registry),
            checkpointer,
            language_model,
        );
        Self {
            registry,
            threads: Arc::new(ThreadManager::new()),
            router: Router::new(router_config),
            engine,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<GraphRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn threads(&self) -> &Arc<ThreadManager> {
        &self.threads
    }

    /// Register or replace a graph spec. Passthrough to the registry,
    /// exposed here so a shell needs only the dispatcher.
    pub fn register_graph(&self, spec: GraphSpec) -> Result<(), DispatcherError> {
        self.registry.register_graph(spec)?;
        Ok(())
    }

    /// Hot-swap a node's runtime configuration.
    pub fn update_node_config(
        &self,
        node: &str,
        config: NodeConfig,
    ) -> Result<(), DispatcherError> {
        self.registry.update_node_config(node, config)?;
        Ok(())
    }

    /// Pick the graph type for a message without executing anything.
    pub fn route(&self, user_id: &str, message: &str) -> Result<String, DispatcherError> {
        let vocabulary = self.registry.selection_vocabulary();
        let history = self.threads.summarize_by_graph_type(user_id);
        self.router
            .route(message, &vocabulary, &history, Utc::now())
            .ok_or(DispatcherError::NoGraphsRegistered)
    }

    /// Route a message, resolve the user's thread, and start execution.
    #[instrument(skip(self, message), err)]
    pub fn dispatch(&self, user_id: &str, message: &str) -> Result<DispatchedRun, DispatcherError> {
        let graph_type = self.route(user_id, message)?;
        let resolved = self.threads.resolve_thread(user_id, &graph_type);
        tracing::info!(
            graph = %graph_type,
            thread_id = %resolved.thread_id,
            created = resolved.created,
            "message dispatched"
        );

        let (handle, events) = self.engine.run_streaming(
            &graph_type,
            &resolved.thread_id,
            RunInput::Start {
                message: message.to_string(),
            },
        );
        Ok(DispatchedRun {
            graph_type,
            thread_id: resolved.thread_id,
            root_id: resolved.root_id,
            thread_created: resolved.created,
            handle,
            events,
        })
    }

    /// Answer a pending interrupt on one of the user's threads.
    #[instrument(skip(self, response), err)]
    pub fn resume(
        &self,
        user_id: &str,
        thread_id: &str,
        response: Value,
    ) -> Result<DispatchedRun, DispatcherError> {
        let record = self.threads.record(user_id, thread_id).ok_or_else(|| {
            DispatcherError::UnknownThread {
                user_id: user_id.to_string(),
                thread_id: thread_id.to_string(),
            }
        })?;
        self.threads.touch(user_id, thread_id);

        let (handle, events) =
            self.engine
                .run_streaming(&record.graph_type, thread_id, RunInput::Resume(response));
        Ok(DispatchedRun {
            graph_type: record.graph_type,
            thread_id: record.thread_id,
            root_id: record.root_id,
            thread_created: false,
            handle,
            events,
        })
    }
}
