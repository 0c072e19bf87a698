//! Registry of node implementations and graph specifications.
//!
//! Registration is cheap: specs are validated and stored, but compilation is
//! deferred until a graph is first invoked, then cached. Re-registering a
//! graph invalidates its cached compiled form so hot-swapped specs take
//! effect on the next compile; node-config edits skip compilation entirely.

use std::sync::{Arc, RwLock};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::instrument;

use crate::graph::{CompiledGraph, GraphSpec};
use crate::node::{Node, NodeConfig};
use crate::schema::StateSchema;

#[derive(Debug, Error, Diagnostic)]
pub enum RegistryError {
    #[error("graph '{graph}' references unresolved node '{node}'")]
    #[diagnostic(
        code(flowloom::registry::unresolved_node),
        help("Register the node implementation, or fix the edge/node list in the spec.")
    )]
    UnresolvedNode { graph: String, node: String },

    #[error("no graph registered under name '{0}'")]
    #[diagnostic(code(flowloom::registry::graph_not_found))]
    GraphNotFound(String),

    #[error("no node registered under name '{0}'")]
    #[diagnostic(code(flowloom::registry::node_not_found))]
    NodeNotFound(String),
}

#[derive(Default)]
struct Inner {
    nodes: FxHashMap<String, Arc<dyn Node>>,
    node_configs: FxHashMap<String, NodeConfig>,
    specs: FxHashMap<String, GraphSpec>,
    /// Registration order of graph names; the router's documented tie-break.
    order: Vec<String>,
    compiled: FxHashMap<String, Arc<CompiledGraph>>,
}

/// Shared, internally-locked registry.
///
/// The registry is an explicit owned store passed into the engine and
/// dispatcher, never ambient state, so lifecycle and test isolation stay
/// explicit. All mutation paths (`register_node`, `register_graph`,
/// `update_node_config`) work on a live, shared registry.
#[derive(Default)]
pub struct GraphRegistry {
    inner: RwLock<Inner>,
}

impl GraphRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a callable under a node name. Re-registration replaces the
    /// callable; graphs already compiled keep their compile-time snapshot
    /// until recompiled.
    pub fn register_node(&self, name: &str, node: impl Node + 'static) {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        inner.nodes.insert(name.to_string(), Arc::new(node));
        inner
            .node_configs
            .entry(name.to_string())
            .or_insert_with(NodeConfig::default);
    }

    /// Validate and store a graph spec, invalidating any cached compiled
    /// graph under the same name. Does not compile eagerly.
    #[instrument(skip(self, spec), fields(graph = %spec.name), err)]
    pub fn register_graph(&self, spec: GraphSpec) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        spec.validate(&inner.nodes)?;

        let name = spec.name.clone();
        if !inner.order.contains(&name) {
            inner.order.push(name.clone());
        }
        inner.compiled.remove(&name);
        inner.specs.insert(name, spec);
        Ok(())
    }

    /// Cached compiled graph, compiling and caching on first use.
    #[instrument(skip(self), err)]
    pub fn compiled(&self, name: &str) -> Result<Arc<CompiledGraph>, RegistryError> {
        {
            let inner = self.inner.read().expect("registry lock poisoned");
            if let Some(compiled) = inner.compiled.get(name) {
                return Ok(Arc::clone(compiled));
            }
        }
        let mut inner = self.inner.write().expect("registry lock poisoned");
        // Re-check under the write lock; another caller may have compiled.
        if let Some(compiled) = inner.compiled.get(name) {
            return Ok(Arc::clone(compiled));
        }
        let spec = inner
            .specs
            .get(name)
            .ok_or_else(|| RegistryError::GraphNotFound(name.to_string()))?;
        let compiled = Arc::new(CompiledGraph::compile(spec, &inner.nodes)?);
        inner.compiled.insert(name.to_string(), Arc::clone(&compiled));
        tracing::debug!(graph = %name, "graph compiled and cached");
        Ok(compiled)
    }

    /// Selection-word sets per graph name, in registration order.
    #[must_use]
    pub fn selection_vocabulary(&self) -> Vec<(String, Vec<String>)> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .order
            .iter()
            .filter_map(|name| {
                inner
                    .specs
                    .get(name)
                    .map(|spec| (name.clone(), spec.selection_words.clone()))
            })
            .collect()
    }

    /// State schema declared by a registered graph.
    #[must_use]
    pub fn graph_schema(&self, name: &str) -> Option<StateSchema> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .specs
            .get(name)
            .map(|spec| StateSchema::from_name(&spec.schema))
    }

    /// Hot-swap a node's runtime configuration. Never touches graph shape or
    /// the compiled cache.
    #[instrument(skip(self, config), err)]
    pub fn update_node_config(&self, name: &str, config: NodeConfig) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if !inner.nodes.contains_key(name) {
            return Err(RegistryError::NodeNotFound(name.to_string()));
        }
        inner.node_configs.insert(name.to_string(), config);
        Ok(())
    }

    /// Current config for a node, read at dispatch time by the engine.
    /// Unregistered or unconfigured nodes get the default config.
    #[must_use]
    pub fn node_config(&self, name: &str) -> NodeConfig {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.node_configs.get(name).cloned().unwrap_or_default()
    }
}
