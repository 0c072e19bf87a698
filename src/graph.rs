//! Graph specifications and their compiled, executable form.
//!
//! A [`GraphSpec`] is declarative data (serde-friendly, arrives already
//! parsed from configuration). Compilation validates every edge endpoint
//! against the spec's node set and the node registry, then freezes the
//! topology into an immutable [`CompiledGraph`] the engine walks.

use std::fmt;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::registry::RegistryError;
use crate::schema::StateSchema;

/// An edge endpoint: a named node or one of the virtual sentinels.
///
/// `Start` and `End` are structural only: they are never executed and never
/// registered. Every graph's first edges leave `Start`; a walk completes when
/// only `End` remains reachable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    Start,
    End,
    Node(String),
}

impl NodeRef {
    /// Persisted string form: `"Start"`, `"End"`, or `"Node:<name>"`.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Start => "Start".to_string(),
            Self::End => "End".to_string(),
            Self::Node(name) => format!("Node:{name}"),
        }
    }

    /// Inverse of [`encode`](Self::encode). Unrecognized forms decode as a
    /// node name, which keeps old persisted data loadable.
    #[must_use]
    pub fn decode(s: &str) -> Self {
        if s == "Start" {
            Self::Start
        } else if s == "End" {
            Self::End
        } else if let Some(rest) = s.strip_prefix("Node:") {
            Self::Node(rest.to_string())
        } else {
            Self::Node(s.to_string())
        }
    }

    #[must_use]
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::Node(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "Start"),
            Self::End => write!(f, "End"),
            Self::Node(name) => write!(f, "{name}"),
        }
    }
}

impl From<&str> for NodeRef {
    fn from(s: &str) -> Self {
        match s {
            "Start" => Self::Start,
            "End" => Self::End,
            other => Self::Node(other.to_string()),
        }
    }
}

/// One directed edge of a graph spec.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeRef,
    pub to: NodeRef,
}

/// Declarative graph specification.
///
/// # Examples
///
/// ```
/// use flowloom::graph::{GraphSpec, NodeRef};
///
/// let spec = GraphSpec::new("research", "sequential-research")
///     .with_node("plan")
///     .with_node("gather")
///     .with_edge(NodeRef::Start, "plan")
///     .with_edge("plan", "gather")
///     .with_edge("gather", NodeRef::End)
///     .with_selection_words(["research", "#deep-dive"]);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GraphSpec {
    pub name: String,
    /// State schema name, resolved leniently via [`StateSchema::from_name`].
    pub schema: String,
    /// Ordered node names. Order is load-bearing: it fixes frontier and
    /// barrier-merge order for reproducible execution.
    pub nodes: Vec<String>,
    pub edges: Vec<Edge>,
    /// Words the router scores this graph on. A leading marker character
    /// (see `RouterConfig::keyword_marker`) makes a word a high-value keyword.
    #[serde(default)]
    pub selection_words: Vec<String>,
}

impl GraphSpec {
    #[must_use]
    pub fn new(name: &str, schema: &str) -> Self {
        Self {
            name: name.to_string(),
            schema: schema.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            selection_words: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_node(mut self, name: &str) -> Self {
        self.nodes.push(name.to_string());
        self
    }

    #[must_use]
    pub fn with_edge(mut self, from: impl Into<NodeRef>, to: impl Into<NodeRef>) -> Self {
        self.edges.push(Edge {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    #[must_use]
    pub fn with_selection_words<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection_words = words.into_iter().map(Into::into).collect();
        self
    }

    /// Check that every non-sentinel edge endpoint names a node in this
    /// spec's node set and that every node resolves in the registry. This is
    /// the cheap registration-time check; adjacency is built lazily at
    /// compile time.
    pub(crate) fn validate(
        &self,
        registered: &FxHashMap<String, Arc<dyn Node>>,
    ) -> Result<(), RegistryError> {
        let node_set: FxHashSet<&str> = self.nodes.iter().map(String::as_str).collect();
        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if let Some(name) = endpoint.node_name()
                    && !node_set.contains(name)
                {
                    return Err(RegistryError::UnresolvedNode {
                        graph: self.name.clone(),
                        node: name.to_string(),
                    });
                }
            }
        }
        for name in &self.nodes {
            if !registered.contains_key(name) {
                return Err(RegistryError::UnresolvedNode {
                    graph: self.name.clone(),
                    node: name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Immutable executable form of a [`GraphSpec`].
///
/// Holds a snapshot of the node callables taken at compile time: later
/// re-registration of a node under the same name does not affect an already
/// compiled graph until its spec is recompiled.
#[derive(Clone)]
pub struct CompiledGraph {
    name: String,
    schema: StateSchema,
    nodes: FxHashMap<String, Arc<dyn Node>>,
    /// Spec node order; frontier iteration follows it.
    order: Vec<String>,
    predecessors: FxHashMap<String, Vec<NodeRef>>,
    successors: FxHashMap<NodeRef, Vec<NodeRef>>,
}

impl CompiledGraph {
    /// Re-validate a spec against the registered node set and freeze it.
    ///
    /// Fails with [`RegistryError::UnresolvedNode`] when an edge endpoint
    /// names a node outside the spec's node set, or when a spec node has no
    /// registered implementation (possible if the node set changed between
    /// registration and first invocation).
    pub(crate) fn compile(
        spec: &GraphSpec,
        registered: &FxHashMap<String, Arc<dyn Node>>,
    ) -> Result<Self, RegistryError> {
        spec.validate(registered)?;

        let mut nodes = FxHashMap::default();
        for name in &spec.nodes {
            let node = registered
                .get(name)
                .ok_or_else(|| RegistryError::UnresolvedNode {
                    graph: spec.name.clone(),
                    node: name.clone(),
                })?;
            nodes.insert(name.clone(), Arc::clone(node));
        }

        let mut predecessors: FxHashMap<String, Vec<NodeRef>> = FxHashMap::default();
        let mut successors: FxHashMap<NodeRef, Vec<NodeRef>> = FxHashMap::default();
        for edge in &spec.edges {
            successors
                .entry(edge.from.clone())
                .or_default()
                .push(edge.to.clone());
            if let Some(to) = edge.to.node_name() {
                predecessors
                    .entry(to.to_string())
                    .or_default()
                    .push(edge.from.clone());
            }
        }

        Ok(Self {
            name: spec.name.clone(),
            schema: StateSchema::from_name(&spec.schema),
            nodes,
            order: spec.nodes.clone(),
            predecessors,
            successors,
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn schema(&self) -> StateSchema {
        self.schema
    }

    #[must_use]
    pub fn node(&self, name: &str) -> Option<Arc<dyn Node>> {
        self.nodes.get(name).map(Arc::clone)
    }

    #[must_use]
    pub fn successors(&self, from: &NodeRef) -> &[NodeRef] {
        self.successors.get(from).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Topological frontier: nodes not yet executed whose predecessors are
    /// all `Start` or already executed. Order follows the spec's node order,
    /// which keeps fan-out dispatch and barrier merges deterministic.
    #[must_use]
    pub fn frontier(&self, executed: &FxHashSet<String>) -> Vec<String> {
        self.order
            .iter()
            .filter(|name| !executed.contains(*name))
            .filter(|name| {
                self.predecessors
                    .get(*name)
                    .map(Vec::as_slice)
                    .unwrap_or(&[])
                    .iter()
                    .all(|pred| match pred {
                        NodeRef::Start => true,
                        NodeRef::End => false,
                        NodeRef::Node(p) => executed.contains(p),
                    })
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ref_encode_decode_round_trip() {
        for node_ref in [
            NodeRef::Start,
            NodeRef::End,
            NodeRef::Node("gather".to_string()),
        ] {
            assert_eq!(NodeRef::decode(&node_ref.encode()), node_ref);
        }
        // Legacy/unknown forms decode as plain node names.
        assert_eq!(NodeRef::decode("gather"), NodeRef::Node("gather".to_string()));
    }

    #[test]
    fn spec_builder_accumulates_shape() {
        let spec = GraphSpec::new("g", "default")
            .with_node("a")
            .with_node("b")
            .with_edge(NodeRef::Start, "a")
            .with_edge("a", "b")
            .with_edge("b", NodeRef::End)
            .with_selection_words(["alpha", "#beta"]);
        assert_eq!(spec.nodes, vec!["a", "b"]);
        assert_eq!(spec.edges.len(), 3);
        assert_eq!(spec.selection_words, vec!["alpha", "#beta"]);
    }

    #[test]
    fn spec_deserializes_from_config_json() {
        let spec: GraphSpec = serde_json::from_str(
            r#"{
                "name": "research",
                "schema": "sequential-research",
                "nodes": ["plan", "gather"],
                "edges": [
                    {"from": "Start", "to": {"Node": "plan"}},
                    {"from": {"Node": "plan"}, "to": {"Node": "gather"}},
                    {"from": {"Node": "gather"}, "to": "End"}
                ],
                "selection_words": ["research"]
            }"#,
        )
        .unwrap();
        assert_eq!(spec.name, "research");
        assert_eq!(spec.edges[0].from, NodeRef::Start);
        assert_eq!(spec.edges[2].to, NodeRef::End);
    }
}
