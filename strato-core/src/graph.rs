//! Graph - Dependency graph of resource declarations
//!
//! The graph is pure in-memory bookkeeping: `declare` and `add_dependency`
//! register typed nodes and explicit "must finish provisioning before" edges.
//! No side effects occur until the graph is handed to a provisioning engine.
//!
//! Edges are validated at insertion time. A cycle or a dangling handle is
//! rejected immediately and never deferred to submission, so a graph that
//! exists is valid by construction.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;

use crate::resource::{Resource, ResourceId};

/// Tag source distinguishing graphs, so a handle minted by one graph is
/// rejected by every other.
static NEXT_GRAPH_TAG: AtomicU64 = AtomicU64::new(0);

/// Handle to a declared resource node
///
/// Handles carry the tag of the graph that issued them; using one against a
/// different graph fails with [`GraphError::UnknownNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    graph: u64,
    index: usize,
}

/// Errors detectable locally at graph-construction time
///
/// Everything else (payload rejection, provisioning failures) is the
/// provisioning engine's to report.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A dependency edge references a node that was never declared here
    #[error("unknown node handle {0:?}: resource was never declared in this graph")]
    UnknownNode(NodeId),

    /// A resource cannot depend on itself
    #[error("{0} cannot depend on itself")]
    SelfDependency(ResourceId),

    /// The edge would close a dependency cycle
    #[error("dependency cycle: {}", format_cycle(.0))]
    Cycle(Vec<ResourceId>),

    /// An output name was exported twice
    #[error("output \"{0}\" is already exported")]
    DuplicateOutput(String),
}

fn format_cycle(path: &[ResourceId]) -> String {
    path.iter()
        .map(ResourceId::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A named value exposed after the engine realizes the graph
///
/// The attribute is an opaque string handle resolved by the engine; the graph
/// neither parses nor validates it.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub name: String,
    pub node: NodeId,
    pub attribute: String,
}

/// Directed acyclic graph of resource declarations
#[derive(Debug, Clone)]
pub struct Graph {
    /// Tag stamped into every handle this graph issues
    tag: u64,
    /// Nodes in declaration order
    nodes: Vec<Resource>,
    /// Logical identifier -> node handle
    index: HashMap<ResourceId, NodeId>,
    /// Node index -> direct dependencies, in insertion order
    dependencies: Vec<Vec<NodeId>>,
    outputs: Vec<Output>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            tag: NEXT_GRAPH_TAG.fetch_add(1, Ordering::Relaxed),
            nodes: Vec::new(),
            index: HashMap::new(),
            dependencies: Vec::new(),
            outputs: Vec::new(),
        }
    }

    fn handle(&self, index: usize) -> NodeId {
        NodeId {
            graph: self.tag,
            index,
        }
    }

    /// Register a typed resource node with its configuration payload
    ///
    /// The payload is opaque to the builder; no local validation is performed.
    /// Re-declaring an existing logical identifier deterministically replaces
    /// the prior configuration while keeping the node's handle and edges.
    pub fn declare(
        &mut self,
        kind: impl Into<String>,
        name: impl Into<String>,
        config: serde_json::Value,
    ) -> NodeId {
        let resource = Resource::new(kind, name, config);
        if let Some(&id) = self.index.get(&resource.id) {
            self.nodes[id.index] = resource;
            return id;
        }

        let id = self.handle(self.nodes.len());
        self.index.insert(resource.id.clone(), id);
        self.nodes.push(resource);
        self.dependencies.push(Vec::new());
        id
    }

    /// Record that `dependent` must not begin provisioning until `dependency`
    /// has finished
    ///
    /// Rejects dangling handles, self-edges, and edges that would close a
    /// cycle. Adding an edge that already exists is a no-op.
    pub fn add_dependency(&mut self, dependent: NodeId, dependency: NodeId) -> Result<(), GraphError> {
        self.check_handle(dependent)?;
        self.check_handle(dependency)?;

        if dependent == dependency {
            return Err(GraphError::SelfDependency(
                self.nodes[dependent.index].id.clone(),
            ));
        }
        if self.dependencies[dependent.index].contains(&dependency) {
            return Ok(());
        }

        // The path runs dependency -> ... -> dependent; prefixing the
        // dependent closes the loop for the report.
        if let Some(mut path) = self.path_between(dependency, dependent) {
            let mut cycle = vec![self.nodes[dependent.index].id.clone()];
            cycle.extend(path.drain(..).map(|id| self.nodes[id.index].id.clone()));
            return Err(GraphError::Cycle(cycle));
        }

        self.dependencies[dependent.index].push(dependency);
        Ok(())
    }

    /// Expose a named output resolved from a node attribute after realization
    pub fn export(
        &mut self,
        name: impl Into<String>,
        node: NodeId,
        attribute: impl Into<String>,
    ) -> Result<(), GraphError> {
        self.check_handle(node)?;
        let name = name.into();
        if self.outputs.iter().any(|o| o.name == name) {
            return Err(GraphError::DuplicateOutput(name));
        }
        self.outputs.push(Output {
            name,
            node,
            attribute: attribute.into(),
        });
        Ok(())
    }

    /// Look up the handle for a logical identifier
    pub fn lookup(&self, id: &ResourceId) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    /// Resource declaration behind a handle
    pub fn resource(&self, id: NodeId) -> Option<&Resource> {
        if id.graph != self.tag {
            return None;
        }
        self.nodes.get(id.index)
    }

    /// All nodes in declaration order
    pub fn nodes(&self) -> &[Resource] {
        &self.nodes
    }

    /// Direct dependencies of a node
    pub fn dependencies_of(&self, id: NodeId) -> &[NodeId] {
        if id.graph != self.tag {
            return &[];
        }
        self.dependencies
            .get(id.index)
            .map_or(&[], |deps| deps.as_slice())
    }

    /// Nodes that directly depend on `id`
    pub fn dependents_of(&self, id: NodeId) -> Vec<NodeId> {
        self.dependencies
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.contains(&id))
            .map(|(i, _)| self.handle(i))
            .collect()
    }

    /// Handles for all nodes, in declaration order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).map(|i| self.handle(i))
    }

    /// Total number of dependency edges
    pub fn edge_count(&self) -> usize {
        self.dependencies.iter().map(Vec::len).sum()
    }

    pub fn outputs(&self) -> &[Output] {
        &self.outputs
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Deterministic topological order over all declared nodes
    ///
    /// Kahn's algorithm with declaration order as the tie-break, so two builds
    /// of the same graph produce identical orderings. Every dependency is
    /// placed before its dependents. Construction rejects cycles, so ordering
    /// always covers the whole graph.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut pending: Vec<usize> = self.dependencies.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = pending
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(next) = ready.pop_first() {
            order.push(self.handle(next));
            for dependent in self.dependents_of(self.handle(next)) {
                pending[dependent.index] -= 1;
                if pending[dependent.index] == 0 {
                    ready.insert(dependent.index);
                }
            }
        }
        order
    }

    /// Re-check structural validity before submission
    ///
    /// Construction already rejects malformed edges, so this only guards
    /// against a graph assembled through clones of inconsistent provenance.
    pub fn validate(&self) -> Result<(), GraphError> {
        for deps in &self.dependencies {
            for &dep in deps {
                self.check_handle(dep)?;
            }
        }
        for output in &self.outputs {
            self.check_handle(output.node)?;
        }
        if self.topological_order().len() != self.nodes.len() {
            // Unreachable through the public API; reported as a generic cycle.
            return Err(GraphError::Cycle(Vec::new()));
        }
        Ok(())
    }

    fn check_handle(&self, id: NodeId) -> Result<(), GraphError> {
        if id.graph == self.tag && id.index < self.nodes.len() {
            Ok(())
        } else {
            Err(GraphError::UnknownNode(id))
        }
    }

    /// Path from `from` to `to` following dependency edges, if one exists
    fn path_between(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let mut visited = vec![false; self.nodes.len()];
        let mut path = Vec::new();
        if self.dfs_path(from, to, &mut visited, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn dfs_path(
        &self,
        current: NodeId,
        target: NodeId,
        visited: &mut [bool],
        path: &mut Vec<NodeId>,
    ) -> bool {
        if visited[current.index] {
            return false;
        }
        visited[current.index] = true;
        path.push(current);

        if current == target {
            return true;
        }
        for &dep in &self.dependencies[current.index] {
            if self.dfs_path(dep, target, visited, path) {
                return true;
            }
        }
        path.pop();
        false
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn position(order: &[NodeId], id: NodeId) -> usize {
        order.iter().position(|&n| n == id).unwrap()
    }

    #[test]
    fn declare_returns_stable_handles() {
        let mut graph = Graph::new();
        let vpc = graph.declare("ec2.vpc", "main", json!({}));
        let cluster = graph.declare("rds.cluster", "aurora", json!({}));

        assert_ne!(vpc, cluster);
        assert_eq!(graph.resource(vpc).unwrap().id.kind, "ec2.vpc");
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn redeclare_same_config_is_a_noop() {
        let mut graph = Graph::new();
        let first = graph.declare("ec2.vpc", "main", json!({"max_azs": 2}));
        let second = graph.declare("ec2.vpc", "main", json!({"max_azs": 2}));

        assert_eq!(first, second);
        assert_eq!(graph.len(), 1);
        assert_eq!(graph.resource(first).unwrap().config["max_azs"], 2);
    }

    #[test]
    fn redeclare_different_config_replaces_deterministically() {
        let mut graph = Graph::new();
        let vpc = graph.declare("ec2.vpc", "main", json!({"max_azs": 2}));
        let cluster = graph.declare("rds.cluster", "aurora", json!({}));
        graph.add_dependency(cluster, vpc).unwrap();

        let again = graph.declare("ec2.vpc", "main", json!({"max_azs": 3}));

        // Same handle, replaced payload, edges untouched.
        assert_eq!(vpc, again);
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.resource(vpc).unwrap().config["max_azs"], 3);
        assert_eq!(graph.dependencies_of(cluster), &[vpc]);
    }

    #[test]
    fn dangling_dependency_is_rejected() {
        let mut graph = Graph::new();
        let vpc = graph.declare("ec2.vpc", "main", json!({}));

        let mut other = Graph::new();
        other.declare("ec2.vpc", "a", json!({}));
        let stranger = other.declare("rds.cluster", "b", json!({}));

        let err = graph.add_dependency(vpc, stranger).unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode(_)));
    }

    #[test]
    fn foreign_handle_is_rejected_even_when_in_range() {
        let mut graph = Graph::new();
        let vpc = graph.declare("ec2.vpc", "main", json!({}));
        let cluster = graph.declare("rds.cluster", "aurora", json!({}));

        // Same shape as `graph`, so every foreign index is in range.
        let mut other = Graph::new();
        let other_vpc = other.declare("ec2.vpc", "main", json!({}));
        let other_cluster = other.declare("rds.cluster", "aurora", json!({}));

        let err = graph.add_dependency(cluster, other_vpc).unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode(_)));
        let err = graph.add_dependency(other_cluster, vpc).unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode(_)));

        assert!(graph.resource(other_vpc).is_none());
        assert!(graph.dependencies_of(cluster).is_empty());
    }

    #[test]
    fn self_dependency_is_rejected() {
        let mut graph = Graph::new();
        let vpc = graph.declare("ec2.vpc", "main", json!({}));

        let err = graph.add_dependency(vpc, vpc).unwrap_err();
        assert!(matches!(err, GraphError::SelfDependency(_)));
    }

    #[test]
    fn cycle_is_rejected_at_insertion() {
        let mut graph = Graph::new();
        let a = graph.declare("t", "a", json!({}));
        let b = graph.declare("t", "b", json!({}));
        let c = graph.declare("t", "c", json!({}));

        graph.add_dependency(a, b).unwrap();
        graph.add_dependency(b, c).unwrap();

        let err = graph.add_dependency(c, a).unwrap_err();
        match err {
            GraphError::Cycle(path) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected Cycle, got {other:?}"),
        }
        // The failed edge must not have been recorded.
        assert!(graph.dependencies_of(c).is_empty());
        assert!(graph.validate().is_ok());
    }

    #[test]
    fn duplicate_edge_is_idempotent() {
        let mut graph = Graph::new();
        let a = graph.declare("t", "a", json!({}));
        let b = graph.declare("t", "b", json!({}));

        graph.add_dependency(a, b).unwrap();
        graph.add_dependency(a, b).unwrap();

        assert_eq!(graph.dependencies_of(a), &[b]);
    }

    #[test]
    fn topological_order_respects_edges() {
        let mut graph = Graph::new();
        let vpc = graph.declare("ec2.vpc", "main", json!({}));
        let cluster = graph.declare("rds.cluster", "aurora", json!({}));
        let writer = graph.declare("rds.instance", "writer", json!({}));
        let patch = graph.declare("rds.scaling_patch", "scaling", json!({}));
        let reader = graph.declare("rds.instance", "serverless", json!({}));

        graph.add_dependency(cluster, vpc).unwrap();
        graph.add_dependency(writer, cluster).unwrap();
        graph.add_dependency(patch, cluster).unwrap();
        graph.add_dependency(patch, writer).unwrap();
        graph.add_dependency(reader, patch).unwrap();

        let order = graph.topological_order();
        assert_eq!(order.len(), 5);
        assert!(position(&order, vpc) < position(&order, cluster));
        assert!(position(&order, cluster) < position(&order, writer));
        assert!(position(&order, writer) < position(&order, patch));
        assert!(position(&order, patch) < position(&order, reader));
    }

    #[test]
    fn topological_order_is_deterministic() {
        let build = || {
            let mut graph = Graph::new();
            let root = graph.declare("t", "root", json!({}));
            for name in ["c", "a", "b"] {
                let leaf = graph.declare("t", name, json!({}));
                graph.add_dependency(leaf, root).unwrap();
            }
            graph
        };

        let names = |graph: &Graph| -> Vec<String> {
            graph
                .topological_order()
                .into_iter()
                .map(|id| graph.resource(id).unwrap().id.name.clone())
                .collect()
        };

        // Ties break by declaration order, not by name.
        assert_eq!(names(&build()), ["root", "c", "a", "b"]);
        assert_eq!(names(&build()), names(&build()));
    }

    #[test]
    fn export_rejects_duplicate_names_and_unknown_nodes() {
        let mut graph = Graph::new();
        let cluster = graph.declare("rds.cluster", "aurora", json!({}));

        graph.export("rdspass", cluster, "secret_arn").unwrap();
        let err = graph.export("rdspass", cluster, "secret_arn").unwrap_err();
        assert!(matches!(err, GraphError::DuplicateOutput(_)));

        let stranger = Graph::new().declare("rds.cluster", "aurora", json!({}));
        let err = graph.export("other", stranger, "id").unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode(_)));
    }
}
