//! Resource Dependency Graph
//!
//! Declarations become nodes; every reference becomes an edge from the
//! referenced resource to the resource that refers to it. Because a
//! reference may only name an already-declared resource, the graph is
//! acyclic by construction. The graph still offers:
//!
//! - Execution ordering (topological order)
//! - Dependency waves (resources that can be created concurrently)
//! - Dependency and dependent queries
//! - Cycle detection and DOT visualization

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;
use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resources::{Resource, ResourceKind};

/// An edge of the resource graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDependency {
    /// Referenced resource (created first)
    pub from: String,
    /// Referring resource (created after)
    pub to: String,
    /// Kind the reference expects
    pub expected: ResourceKind,
}

/// Graph of declared resources.
#[derive(Debug, Clone, Default)]
pub struct ResourceGraph {
    graph: DiGraph<Resource, ResourceDependency>,
    /// Logical name to node index, in declaration order
    node_indices: IndexMap<String, NodeIndex>,
}

impl ResourceGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource.
    ///
    /// Fails if the name is taken, or if any reference names an undeclared
    /// resource or a resource of the wrong kind. Nothing is added on failure.
    pub fn declare(&mut self, resource: Resource) -> Result<NodeIndex> {
        if self.node_indices.contains_key(&resource.name) {
            return Err(Error::DuplicateResource(resource.name));
        }

        let mut edges = Vec::new();
        for reference in resource.spec.references() {
            let from_idx = *self.node_indices.get(reference.target).ok_or_else(|| {
                Error::ForwardReference {
                    resource: resource.name.clone(),
                    target: reference.target.to_string(),
                }
            })?;

            let found = self.graph[from_idx].kind();
            if found != reference.expected {
                return Err(Error::ReferenceKind {
                    resource: resource.name.clone(),
                    target: reference.target.to_string(),
                    expected: reference.expected.as_str(),
                    found: found.as_str(),
                });
            }

            edges.push((
                from_idx,
                ResourceDependency {
                    from: reference.target.to_string(),
                    to: resource.name.clone(),
                    expected: reference.expected,
                },
            ));
        }

        let name = resource.name.clone();
        let idx = self.graph.add_node(resource);
        self.node_indices.insert(name, idx);

        for (from_idx, dependency) in edges {
            // Parallel edges (same target referenced twice) collapse into one.
            if self.graph.find_edge(from_idx, idx).is_none() {
                self.graph.add_edge(from_idx, idx, dependency);
            }
        }

        Ok(idx)
    }

    /// Get a resource by logical name.
    pub fn get(&self, name: &str) -> Option<&Resource> {
        self.node_indices.get(name).map(|idx| &self.graph[*idx])
    }

    /// Whether a logical name has been declared.
    pub fn contains(&self, name: &str) -> bool {
        self.node_indices.contains_key(name)
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.node_indices.values().map(|idx| &self.graph[*idx])
    }

    /// Resources of a given kind, in declaration order.
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &Resource> {
        self.resources().filter(move |r| r.kind() == kind)
    }

    /// Check for dependency cycles.
    pub fn has_cycles(&self) -> bool {
        !self.get_cycles().is_empty()
    }

    /// Get all cycles in the graph.
    pub fn get_cycles(&self) -> Vec<Vec<String>> {
        tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| scc.into_iter().map(|idx| self.graph[idx].name.clone()).collect())
            .collect()
    }

    /// Topological order of logical names.
    pub fn execution_order(&self) -> Result<Vec<String>> {
        toposort(&self.graph, None)
            .map(|order| {
                order
                    .into_iter()
                    .map(|idx| self.graph[idx].name.clone())
                    .collect()
            })
            .map_err(|cycle| {
                Error::DependencyCycle(format!(
                    "'{}' is part of a cycle",
                    self.graph[cycle.node_id()].name
                ))
            })
    }

    /// Group resources into waves.
    ///
    /// Every resource lands in the wave after the latest wave of its
    /// dependencies, so resources within a wave share no edge and can be
    /// created concurrently. Within a wave, declaration order is kept.
    pub fn waves(&self) -> Result<Vec<Vec<&Resource>>> {
        let order = toposort(&self.graph, None).map_err(|cycle| {
            Error::DependencyCycle(format!(
                "'{}' is part of a cycle",
                self.graph[cycle.node_id()].name
            ))
        })?;

        let mut level: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in order {
            let depth = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| level.get(&dep))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            level.insert(idx, depth);
        }

        let depth = level.values().copied().max().map_or(0, |d| d + 1);
        let mut waves: Vec<Vec<&Resource>> = vec![Vec::new(); depth];
        for idx in self.node_indices.values() {
            waves[level[idx]].push(&self.graph[*idx]);
        }

        Ok(waves)
    }

    /// Direct dependencies of a resource, in declaration order.
    pub fn direct_dependencies(&self, name: &str) -> Vec<String> {
        let Some(&idx) = self.node_indices.get(name) else {
            return Vec::new();
        };
        let deps: HashSet<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Incoming)
            .collect();
        self.node_indices
            .iter()
            .filter(|(_, i)| deps.contains(i))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// All dependencies of a resource (direct and transitive).
    pub fn get_dependencies(&self, name: &str) -> Vec<String> {
        self.walk(name, Direction::Incoming)
    }

    /// All dependents of a resource (direct and transitive).
    pub fn get_dependents(&self, name: &str) -> Vec<String> {
        self.walk(name, Direction::Outgoing)
    }

    fn walk(&self, name: &str, direction: Direction) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();

        if let Some(&start_idx) = self.node_indices.get(name) {
            queue.push_back(start_idx);

            while let Some(current) = queue.pop_front() {
                for neighbor in self.graph.neighbors_directed(current, direction) {
                    if seen.insert(neighbor) {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        // Report in declaration order for stable output
        self.node_indices
            .iter()
            .filter(|(_, idx)| seen.contains(idx))
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// Get the number of resources.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Get the number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Generate a DOT format representation for visualization.
    pub fn to_dot(&self) -> String {
        let mut output = String::new();
        output.push_str("digraph stack {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box];\n\n");

        for resource in self.resources() {
            output.push_str(&format!(
                "  \"{}\" [label=\"{}\\n{}\"];\n",
                resource.name,
                resource.name,
                resource.kind()
            ));
        }

        output.push('\n');

        for edge in self.graph.edge_references() {
            let source = &self.graph[edge.source()].name;
            let target = &self.graph[edge.target()].name;
            output.push_str(&format!("  \"{}\" -> \"{}\";\n", source, target));
        }

        output.push_str("}\n");
        output
    }
}
