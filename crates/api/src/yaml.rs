// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! YAML filter graph formats and their compilation.
//!
//! This module provides user-friendly formats that compile to [`FilterGraphSpec`].
//! Supports two formats:
//! - **Steps**: Linear chain (`steps: [...]`), wrapped between the implicit `in`
//!   source and `out` sink
//! - **DAG**: Named nodes (`nodes: {...}`) with `needs: [...]` dependencies. `in`
//!   is always available as a dependency; the single terminal node feeds `out`.

use crate::graph::{FilterGraphSpec, FilterNodeSpec, Link, SINK_KIND, SINK_NAME, SOURCE_KIND, SOURCE_NAME};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Represents a single step in a linear filter chain.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Step {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Represents a single node in a user-facing DAG definition.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct UserNode {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    #[serde(default)]
    pub needs: Needs,
}

/// A single dependency, optionally selecting an output port of the upstream node.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum NeedsDependency {
    /// Simple string: just the node name (output port 0)
    Simple(String),
    /// Object with node name and output port
    WithPort {
        node: String,
        #[serde(default)]
        port: usize,
    },
}

impl NeedsDependency {
    fn node(&self) -> &str {
        match self {
            Self::Simple(s) => s,
            Self::WithPort { node, .. } => node,
        }
    }

    const fn port(&self) -> usize {
        match self {
            Self::Simple(_) => 0,
            Self::WithPort { port, .. } => *port,
        }
    }
}

/// Represents the `needs` field for DAG nodes. List order is input port order.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(untagged)]
pub enum Needs {
    #[default]
    None,
    Single(NeedsDependency),
    Multiple(Vec<NeedsDependency>),
}

impl Needs {
    fn dependencies(&self) -> Vec<&NeedsDependency> {
        match self {
            Self::None => vec![],
            Self::Single(dep) => vec![dep],
            Self::Multiple(deps) => deps.iter().collect(),
        }
    }
}

/// A user-facing filter graph definition.
/// `serde(untagged)` allows it to be parsed as either a steps-based
/// chain or a nodes-based (DAG) graph.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum UserGraph {
    Steps { steps: Vec<Step> },
    Dag { nodes: IndexMap<String, UserNode> },
}

/// "Compiles" the user-facing format into the explicit graph form.
///
/// # Errors
///
/// Returns an error if a node references a non-existent dependency, if the
/// dependencies form a cycle, or if the DAG has no single terminal node.
pub fn compile(graph: UserGraph) -> Result<FilterGraphSpec, String> {
    match graph {
        UserGraph::Steps { steps } => Ok(compile_steps(steps)),
        UserGraph::Dag { nodes } => compile_dag(nodes),
    }
}

/// Compiles the simplified `steps` list into a chain.
fn compile_steps(steps: Vec<Step>) -> FilterGraphSpec {
    FilterGraphSpec::chain(
        steps
            .into_iter()
            .map(|step| FilterNodeSpec { kind: step.kind, params: step.params })
            .collect(),
    )
}

/// Detect cycles in the dependency graph using DFS.
///
/// Returns an error message describing the cycle if one is found.
fn detect_cycles(user_nodes: &IndexMap<String, UserNode>) -> Result<(), String> {
    use std::collections::HashSet;

    // DFS helper function - defined first to satisfy items_after_statements lint
    fn dfs<'a>(
        node: &'a String,
        adjacency: &IndexMap<&'a String, Vec<&'a String>>,
        visited: &mut HashSet<&'a String>,
        rec_stack: &mut HashSet<&'a String>,
        cycle_path: &mut Vec<&'a String>,
    ) -> Option<String> {
        visited.insert(node);
        rec_stack.insert(node);
        cycle_path.push(node);

        if let Some(neighbors) = adjacency.get(node) {
            for neighbor in neighbors {
                if !visited.contains(neighbor) {
                    if let Some(cycle) = dfs(neighbor, adjacency, visited, rec_stack, cycle_path) {
                        return Some(cycle);
                    }
                } else if rec_stack.contains(neighbor) {
                    let cycle_start_idx =
                        cycle_path.iter().position(|&n| n == *neighbor).unwrap_or(0);
                    let cycle_strs: Vec<&str> =
                        cycle_path[cycle_start_idx..].iter().map(|s| s.as_str()).collect();
                    return Some(format!(
                        "Circular dependency detected: {} -> {}",
                        cycle_strs.join(" -> "),
                        neighbor
                    ));
                }
            }
        }

        rec_stack.remove(node);
        cycle_path.pop();
        None
    }

    // If A needs B there is an edge B -> A in the data flow graph
    let mut adjacency: IndexMap<&String, Vec<&String>> = IndexMap::new();
    for (node_name, node_def) in user_nodes {
        adjacency.entry(node_name).or_default();
        for dep in node_def.needs.dependencies() {
            if let Some((key, _)) = user_nodes.get_key_value(dep.node()) {
                adjacency.entry(key).or_default().push(node_name);
            }
        }
    }

    let mut visited: HashSet<&String> = HashSet::new();
    let mut rec_stack: HashSet<&String> = HashSet::new();
    let mut cycle_path: Vec<&String> = Vec::new();

    for node_name in user_nodes.keys() {
        if !visited.contains(node_name) {
            if let Some(cycle_error) =
                dfs(node_name, &adjacency, &mut visited, &mut rec_stack, &mut cycle_path)
            {
                return Err(cycle_error);
            }
        }
    }

    Ok(())
}

/// Compiles the `nodes` map (DAG) into an explicit graph.
fn compile_dag(mut user_nodes: IndexMap<String, UserNode>) -> Result<FilterGraphSpec, String> {
    if !user_nodes.contains_key(SOURCE_NAME) {
        user_nodes.shift_insert(
            0,
            SOURCE_NAME.to_string(),
            UserNode { kind: SOURCE_KIND.to_string(), params: None, needs: Needs::None },
        );
    }

    detect_cycles(&user_nodes)?;

    let mut links = Vec::new();
    for (node_name, node_def) in &user_nodes {
        for (idx, dep) in node_def.needs.dependencies().into_iter().enumerate() {
            let dep_name = dep.node();

            // Validate that the referenced node exists
            if !user_nodes.contains_key(dep_name) {
                return Err(format!(
                    "Node '{node_name}' references non-existent node '{dep_name}' in 'needs' field"
                ));
            }

            links.push(Link::new(dep_name, dep.port(), node_name, idx));
        }
    }

    let has_sink = user_nodes.values().any(|n| n.kind == SINK_KIND);
    if !has_sink {
        let terminals: Vec<&String> = user_nodes
            .keys()
            .filter(|name| !links.iter().any(|l| &l.from == *name))
            .collect();
        let [terminal] = terminals.as_slice() else {
            return Err(format!(
                "Graph must have exactly one terminal node to feed '{SINK_NAME}', found {}: [{}]",
                terminals.len(),
                terminals.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
            ));
        };
        links.push(Link::new(terminal, 0, SINK_NAME, 0));
        user_nodes.insert(
            SINK_NAME.to_string(),
            UserNode { kind: SINK_KIND.to_string(), params: None, needs: Needs::None },
        );
    }

    let nodes = user_nodes
        .into_iter()
        .map(|(name, def)| (name, FilterNodeSpec { kind: def.kind, params: def.params }))
        .collect();

    Ok(FilterGraphSpec { nodes, links })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_steps_compile_to_chain() {
        let yaml = r"
steps:
  - kind: scale
    params: { width: 4, height: 2 }
  - kind: fps
    params: { fps: 15 }
";
        let user_graph: UserGraph = serde_saphyr::from_str(yaml).unwrap();
        let graph = compile(user_graph).unwrap();
        assert_eq!(graph.nodes.len(), 4);
        assert_eq!(graph.nodes["in"].kind, "buffer");
        assert_eq!(graph.nodes["step_1"].kind, "fps");
        assert_eq!(graph.links.last(), Some(&Link::new("step_1", 0, "out", 0)));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_dag_needs_order_is_port_order() {
        let yaml = r"
nodes:
  split:
    kind: split
    needs: in
  shrink:
    kind: scale
    params: { width: 2, height: 2 }
    needs: { node: split, port: 1 }
  overlay:
    kind: overlay
    needs: [ split, shrink ]
";
        let user_graph: UserGraph = serde_saphyr::from_str(yaml).unwrap();
        let graph = compile(user_graph).unwrap();

        assert!(graph.links.contains(&Link::new("split", 1, "shrink", 0)));
        assert!(graph.links.contains(&Link::new("split", 0, "overlay", 0)));
        assert!(graph.links.contains(&Link::new("shrink", 0, "overlay", 1)));
        assert!(graph.links.contains(&Link::new("overlay", 0, "out", 0)));
        assert_eq!(graph.nodes.get_index(0).map(|(k, _)| k.as_str()), Some("in"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_self_reference_needs_rejected() {
        let yaml = r"
nodes:
  loop:
    kind: setpts
    needs: loop
";

        let user_graph: UserGraph = serde_saphyr::from_str(yaml).unwrap();
        let err = compile(user_graph).unwrap_err();
        assert!(err.contains("Circular dependency"), "Error should mention circular dependency: {err}");
        assert!(err.contains("loop"), "Error should mention the node name: {err}");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_circular_needs_rejected() {
        let yaml = r"
nodes:
  node_a:
    kind: setpts
    needs: node_b
  node_b:
    kind: setpts
    needs: node_a
";

        let user_graph: UserGraph = serde_saphyr::from_str(yaml).unwrap();
        let err = compile(user_graph).unwrap_err();
        assert!(err.contains("Circular dependency"), "Error should mention circular dependency: {err}");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_invalid_needs_reference() {
        let yaml = r"
nodes:
  node_a:
    kind: setpts
    needs: non_existent_node
";

        let user_graph: UserGraph = serde_saphyr::from_str(yaml).unwrap();
        let err = compile(user_graph).unwrap_err();
        assert!(err.contains("node_a"));
        assert!(err.contains("non_existent_node"));
        assert!(err.contains("needs"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_two_terminals_rejected() {
        let yaml = r"
nodes:
  a:
    kind: setpts
    needs: in
  b:
    kind: setpts
    needs: in
";
        let user_graph: UserGraph = serde_saphyr::from_str(yaml).unwrap();
        let err = compile(user_graph).unwrap_err();
        assert!(err.contains("exactly one terminal"), "{err}");
    }
}
