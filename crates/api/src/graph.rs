// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Explicit filter graph description.
//!
//! This is the form the engine validates and executes. The user-facing YAML
//! formats in [`crate::yaml`] compile into it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Kind of the node that injects decoded frames into a graph.
pub const SOURCE_KIND: &str = "buffer";
/// Kind of the node that hands filtered frames to the encoder.
pub const SINK_KIND: &str = "buffersink";
/// Name given to the implicit source node by the YAML compilers.
pub const SOURCE_NAME: &str = "in";
/// Name given to the implicit sink node by the YAML compilers.
pub const SINK_NAME: &str = "out";

/// One node of a filter graph.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct FilterNodeSpec {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl FilterNodeSpec {
    pub fn new(kind: &str) -> Self {
        Self { kind: kind.to_string(), params: None }
    }

    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// Directed edge from an output port to an input port, addressed by index.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Link {
    pub from: String,
    #[serde(default)]
    pub from_port: usize,
    pub to: String,
    #[serde(default)]
    pub to_port: usize,
}

impl Link {
    pub fn new(from: &str, from_port: usize, to: &str, to_port: usize) -> Self {
        Self { from: from.to_string(), from_port, to: to.to_string(), to_port }
    }
}

/// A filter graph: named nodes plus the links between their ports.
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct FilterGraphSpec {
    pub nodes: IndexMap<String, FilterNodeSpec>,
    /// Required, so a YAML `nodes` map without links is read as the DAG form.
    pub links: Vec<Link>,
}

impl FilterGraphSpec {
    /// `in -> out`, the graph used when a stream has no filters.
    pub fn passthrough() -> Self {
        Self::chain(Vec::new())
    }

    /// `in -> nodes[0] -> ... -> out`, each node named `step_<i>`.
    pub fn chain(nodes: Vec<FilterNodeSpec>) -> Self {
        let mut graph = Self::default();
        graph.nodes.insert(SOURCE_NAME.to_string(), FilterNodeSpec::new(SOURCE_KIND));

        let mut previous = SOURCE_NAME.to_string();
        for (i, node) in nodes.into_iter().enumerate() {
            let name = format!("step_{i}");
            graph.links.push(Link::new(&previous, 0, &name, 0));
            graph.nodes.insert(name.clone(), node);
            previous = name;
        }

        graph.nodes.insert(SINK_NAME.to_string(), FilterNodeSpec::new(SINK_KIND));
        graph.links.push(Link::new(&previous, 0, SINK_NAME, 0));
        graph
    }

    #[must_use]
    pub fn with_node(mut self, name: &str, node: FilterNodeSpec) -> Self {
        self.nodes.insert(name.to_string(), node);
        self
    }

    #[must_use]
    pub fn with_link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }
}
