// SPDX-FileCopyrightText: © 2025 TransKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Filter graph validation and execution.
//!
//! [`FilterGraph::validate`] turns a [`FilterGraphSpec`] into a runnable graph:
//! it instantiates every node through the registry, checks the wiring, rejects
//! cycles, negotiates formats along every link (inserting `convert` nodes where a
//! conversion can help) and fixes a topological schedule. Execution is push based
//! and single threaded: frames enter at the `buffer` node, every node fires in
//! schedule order, and whatever reaches the `buffersink` is handed back.
//!
//! Nodes with several inputs only fire with one frame per port. Heads are aligned
//! on timestamps: a head older than the newest head by more than half a frame (of
//! the first port) can never be matched and is dropped.

use serde_json::json;
use smallvec::SmallVec;
use std::collections::{HashMap, VecDeque};
use transkit_api::graph::{SINK_KIND, SOURCE_KIND};
use transkit_api::FilterGraphSpec;
use transkit_core::caps::negotiate;
use transkit_core::{
    ComponentKind, FilterNode, FilterOutput, FormatCaps, FormatRegistry, Frame, FrameFormat,
    Negotiation, Rational, Result, TranscodeError,
};
use transkit_nodes::filters::CONVERT;

#[derive(Debug, Clone, Copy)]
struct Target {
    node: usize,
    port: usize,
}

struct GraphNode {
    name: String,
    filter: Box<dyn FilterNode>,
    inputs: Vec<VecDeque<Frame>>,
    outputs: Vec<Vec<Target>>,
    output_formats: Vec<FrameFormat>,
    output_time_base: Rational,
}

impl GraphNode {
    fn new(
        name: String,
        filter: Box<dyn FilterNode>,
        output_formats: Vec<FrameFormat>,
        output_time_base: Rational,
    ) -> Self {
        let inputs = filter.input_ports().iter().map(|_| VecDeque::new()).collect();
        let outputs = output_formats.iter().map(|_| Vec::new()).collect();
        Self { name, filter, inputs, outputs, output_formats, output_time_base }
    }

    /// Pops one timestamp-aligned frame per port, dropping heads that can no
    /// longer be matched. `None` while some port is empty.
    fn take_synced(&mut self, dropped: &mut u64) -> Option<Vec<Frame>> {
        loop {
            let reference = self.inputs.first()?.front()?;
            let (time_base, tolerance) = (reference.time_base, reference.duration / 2);
            let mut heads = Vec::with_capacity(self.inputs.len());
            for queue in &self.inputs {
                heads.push(queue.front()?.pts_in(time_base));
            }
            let newest = heads.iter().copied().max()?;

            let mut dropped_any = false;
            for (queue, head) in self.inputs.iter_mut().zip(heads) {
                if head < newest.saturating_sub(tolerance) {
                    queue.pop_front();
                    *dropped += 1;
                    dropped_any = true;
                    tracing::debug!(node = %self.name, pts = head, "Dropping unmatched input frame");
                }
            }
            if !dropped_any {
                return Some(self.inputs.iter_mut().filter_map(VecDeque::pop_front).collect());
            }
        }
    }
}

pub struct FilterGraph {
    /// Nodes in schedule (topological) order.
    nodes: Vec<GraphNode>,
    source: usize,
    sink: usize,
    output_format: FrameFormat,
    output_time_base: Rational,
    dropped: u64,
    flushed: bool,
}

fn params_error(err: &serde_json::Error) -> TranscodeError {
    TranscodeError::Configuration(format!("Cannot encode graph endpoint parameters: {err}"))
}

/// Kahn's algorithm over `producers[node][port] = (from, from_port)`.
/// Returns the schedule or the node indices stuck on a cycle.
fn topological_order(producers: &[Vec<(usize, usize)>]) -> std::result::Result<Vec<usize>, Vec<usize>> {
    let count = producers.len();
    let mut indegree: Vec<usize> = producers.iter().map(Vec::len).collect();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (to, ports) in producers.iter().enumerate() {
        for &(from, _) in ports {
            successors[from].push(to);
        }
    }

    let mut ready: VecDeque<usize> = (0..count).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(node) = ready.pop_front() {
        order.push(node);
        for &next in &successors[node] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push_back(next);
            }
        }
    }
    if order.len() == count {
        Ok(order)
    } else {
        Err((0..count).filter(|&i| indegree[i] > 0).collect())
    }
}

/// Walks producer links backwards from a node left over by Kahn's algorithm
/// until a node repeats, and returns that loop in link direction.
fn find_cycle(producers: &[Vec<(usize, usize)>], stuck: &[usize]) -> Vec<usize> {
    let Some(&start) = stuck.first() else {
        return Vec::new();
    };
    let mut path = vec![start];
    let mut current = start;
    loop {
        // Every stuck node has at least one stuck producer.
        let Some(&(previous, _)) = producers[current].iter().find(|(from, _)| stuck.contains(from))
        else {
            return path;
        };
        if let Some(at) = path.iter().position(|&n| n == previous) {
            let mut cycle: Vec<usize> = path[at..].to_vec();
            cycle.reverse();
            if let Some(first) = cycle.iter().enumerate().min_by_key(|(_, &n)| n).map(|(i, _)| i) {
                cycle.rotate_left(first);
                cycle.push(cycle[0]);
            }
            return cycle;
        }
        path.push(previous);
        current = previous;
    }
}

impl FilterGraph {
    /// Builds a runnable graph for frames of `source_format` in `source_time_base`,
    /// delivering frames the sink's consumer accepts (`sink_accepts`, empty for any).
    ///
    /// # Errors
    ///
    /// - `UnsupportedFormat`: a node kind is unknown or disabled
    /// - `GraphError`: bad wiring, missing or duplicate endpoints, cycles
    /// - `FormatNegotiationError`: a link joins incompatible media
    /// - `Configuration`: a node rejected its parameters
    #[allow(clippy::too_many_lines)]
    pub fn validate(
        spec: &FilterGraphSpec,
        source_format: FrameFormat,
        source_time_base: Rational,
        sink_accepts: &[FormatCaps],
        registry: &FormatRegistry,
    ) -> Result<Self> {
        let names: Vec<&String> = spec.nodes.keys().collect();
        let index_of: HashMap<&str, usize> =
            names.iter().enumerate().map(|(i, name)| (name.as_str(), i)).collect();

        for node in spec.nodes.values() {
            registry.require(ComponentKind::Filter, &node.kind)?;
        }
        let endpoint = |kind: &str| -> Result<usize> {
            let mut found = spec.nodes.values().enumerate().filter(|(_, n)| n.kind == kind);
            match (found.next(), found.next()) {
                (Some((i, _)), None) => Ok(i),
                (None, _) => Err(TranscodeError::Graph(format!("Graph has no '{kind}' node"))),
                (Some(_), Some(_)) => {
                    Err(TranscodeError::Graph(format!("Graph has more than one '{kind}' node")))
                },
            }
        };
        let source_index = endpoint(SOURCE_KIND)?;
        let sink_index = endpoint(SINK_KIND)?;

        // Instantiate every node; endpoint parameters come from the stream.
        let source_params = json!({ "format": source_format });
        let sink_params = json!({
            "accepts": serde_json::to_value(sink_accepts).map_err(|e| params_error(&e))?
        });
        let mut instances: Vec<Option<Box<dyn FilterNode>>> = Vec::with_capacity(names.len());
        for (i, node) in spec.nodes.values().enumerate() {
            let params = if i == source_index {
                Some(&source_params)
            } else if i == sink_index {
                Some(&sink_params)
            } else {
                node.params.as_ref()
            };
            instances.push(Some(registry.create_filter(&node.kind, params)?));
        }

        // Wiring: every input port exactly once, every output port at least once.
        let mut input_links: Vec<Vec<Option<(usize, usize)>>> = instances
            .iter()
            .flatten()
            .map(|n| vec![None; n.input_ports().len()])
            .collect();
        let mut output_uses: Vec<Vec<usize>> = instances
            .iter()
            .flatten()
            .map(|n| vec![0; n.output_ports().len()])
            .collect();
        for link in &spec.links {
            let lookup = |name: &str| {
                index_of.get(name).copied().ok_or_else(|| {
                    TranscodeError::Graph(format!("Link references unknown node '{name}'"))
                })
            };
            let (from, to) = (lookup(&link.from)?, lookup(&link.to)?);
            let uses = output_uses[from].get_mut(link.from_port).ok_or_else(|| {
                TranscodeError::Graph(format!("'{}' has no output port {}", link.from, link.from_port))
            })?;
            *uses += 1;
            let slot = input_links[to].get_mut(link.to_port).ok_or_else(|| {
                TranscodeError::Graph(format!("'{}' has no input port {}", link.to, link.to_port))
            })?;
            if slot.is_some() {
                return Err(TranscodeError::Graph(format!(
                    "Input port {} of '{}' is connected more than once",
                    link.to_port, link.to
                )));
            }
            *slot = Some((from, link.from_port));
        }
        let mut producers: Vec<Vec<(usize, usize)>> = Vec::with_capacity(names.len());
        for (i, ports) in input_links.into_iter().enumerate() {
            let mut resolved = Vec::with_capacity(ports.len());
            for (port, link) in ports.into_iter().enumerate() {
                resolved.push(link.ok_or_else(|| {
                    TranscodeError::Graph(format!("Input port {port} of '{}' is not connected", names[i]))
                })?);
            }
            producers.push(resolved);
        }
        for (i, uses) in output_uses.iter().enumerate() {
            if let Some(port) = uses.iter().position(|&n| n == 0) {
                return Err(TranscodeError::Graph(format!(
                    "Output port {port} of '{}' is not connected",
                    names[i]
                )));
            }
        }

        let order = topological_order(&producers).map_err(|stuck| {
            let cycle = find_cycle(&producers, &stuck);
            let path: Vec<&str> = cycle.iter().map(|&i| names[i].as_str()).collect();
            TranscodeError::Graph(format!("Graph contains a cycle: {}", path.join(" -> ")))
        })?;

        // Negotiate and configure in schedule order.
        let mut built: Vec<GraphNode> = Vec::with_capacity(order.len());
        let mut position = vec![0usize; names.len()];
        let mut inserted = 0usize;
        let mut sink_input: Option<(FrameFormat, Rational)> = None;
        for &index in &order {
            let mut filter = instances[index].take().ok_or_else(|| {
                TranscodeError::Graph(format!("Node '{}' scheduled twice", names[index]))
            })?;
            let ports = filter.input_ports();
            let mut formats = Vec::with_capacity(ports.len());
            let mut time_bases = Vec::with_capacity(ports.len());
            let mut edges: Vec<(Target, usize)> = Vec::with_capacity(ports.len());

            for (port_index, port) in ports.iter().enumerate() {
                let (from, from_port) = producers[index][port_index];
                let mut producer = Target { node: position[from], port: from_port };
                let produced = built[producer.node].output_formats[producer.port];
                let mut time_base = built[producer.node].output_time_base;

                let format = match negotiate(&produced, &port.accepts) {
                    Negotiation::Direct => produced,
                    Negotiation::Convert(target) => {
                        let params = json!({ "format": target });
                        let mut convert = registry.create_filter(CONVERT, Some(&params))?;
                        let converted = convert.configure(&[produced])?;
                        let convert_time_base = convert.output_time_base(time_base);
                        let name = format!("auto_convert_{inserted}");
                        inserted += 1;
                        tracing::debug!(
                            node = %names[index],
                            port = %port.name,
                            from = %produced,
                            to = %target,
                            "Inserting {name}"
                        );
                        let at = built.len();
                        built[producer.node].outputs[producer.port].push(Target { node: at, port: 0 });
                        built.push(GraphNode::new(name, convert, converted, convert_time_base));
                        producer = Target { node: at, port: 0 };
                        time_base = convert_time_base;
                        target
                    },
                    Negotiation::Incompatible => {
                        return Err(TranscodeError::FormatNegotiation(format!(
                            "Input '{}' of '{}' cannot accept {produced}",
                            port.name, names[index]
                        )))
                    },
                };
                formats.push(format);
                time_bases.push(time_base);
                edges.push((producer, port_index));
            }

            let output_formats = filter.configure(&formats)?;
            if output_formats.len() != filter.output_ports().len() {
                return Err(TranscodeError::Graph(format!(
                    "'{}' configured {} outputs but declares {}",
                    names[index],
                    output_formats.len(),
                    filter.output_ports().len()
                )));
            }
            let output_time_base =
                time_bases.first().map_or(source_time_base, |tb| filter.output_time_base(*tb));

            let at = built.len();
            for (producer, port) in edges {
                built[producer.node].outputs[producer.port].push(Target { node: at, port });
            }
            built.push(GraphNode::new(names[index].clone(), filter, output_formats, output_time_base));
            position[index] = at;

            if index == sink_index {
                sink_input = formats.first().copied().zip(time_bases.first().copied());
            }
        }

        let sink = position[sink_index];
        let (output_format, output_time_base) = sink_input
            .ok_or_else(|| TranscodeError::Graph("Graph sink has no input".to_string()))?;

        tracing::info!(
            nodes = built.len(),
            converters = inserted,
            output = %output_format,
            "Filter graph validated"
        );
        Ok(Self {
            nodes: built,
            source: position[source_index],
            sink,
            output_format,
            output_time_base,
            dropped: 0,
            flushed: false,
        })
    }

    /// Format of the frames leaving the graph.
    pub const fn output_format(&self) -> FrameFormat {
        self.output_format
    }

    /// Time base of the frames leaving the graph.
    pub const fn output_time_base(&self) -> Rational {
        self.output_time_base
    }

    /// Frames dropped by input alignment so far.
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Node names in schedule order, including inserted converters.
    pub fn schedule(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.name.as_str()).collect()
    }

    /// Feeds one frame and returns the frames that reached the sink.
    ///
    /// # Errors
    ///
    /// Errors raised by a node. Recoverable ones (`DecodeError`) lose only the
    /// frames that node was processing. Pushing after [`Self::flush`] is a
    /// `GraphError`.
    pub fn push(&mut self, frame: Frame) -> Result<Vec<Frame>> {
        if self.flushed {
            return Err(TranscodeError::Graph("Frame pushed into a flushed graph".to_string()));
        }
        self.route(self.source, 0, frame);
        for index in 0..self.nodes.len() {
            if index != self.source && index != self.sink {
                self.fire(index)?;
            }
        }
        Ok(self.take_output())
    }

    /// Drains every node in schedule order. Idempotent: a second call returns nothing.
    ///
    /// # Errors
    ///
    /// Errors raised by a node while draining.
    pub fn flush(&mut self) -> Result<Vec<Frame>> {
        if self.flushed {
            return Ok(Vec::new());
        }
        self.flushed = true;
        for index in 0..self.nodes.len() {
            if index == self.source || index == self.sink {
                continue;
            }
            self.fire(index)?;

            let node = &mut self.nodes[index];
            if node.inputs.len() > 1 {
                let leftover: usize = node.inputs.iter().map(VecDeque::len).sum();
                if leftover > 0 {
                    tracing::debug!(node = %node.name, leftover, "Discarding unmatched frames at flush");
                    self.dropped += u64::try_from(leftover).unwrap_or(u64::MAX);
                    node.inputs.iter_mut().for_each(VecDeque::clear);
                }
            }
            let mut out = FilterOutput::new();
            self.nodes[index].filter.flush(&mut out)?;
            self.dispatch(index, &mut out);
        }
        Ok(self.take_output())
    }

    fn fire(&mut self, index: usize) -> Result<()> {
        let mut out = FilterOutput::new();
        let node = &mut self.nodes[index];
        if node.inputs.len() == 1 {
            if node.inputs[0].is_empty() {
                return Ok(());
            }
            let batch: Vec<Frame> = node.inputs[0].drain(..).collect();
            node.filter.process(batch, &mut out)?;
        } else {
            while let Some(set) = node.take_synced(&mut self.dropped) {
                node.filter.process(set, &mut out)?;
            }
        }
        self.dispatch(index, &mut out);
        Ok(())
    }

    fn dispatch(&mut self, index: usize, out: &mut FilterOutput) {
        let frames: Vec<(usize, Frame)> = out.drain().collect();
        for (port, frame) in frames {
            self.route(index, port, frame);
        }
    }

    fn route(&mut self, index: usize, port: usize, frame: Frame) {
        let targets: SmallVec<[Target; 4]> =
            self.nodes[index].outputs.get(port).map(|t| t.iter().copied().collect()).unwrap_or_default();
        let Some((last, rest)) = targets.split_last() else {
            tracing::warn!(node = %self.nodes[index].name, port, "Frame emitted on an unknown port");
            return;
        };
        for target in rest {
            self.nodes[target.node].inputs[target.port].push_back(frame.clone());
        }
        self.nodes[last.node].inputs[last.port].push_back(frame);
    }

    fn take_output(&mut self) -> Vec<Frame> {
        self.nodes[self.sink].inputs.iter_mut().flat_map(|q| q.drain(..)).collect()
    }
}
