//! Compiles `(nodes, connections)` into a [`RenderPlan`].
//!
//! The builder runs off the audio thread. It orders the nodes so every
//! producer precedes its consumers (ignoring feedback), then walks the
//! ordered nodes emitting ops while assigning shared buffers for best
//! reuse: a buffer holds one `(node, output port)` signal from the step
//! that writes it until the last step that reads it, after which it is
//! free again. Buffer 0 of each pool is the read-only silence buffer.
//!
//! Latency is compensated as the walk goes: each node's output latency is
//! its maximum input latency plus its declared latency, and any source
//! arriving early is run through a delay op before it is consumed.
//!
//! Feedback edges (a source that has not been scheduled when its consumer
//! is reached) resolve to a reserved buffer that is refreshed right after
//! the source renders, so a cycle contributes silence on the first block
//! and the previous block's signal afterwards. Discovering those edges
//! takes one extra pass: the first pass finds them, the second reserves
//! their buffers and wires them in.

use std::collections::{HashMap, HashSet};

use crate::buffer::{DelayLine, SILENCE_BUFFER};
use crate::connection::Connection;
use crate::node::Node;
use crate::ops::{ProcessOp, RenderOp, RenderPlan};
use crate::port::{PortFlow, PortType};

/// Routable type slots: audio and MIDI share the allocation scheme but
/// draw from separate pools.
const AUDIO: usize = 0;
const MIDI: usize = 1;
const NUM_SLOTS: usize = 2;

fn type_slot(port_type: PortType) -> Option<usize> {
    match port_type {
        PortType::Audio => Some(AUDIO),
        PortType::Midi => Some(MIDI),
        _ => None,
    }
}

/// Who holds a shared buffer at the current point of the walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BufferOwner {
    /// Available for allocation.
    Free,
    /// The read-only silence buffer (index 0, never reallocated).
    Silence,
    /// Scratch held for the node currently being scheduled.
    Anonymous,
    /// Holds the signal of a node's output port.
    Port { node: u32, port: u32 },
    /// Reserved feedback buffer; persists across blocks, never freed.
    Feedback { node: u32, port: u32 },
}

/// Answers "is node A an input (direct or transitive) to node B" in
/// amortized constant time, from a closure precomputed over the
/// connection set. Cycles are fine: reachability just saturates.
pub(crate) struct ReachabilityTable {
    reach: HashSet<(u32, u32)>,
}

impl ReachabilityTable {
    pub(crate) fn new(connections: &[Connection]) -> Self {
        let mut adjacency: HashMap<u32, Vec<u32>> = HashMap::new();
        for c in connections {
            adjacency.entry(c.source_node).or_default().push(c.dest_node);
        }

        let mut reach = HashSet::new();
        for &start in adjacency.keys() {
            let mut stack: Vec<u32> = adjacency[&start].clone();
            let mut visited = HashSet::new();
            while let Some(next) = stack.pop() {
                if !visited.insert(next) {
                    continue;
                }
                reach.insert((start, next));
                if let Some(following) = adjacency.get(&next) {
                    stack.extend(following.iter().copied());
                }
            }
        }
        Self { reach }
    }

    /// True when `source`'s output can reach `dest`.
    pub(crate) fn is_input_to(&self, source: u32, dest: u32) -> bool {
        self.reach.contains(&(source, dest))
    }
}

/// Orders node arena indices so that every node comes after the nodes
/// that feed it, ignoring feedback edges.
pub(crate) fn ordered_node_indices(nodes: &[Node], connections: &[Connection]) -> Vec<usize> {
    let table = ReachabilityTable::new(connections);
    let mut ordered: Vec<usize> = Vec::with_capacity(nodes.len());
    for idx in 0..nodes.len() {
        let id = nodes[idx].id();
        let insert_at = ordered
            .iter()
            .position(|&existing| table.is_input_to(id, nodes[existing].id()))
            .unwrap_or(ordered.len());
        ordered.insert(insert_at, idx);
    }
    ordered
}

/// Builds the render plan for the current graph state.
pub(crate) fn build_render_plan(
    nodes: &[Node],
    connections: &[Connection],
    block_size: usize,
) -> RenderPlan {
    let ordered = ordered_node_indices(nodes, connections);

    let mut builder = Builder::new(nodes, connections, &ordered, &HashSet::new());
    builder.run();

    // Feedback edges discovered on the first pass get reserved buffers on
    // a second pass, wired in from the start.
    if !builder.feedback_seen.is_empty() {
        let feedback = builder.feedback_seen.clone();
        builder = Builder::new(nodes, connections, &ordered, &feedback);
        builder.run();
    }

    RenderPlan::new(
        builder.ops,
        builder.buffers[AUDIO].len(),
        builder.buffers[MIDI].len(),
        builder.total_latency,
        block_size,
    )
}

struct Builder<'g> {
    nodes: &'g [Node],
    connections: &'g [Connection],
    ordered: &'g [usize],
    buffers: [Vec<BufferOwner>; NUM_SLOTS],
    /// Reserved buffer per feedback edge source, by slot.
    feedback_buffers: HashMap<(usize, u32, u32), usize>,
    /// Feedback sources discovered during this pass.
    feedback_seen: HashSet<(usize, u32, u32)>,
    node_delays: HashMap<u32, u32>,
    total_latency: u32,
    ops: Vec<RenderOp>,
}

impl<'g> Builder<'g> {
    fn new(
        nodes: &'g [Node],
        connections: &'g [Connection],
        ordered: &'g [usize],
        feedback: &HashSet<(usize, u32, u32)>,
    ) -> Self {
        let mut buffers = [vec![BufferOwner::Silence], vec![BufferOwner::Silence]];
        let mut feedback_buffers = HashMap::new();
        // Deterministic reservation order keeps plans reproducible.
        let mut reservations: Vec<(usize, u32, u32)> = feedback.iter().copied().collect();
        reservations.sort_unstable();
        for (slot, node, port) in reservations {
            let index = buffers[slot].len();
            buffers[slot].push(BufferOwner::Feedback { node, port });
            feedback_buffers.insert((slot, node, port), index);
        }
        Self {
            nodes,
            connections,
            ordered,
            buffers,
            feedback_buffers,
            feedback_seen: HashSet::new(),
            node_delays: HashMap::new(),
            total_latency: 0,
            ops: Vec::new(),
        }
    }

    fn run(&mut self) {
        for step in 0..self.ordered.len() {
            let node = &self.nodes[self.ordered[step]];
            if !node.controls().is_enabled() || !node.is_prepared() {
                continue;
            }
            self.create_ops_for_node(step);
            self.mark_unused_buffers_free(step);
        }
    }

    // --- buffer bookkeeping ---

    fn free_buffer(&mut self, slot: usize) -> usize {
        for (i, owner) in self.buffers[slot].iter().enumerate().skip(1) {
            if *owner == BufferOwner::Free {
                return i;
            }
        }
        self.buffers[slot].push(BufferOwner::Free);
        self.buffers[slot].len() - 1
    }

    fn scratch_buffer(&mut self, slot: usize) -> usize {
        let buf = self.free_buffer(slot);
        self.buffers[slot][buf] = BufferOwner::Anonymous;
        buf
    }

    fn buffer_containing(&self, slot: usize, node: u32, port: u32) -> Option<usize> {
        self.buffers[slot]
            .iter()
            .position(|owner| *owner == BufferOwner::Port { node, port })
    }

    fn mark_buffer(&mut self, slot: usize, buffer: usize, node: u32, port: u32) {
        self.buffers[slot][buffer] = BufferOwner::Port { node, port };
    }

    fn mark_unused_buffers_free(&mut self, step: usize) {
        for slot in 0..NUM_SLOTS {
            for i in 0..self.buffers[slot].len() {
                match self.buffers[slot][i] {
                    BufferOwner::Port { node, port } => {
                        if !self.is_buffer_needed_later(step, None, node, port) {
                            self.buffers[slot][i] = BufferOwner::Free;
                        }
                    }
                    BufferOwner::Anonymous => {
                        self.buffers[slot][i] = BufferOwner::Free;
                    }
                    _ => {}
                }
            }
        }
    }

    /// Does any node at or after `from_step` consume `(source, port)`?
    /// `ignore_port` exempts one input port of the first node scanned.
    fn is_buffer_needed_later(
        &self,
        from_step: usize,
        mut ignore_port: Option<u32>,
        source_node: u32,
        source_port: u32,
    ) -> bool {
        for &idx in &self.ordered[from_step..] {
            let node = &self.nodes[idx];
            for port in 0..node.num_ports() {
                if Some(port) == ignore_port {
                    continue;
                }
                if self.connection_exists(source_node, source_port, node.id(), port) {
                    return true;
                }
            }
            ignore_port = None;
        }
        false
    }

    fn connection_exists(&self, source_node: u32, source_port: u32, dest_node: u32, dest_port: u32) -> bool {
        self.connections
            .binary_search(&Connection::new(source_node, source_port, dest_node, dest_port))
            .is_ok()
    }

    // --- latency bookkeeping ---

    fn node_delay(&self, node: u32) -> u32 {
        self.node_delays.get(&node).copied().unwrap_or(0)
    }

    fn input_latency(&self, node: u32) -> u32 {
        self.connections
            .iter()
            .filter(|c| c.dest_node == node)
            .map(|c| self.node_delay(c.source_node))
            .max()
            .unwrap_or(0)
    }

    // --- op emission ---

    fn clear_op(slot: usize, buffer: usize) -> RenderOp {
        if slot == AUDIO {
            RenderOp::ClearAudio { buffer }
        } else {
            RenderOp::ClearMidi { buffer }
        }
    }

    fn copy_op(slot: usize, source: usize, dest: usize) -> RenderOp {
        if slot == AUDIO {
            RenderOp::CopyAudio { source, dest }
        } else {
            RenderOp::CopyMidi { source, dest }
        }
    }

    fn create_ops_for_node(&mut self, our_step: usize) {
        let node_index = self.ordered[our_step];
        let nodes = self.nodes;
        let node = &nodes[node_index];
        let id = node.id();

        // IO nodes that cannot move anything are left out entirely.
        if node.is_audio_input() && node.num_audio_outputs() == 0 {
            return;
        }
        if node.is_audio_output() && node.num_audio_inputs() == 0 {
            return;
        }

        let mut channels: [Vec<usize>; NUM_SLOTS] = [Vec::new(), Vec::new()];
        let max_latency = self.input_latency(id);

        for port in 0..node.num_ports() {
            let port_type = node.ports().port_type(port);
            let Some(slot) = type_slot(port_type) else {
                continue;
            };
            let num_ins = node.port_count(port_type, PortFlow::Input);
            let num_outs = node.port_count(port_type, PortFlow::Output);

            if node.ports().is_output(port) {
                // Outputs need a fresh buffer only when their channel has
                // no input counterpart to take over in place.
                let channel = node.channel_for_port(port).unwrap_or(0);
                if channel >= num_ins && channel < num_outs {
                    let buf = self.scratch_buffer(slot);
                    channels[slot].push(buf);
                    self.mark_buffer(slot, buf, id, port);
                }
                continue;
            }

            let channel = node.channel_for_port(port).unwrap_or(0);
            let sources: Vec<(u32, u32)> = self
                .connections
                .iter()
                .filter(|c| c.dest_node == id && c.dest_port == port)
                .map(|c| (c.source_node, c.source_port))
                .collect();

            let buf = match sources.len() {
                0 => self.wire_unconnected_input(slot, channel, num_outs),
                1 => self.wire_single_input(slot, our_step, port, channel, num_outs, sources[0], max_latency),
                _ => self.wire_mixed_input(slot, our_step, port, &sources, max_latency),
            };

            channels[slot].push(buf);
            if channel < num_outs && buf != SILENCE_BUFFER {
                if let Some(out_port) = node.port_for_channel(port_type, channel, PortFlow::Output) {
                    self.mark_buffer(slot, buf, id, out_port);
                }
            }
        }

        self.set_node_delay(id, max_latency + node.latency_samples());
        if node.is_audio_output() {
            self.total_latency = self.total_latency.max(max_latency);
        }

        let [audio_channels, midi_channels] = channels;
        let midi_input = midi_channels.first().copied().unwrap_or(SILENCE_BUFFER);
        self.ops.push(RenderOp::Process(ProcessOp::new(
            node_index,
            id,
            audio_channels,
            midi_channels,
            node.port_count(PortType::Audio, PortFlow::Input) as usize,
            node.port_count(PortType::Audio, PortFlow::Output) as usize,
            node.port_count(PortType::Midi, PortFlow::Input) as usize,
            node.port_count(PortType::Midi, PortFlow::Output) as usize,
            midi_input,
        )));

        // Refresh the reserved buffer of any feedback edge this node feeds,
        // now that its output for the block exists.
        for slot in 0..NUM_SLOTS {
            let refreshes: Vec<(usize, usize)> = self
                .feedback_buffers
                .iter()
                .filter(|&(&(s, n, _), _)| s == slot && n == id)
                .filter_map(|(&(s, n, p), &reserved)| {
                    self.buffer_containing(s, n, p).map(|src| (src, reserved))
                })
                .collect();
            for (src, reserved) in refreshes {
                self.ops.push(Self::copy_op(slot, src, reserved));
            }
        }
    }

    fn wire_unconnected_input(&mut self, slot: usize, channel: u32, num_outs: u32) -> usize {
        if slot == AUDIO && channel >= num_outs {
            return SILENCE_BUFFER;
        }
        let buf = self.scratch_buffer(slot);
        self.ops.push(Self::clear_op(slot, buf));
        buf
    }

    #[allow(clippy::too_many_arguments)]
    fn wire_single_input(
        &mut self,
        slot: usize,
        our_step: usize,
        port: u32,
        channel: u32,
        num_outs: u32,
        source: (u32, u32),
        max_latency: u32,
    ) -> usize {
        let (src_node, src_port) = source;
        let found = self.buffer_containing(slot, src_node, src_port);
        let is_feedback = found.is_none();
        let mut buf = match found {
            Some(buf) => buf,
            None => self.feedback_source_buffer(slot, src_node, src_port),
        };

        if buf == SILENCE_BUFFER {
            // The source stays silent for this block. If this channel
            // doubles as one of our outputs we must not scribble on the
            // silence buffer, so take a cleared scratch instead.
            if channel < num_outs {
                let scratch = self.scratch_buffer(slot);
                self.ops.push(Self::clear_op(slot, scratch));
                buf = scratch;
            }
            return buf;
        }

        let delay = if slot == AUDIO {
            max_latency.saturating_sub(self.node_delay(src_node))
        } else {
            0
        };
        let needed_later =
            is_feedback || self.is_buffer_needed_later(our_step, Some(port), src_node, src_port);

        // A reserved feedback buffer must never sit in a node's channel
        // list, where the gain stages would scribble on it; feedback
        // always renders from a private copy.
        if is_feedback || (needed_later && (channel < num_outs || slot == MIDI || delay > 0)) {
            let copy = self.scratch_buffer(slot);
            self.ops.push(Self::copy_op(slot, buf, copy));
            buf = copy;
        }

        if delay > 0 {
            self.ops.push(RenderOp::DelayAudio {
                buffer: buf,
                delay: DelayLine::new(delay as usize),
            });
        }

        buf
    }

    fn wire_mixed_input(
        &mut self,
        slot: usize,
        our_step: usize,
        port: u32,
        sources: &[(u32, u32)],
        max_latency: u32,
    ) -> usize {
        // Prefer accumulating into an input buffer nothing needs later.
        let mut reusable = None;
        let mut buf = 0;
        for (i, &(src_node, src_port)) in sources.iter().enumerate() {
            if let Some(source_buf) = self.buffer_containing(slot, src_node, src_port)
                && !self.is_buffer_needed_later(our_step, Some(port), src_node, src_port)
            {
                reusable = Some(i);
                buf = source_buf;
                if slot == AUDIO {
                    let delay = max_latency.saturating_sub(self.node_delay(src_node));
                    if delay > 0 {
                        self.ops.push(RenderOp::DelayAudio {
                            buffer: source_buf,
                            delay: DelayLine::new(delay as usize),
                        });
                    }
                }
                break;
            }
        }

        if reusable.is_none() {
            // No input can be clobbered; accumulate in fresh scratch
            // seeded from the first available source.
            buf = self.scratch_buffer(slot);
            let (first_node, first_port) = sources[0];
            let first = self
                .buffer_containing(slot, first_node, first_port)
                .or_else(|| {
                    let reserved = self.feedback_source_buffer(slot, first_node, first_port);
                    (reserved != SILENCE_BUFFER).then_some(reserved)
                });
            match first {
                None => self.ops.push(Self::clear_op(slot, buf)),
                Some(src) => {
                    self.ops.push(Self::copy_op(slot, src, buf));
                    if slot == AUDIO {
                        let delay = max_latency.saturating_sub(self.node_delay(first_node));
                        if delay > 0 {
                            self.ops.push(RenderOp::DelayAudio {
                                buffer: buf,
                                delay: DelayLine::new(delay as usize),
                            });
                        }
                    }
                }
            }
            reusable = Some(0);
        }

        for (j, &(src_node, src_port)) in sources.iter().enumerate() {
            if Some(j) == reusable {
                continue;
            }
            let found = self.buffer_containing(slot, src_node, src_port).or_else(|| {
                let reserved = self.feedback_source_buffer(slot, src_node, src_port);
                (reserved != SILENCE_BUFFER).then_some(reserved)
            });
            let Some(mut source_buf) = found else {
                continue;
            };
            let is_reserved = matches!(
                self.buffers[slot][source_buf],
                BufferOwner::Feedback { .. }
            );

            if slot == AUDIO {
                let delay = max_latency.saturating_sub(self.node_delay(src_node));
                if delay > 0 {
                    if !is_reserved
                        && !self.is_buffer_needed_later(our_step, Some(port), src_node, src_port)
                    {
                        self.ops.push(RenderOp::DelayAudio {
                            buffer: source_buf,
                            delay: DelayLine::new(delay as usize),
                        });
                    } else {
                        // Still wanted elsewhere: delay a copy instead.
                        let scratch = self.scratch_buffer(slot);
                        self.ops.push(Self::copy_op(slot, source_buf, scratch));
                        self.ops.push(RenderOp::DelayAudio {
                            buffer: scratch,
                            delay: DelayLine::new(delay as usize),
                        });
                        source_buf = scratch;
                    }
                }
                self.ops.push(RenderOp::AddAudio {
                    source: source_buf,
                    dest: buf,
                });
            } else {
                self.ops.push(RenderOp::AddMidi {
                    source: source_buf,
                    dest: buf,
                });
            }
        }

        buf
    }

    /// Resolves a source that has not been scheduled yet: a feedback edge.
    ///
    /// With a reserved buffer available (second pass), returns it; the
    /// first pass records the edge and falls back to silence.
    fn feedback_source_buffer(&mut self, slot: usize, src_node: u32, src_port: u32) -> usize {
        if let Some(&reserved) = self.feedback_buffers.get(&(slot, src_node, src_port)) {
            return reserved;
        }
        self.feedback_seen.insert((slot, src_node, src_port));
        SILENCE_BUFFER
    }

    fn set_node_delay(&mut self, node: u32, latency: u32) {
        self.node_delays.insert(node, latency);
    }
}
