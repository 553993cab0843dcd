//! The processing graph: nodes, connections, lifecycle, and rendering.
//!
//! A [`Graph`] owns its child [`Node`]s (keyed by stable id) and a sorted
//! set of [`Connection`]s. Structural edits go through the explicit API
//! here; every edit marks the compiled plan dirty and, on a prepared
//! graph, rebuilds it into a pending slot. The render side takes the
//! pending plan at the next block boundary, so a callback always runs an
//! entirely old or entirely new plan, never a mix, and successive edits
//! coalesce by overwriting the slot.
//!
//! The graph implements [`Processor`] itself, so graphs nest: an inner
//! graph's render is one op in the parent's plan. At the outer boundary a
//! host drives [`process_block`](Graph::process_block) from its audio
//! callback; per-node configuration is adjusted from other threads
//! through [`NodeControls`](crate::node::NodeControls) handles.

use tejido_midi::{MidiBuffer, MidiChannels, MidiPipe, VelocityCurve, VelocityCurveMode};

use crate::buffer::{AudioView, SILENCE_BUFFER};
use crate::builder::{ReachabilityTable, build_render_plan, ordered_node_indices};
use crate::connection::Connection;
use crate::error::{GraphError, PrepareError, RenderFault, Result};
use crate::node::{Node, Processor};
use crate::ops::{RenderContext, RenderPlan};
use crate::port::{PortConfig, PortFlow, PortList, PortType};

/// Selects which of a node's connections `disconnect_node` removes.
#[derive(Clone, Copy, Debug)]
pub struct DisconnectFilter {
    /// Remove connections into the node.
    pub inputs: bool,
    /// Remove connections out of the node.
    pub outputs: bool,
    /// Remove audio connections.
    pub audio: bool,
    /// Remove MIDI connections.
    pub midi: bool,
}

impl Default for DisconnectFilter {
    fn default() -> Self {
        Self {
            inputs: true,
            outputs: true,
            audio: true,
            midi: true,
        }
    }
}

impl DisconnectFilter {
    /// Remove everything touching the node.
    pub fn all() -> Self {
        Self::default()
    }

    /// Remove only connections into the node.
    pub fn inputs_only() -> Self {
        Self {
            outputs: false,
            ..Self::default()
        }
    }

    /// Remove only connections out of the node.
    pub fn outputs_only() -> Self {
        Self {
            inputs: false,
            ..Self::default()
        }
    }

    /// Remove only audio connections.
    pub fn audio_only() -> Self {
        Self {
            midi: false,
            ..Self::default()
        }
    }

    /// Remove only MIDI connections.
    pub fn midi_only() -> Self {
        Self {
            audio: false,
            ..Self::default()
        }
    }
}

/// A directed, possibly cyclic graph of processing nodes.
#[derive(Debug)]
pub struct Graph {
    name: String,
    ports: PortList,
    nodes: Vec<Node>,
    connections: Vec<Connection>,
    last_node_id: u32,
    sample_rate: f64,
    block_size: usize,
    prepared: bool,
    midi_channels: MidiChannels,
    velocity_curve: VelocityCurve,
    plan: RenderPlan,
    pending_plan: Option<RenderPlan>,
    input_stage: Vec<Vec<f32>>,
    output_stage: Vec<Vec<f32>>,
    midi_in_stage: MidiBuffer,
    midi_out_stage: MidiBuffer,
    filtered_midi: MidiBuffer,
}

impl Graph {
    /// An empty graph with the default stereo-plus-MIDI surface.
    pub fn new() -> Self {
        Self::with_ports(
            PortConfig::new()
                .with(PortType::Audio, 2, 2)
                .with(PortType::Midi, 1, 1),
        )
    }

    /// An empty graph with a custom outer port surface.
    pub fn with_ports(config: PortConfig) -> Self {
        Self {
            name: "Graph".to_string(),
            ports: config.build(),
            nodes: Vec::new(),
            connections: Vec::new(),
            last_node_id: 0,
            sample_rate: 0.0,
            block_size: 0,
            prepared: false,
            midi_channels: MidiChannels::omni(),
            velocity_curve: VelocityCurve::default(),
            plan: RenderPlan::empty(),
            pending_plan: None,
            input_stage: Vec::new(),
            output_stage: Vec::new(),
            midi_in_stage: MidiBuffer::new(),
            midi_out_stage: MidiBuffer::new(),
            filtered_midi: MidiBuffer::new(),
        }
    }

    /// Renames the graph.
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// The graph's display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    // --- introspection ---

    /// Number of child nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Child node ids, in insertion order.
    pub fn node_ids(&self) -> Vec<u32> {
        self.nodes.iter().map(Node::id).collect()
    }

    /// Looks up a node by id.
    pub fn node(&self, node_id: u32) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id() == node_id)
    }

    /// Mutable lookup by id.
    pub fn node_mut(&mut self, node_id: u32) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id() == node_id)
    }

    /// Iterates child nodes in insertion order.
    pub fn nodes(&self) -> std::slice::Iter<'_, Node> {
        self.nodes.iter()
    }

    /// The sorted connection set.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Number of connections.
    pub fn num_connections(&self) -> usize {
        self.connections.len()
    }

    /// Sample rate of the last prepare, 0.0 before any.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Block size of the last prepare, 0 before any.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// True between `prepare` and `release`.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// The most recently compiled plan.
    pub fn plan(&self) -> &RenderPlan {
        self.pending_plan.as_ref().unwrap_or(&self.plan)
    }

    /// Compensated end-to-end latency in samples.
    pub fn total_latency_samples(&self) -> u32 {
        self.plan().total_latency()
    }

    /// Node ids in schedule order: every producer before its consumers,
    /// feedback edges ignored.
    pub fn ordered_node_ids(&self) -> Vec<u32> {
        ordered_node_indices(&self.nodes, &self.connections)
            .into_iter()
            .map(|i| self.nodes[i].id())
            .collect()
    }

    // --- structural mutation ---

    /// Adds a node, assigning a fresh id or accepting the requested one.
    ///
    /// Requesting the id of an existing node replaces that node. Returns
    /// the id in use.
    pub fn add_node(&mut self, mut node: Node, node_id: Option<u32>) -> u32 {
        let id = match node_id {
            None | Some(0) => {
                self.last_node_id += 1;
                self.last_node_id
            }
            Some(requested) => {
                if self.node(requested).is_some() {
                    tracing::warn!(node = requested, "replacing existing node with requested id");
                    self.remove_node(requested);
                }
                self.last_node_id = self.last_node_id.max(requested);
                requested
            }
        };
        node.id = id;
        node.reset_ports();
        if self.prepared
            && let Err(error) = node.prepare(self.sample_rate, self.block_size)
        {
            tracing::warn!(node = id, %error, "node failed to prepare; excluded from schedule");
        }
        tracing::debug!(node = id, name = node.name(), "node added");
        self.nodes.push(node);
        self.schedule_rebuild();
        id
    }

    /// Removes a node and all of its connections.
    pub fn remove_node(&mut self, node_id: u32) -> bool {
        let Some(pos) = self.nodes.iter().position(|n| n.id() == node_id) else {
            return false;
        };
        self.disconnect_node(node_id, DisconnectFilter::all());
        let mut node = self.nodes.remove(pos);
        node.unprepare();
        tracing::debug!(node = node_id, "node removed");
        self.schedule_rebuild();
        true
    }

    /// True when the connection would be accepted.
    pub fn can_connect(
        &self,
        source_node: u32,
        source_port: u32,
        dest_node: u32,
        dest_port: u32,
    ) -> bool {
        self.validate_connection(source_node, source_port, dest_node, dest_port)
            .is_ok()
            && self
                .connection_between(source_node, source_port, dest_node, dest_port)
                .is_none()
    }

    /// Connects an output port to an input port.
    pub fn add_connection(
        &mut self,
        source_node: u32,
        source_port: u32,
        dest_node: u32,
        dest_port: u32,
    ) -> Result<()> {
        self.validate_connection(source_node, source_port, dest_node, dest_port)?;
        let connection = Connection::new(source_node, source_port, dest_node, dest_port);
        match self.connections.binary_search(&connection) {
            Ok(_) => Err(GraphError::DuplicateConnection),
            Err(pos) => {
                self.connections.insert(pos, connection);
                tracing::debug!(
                    source = source_node,
                    source_port,
                    dest = dest_node,
                    dest_port,
                    "connection added"
                );
                self.schedule_rebuild();
                Ok(())
            }
        }
    }

    /// Like [`add_connection`](Self::add_connection) but rejects edges
    /// that would close a cycle, for hosts wanting a strict DAG.
    pub fn add_connection_checked(
        &mut self,
        source_node: u32,
        source_port: u32,
        dest_node: u32,
        dest_port: u32,
    ) -> Result<()> {
        let table = ReachabilityTable::new(&self.connections);
        if table.is_input_to(dest_node, source_node) {
            return Err(GraphError::Cycle);
        }
        self.add_connection(source_node, source_port, dest_node, dest_port)
    }

    /// Connects by type and channel ordinal instead of port index.
    pub fn connect_channels(
        &mut self,
        port_type: PortType,
        source_node: u32,
        source_channel: u32,
        dest_node: u32,
        dest_channel: u32,
    ) -> Result<()> {
        let source_port = self
            .node(source_node)
            .ok_or(GraphError::InvalidNodeId(source_node))?
            .port_for_channel(port_type, source_channel, PortFlow::Output)
            .ok_or(GraphError::InvalidPort {
                node: source_node,
                port: source_channel,
            })?;
        let dest_port = self
            .node(dest_node)
            .ok_or(GraphError::InvalidNodeId(dest_node))?
            .port_for_channel(port_type, dest_channel, PortFlow::Input)
            .ok_or(GraphError::InvalidPort {
                node: dest_node,
                port: dest_channel,
            })?;
        self.add_connection(source_node, source_port, dest_node, dest_port)
    }

    /// Wires the overlapping audio channels of two nodes, first to first.
    pub fn connect_audio(&mut self, source_node: u32, dest_node: u32) -> Result<()> {
        let channels = self
            .node(source_node)
            .ok_or(GraphError::InvalidNodeId(source_node))?
            .num_audio_outputs()
            .min(
                self.node(dest_node)
                    .ok_or(GraphError::InvalidNodeId(dest_node))?
                    .num_audio_inputs(),
            );
        for channel in 0..channels {
            if let Err(error) =
                self.connect_channels(PortType::Audio, source_node, channel, dest_node, channel)
            {
                tracing::warn!(
                    source = source_node,
                    dest = dest_node,
                    channel,
                    %error,
                    "audio channel connection failed"
                );
            }
        }
        Ok(())
    }

    /// The connection matching the quadruple, if present.
    pub fn connection_between(
        &self,
        source_node: u32,
        source_port: u32,
        dest_node: u32,
        dest_port: u32,
    ) -> Option<Connection> {
        let connection = Connection::new(source_node, source_port, dest_node, dest_port);
        self.connections
            .binary_search(&connection)
            .ok()
            .map(|_| connection)
    }

    /// True when any connection runs from `source_node` to `dest_node`.
    pub fn is_connected(&self, source_node: u32, dest_node: u32) -> bool {
        self.connections
            .iter()
            .any(|c| c.source_node == source_node && c.dest_node == dest_node)
    }

    /// Removes one connection. Returns whether anything changed.
    pub fn remove_connection(
        &mut self,
        source_node: u32,
        source_port: u32,
        dest_node: u32,
        dest_port: u32,
    ) -> bool {
        let connection = Connection::new(source_node, source_port, dest_node, dest_port);
        match self.connections.binary_search(&connection) {
            Ok(pos) => {
                self.connections.remove(pos);
                self.schedule_rebuild();
                true
            }
            Err(_) => false,
        }
    }

    /// Removes the node's connections selected by `filter`. Returns
    /// whether anything changed.
    pub fn disconnect_node(&mut self, node_id: u32, filter: DisconnectFilter) -> bool {
        let before = self.connections.len();
        let removable: Vec<Connection> = self
            .connections
            .iter()
            .copied()
            .filter(|c| {
                let touches = (c.source_node == node_id && filter.outputs)
                    || (c.dest_node == node_id && filter.inputs);
                if !touches {
                    return false;
                }
                match self
                    .node(c.source_node)
                    .map(|n| n.ports().port_type(c.source_port))
                {
                    Some(PortType::Audio) => filter.audio,
                    Some(PortType::Midi) => filter.midi,
                    _ => true,
                }
            })
            .collect();
        self.connections.retain(|c| !removable.contains(c));
        if self.connections.len() != before {
            self.schedule_rebuild();
            true
        } else {
            false
        }
    }

    /// Purges connections whose endpoints no longer exist or no longer
    /// line up after a port layout change. Returns whether anything
    /// changed.
    pub fn remove_illegal_connections(&mut self) -> bool {
        let before = self.connections.len();
        let legal: Vec<Connection> = self
            .connections
            .iter()
            .copied()
            .filter(|c| self.is_connection_legal(c))
            .collect();
        self.connections = legal;
        if self.connections.len() != before {
            tracing::debug!(removed = before - self.connections.len(), "illegal connections purged");
            self.schedule_rebuild();
            true
        } else {
            false
        }
    }

    /// Enables or disables a node, rescheduling the graph.
    pub fn set_node_enabled(&mut self, node_id: u32, enabled: bool) -> Result<()> {
        let prepared = self.prepared;
        let sample_rate = self.sample_rate;
        let block_size = self.block_size;
        let node = self
            .node_mut(node_id)
            .ok_or(GraphError::InvalidNodeId(node_id))?;
        node.controls().set_enabled(enabled);
        if enabled && prepared && !node.is_prepared() {
            node.prepare(sample_rate, block_size)?;
        }
        if !enabled {
            node.unprepare();
        }
        self.schedule_rebuild();
        Ok(())
    }

    /// Bypasses or resumes a node; it stays in the schedule.
    pub fn set_node_bypassed(&mut self, node_id: u32, bypassed: bool) -> Result<()> {
        self.node(node_id)
            .ok_or(GraphError::InvalidNodeId(node_id))?
            .controls()
            .set_bypassed(bypassed);
        Ok(())
    }

    /// Render-fault status of a node: `Ok` while healthy,
    /// [`GraphError::NodeRenderFault`] after its `render` aborted.
    ///
    /// A faulted node keeps rendering bypassed until the host clears the
    /// flag through [`NodeControls::clear_fault`](crate::node::NodeControls::clear_fault).
    pub fn node_render_status(&self, node_id: u32) -> Result<()> {
        let node = self
            .node(node_id)
            .ok_or(GraphError::InvalidNodeId(node_id))?;
        if node.controls().is_faulted() {
            return Err(GraphError::NodeRenderFault { node: node_id });
        }
        Ok(())
    }

    // --- graph-level MIDI settings ---

    /// Sets the channel mask applied to incoming MIDI.
    pub fn set_midi_channel_mask(&mut self, mask: MidiChannels) {
        self.midi_channels = mask;
    }

    /// The channel mask applied to incoming MIDI.
    pub fn midi_channel_mask(&self) -> MidiChannels {
        self.midi_channels
    }

    /// Sets the velocity curve applied to incoming note-ons.
    pub fn set_velocity_curve(&mut self, mode: VelocityCurveMode) {
        self.velocity_curve.set_mode(mode);
    }

    /// The velocity curve mode in effect.
    pub fn velocity_curve(&self) -> VelocityCurveMode {
        self.velocity_curve.mode()
    }

    // --- lifecycle ---

    /// Prepares every child for `(sample_rate, block_size)` and compiles
    /// the plan.
    ///
    /// A child whose `prepare` fails is left unprepared and excluded from
    /// the schedule; the graph continues without it.
    pub fn prepare(&mut self, sample_rate: f64, block_size: usize) -> Result<()> {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        let inputs = self.ports.count(PortType::Audio, PortFlow::Input) as usize;
        let outputs = self.ports.count(PortType::Audio, PortFlow::Output) as usize;
        self.input_stage = vec![vec![0.0; block_size]; inputs];
        self.output_stage = vec![vec![0.0; block_size]; outputs];

        for node in &mut self.nodes {
            if let Err(error) = node.prepare(sample_rate, block_size) {
                tracing::warn!(node = node.id(), %error, "node failed to prepare; excluded from schedule");
            }
        }
        self.prepared = true;
        self.rebuild();
        if let Some(plan) = self.pending_plan.take() {
            self.plan = plan;
        }
        tracing::info!(
            sample_rate,
            block_size,
            nodes = self.nodes.len(),
            connections = self.connections.len(),
            "graph prepared"
        );
        Ok(())
    }

    /// Releases every child and drops the plan and pools.
    pub fn release(&mut self) {
        for node in &mut self.nodes {
            node.unprepare();
        }
        self.plan = RenderPlan::empty();
        self.pending_plan = None;
        self.prepared = false;
        self.input_stage.clear();
        self.output_stage.clear();
        tracing::info!("graph released");
    }

    /// Resets every child's internal state.
    pub fn reset(&mut self) {
        for node in &mut self.nodes {
            node.reset();
        }
    }

    fn schedule_rebuild(&mut self) {
        if self.prepared {
            self.rebuild();
        }
    }

    fn rebuild(&mut self) {
        let plan = build_render_plan(&self.nodes, &self.connections, self.block_size);
        tracing::debug!(
            ops = plan.num_ops(),
            audio_buffers = plan.num_audio_buffers(),
            midi_buffers = plan.num_midi_buffers(),
            latency = plan.total_latency(),
            "render sequence rebuilt"
        );
        self.pending_plan = Some(plan);
    }

    // --- rendering ---

    /// Renders one block in place from a host audio callback.
    ///
    /// `audio` channels carry the outer input on entry and receive the
    /// outer output on return; `midi` carries incoming events on entry
    /// and the graph's MIDI output on return. The frame count is the
    /// length of the first channel, clamped to the prepared block size.
    pub fn process_block(&mut self, audio: &mut [&mut [f32]], midi: &mut MidiBuffer) -> Result<()> {
        if !self.prepared {
            return Err(GraphError::NotPrepared);
        }
        let frames = audio
            .first()
            .map_or(self.block_size, |c| c.len())
            .min(self.block_size);

        for (stage, channel) in self.input_stage.iter_mut().zip(audio.iter()) {
            stage[..frames].copy_from_slice(&channel[..frames]);
        }
        for stage in self.input_stage.iter_mut().skip(audio.len()) {
            stage[..frames].fill(0.0);
        }
        self.midi_in_stage.clear();
        self.midi_in_stage.add_buffer(midi, 0, frames as u32, 0);

        self.render_block(frames);

        for (channel, stage) in audio.iter_mut().zip(self.output_stage.iter()) {
            channel[..frames].copy_from_slice(&stage[..frames]);
        }
        for channel in audio.iter_mut().skip(self.output_stage.len()) {
            channel[..frames].fill(0.0);
        }
        midi.clear();
        midi.add_buffer(&self.midi_out_stage, 0, frames as u32, 0);
        Ok(())
    }

    fn render_block(&mut self, frames: usize) {
        // Safe point: adopt a freshly compiled plan, pools and all.
        if let Some(plan) = self.pending_plan.take() {
            self.plan = plan;
        }
        for stage in &mut self.output_stage {
            stage[..frames].fill(0.0);
        }
        self.midi_out_stage.clear();

        if !self.midi_channels.is_omni() || self.velocity_curve.mode() != VelocityCurveMode::Linear
        {
            self.filtered_midi.clear();
            for ev in self.midi_in_stage.iter() {
                let mut msg = ev.message;
                if let Some(ch) = msg.channel()
                    && !self.midi_channels.contains(ch)
                {
                    continue;
                }
                if msg.is_note_on() {
                    msg.set_velocity_float(self.velocity_curve.process(msg.velocity_float()));
                }
                self.filtered_midi.add_event(msg, ev.frame);
            }
            self.midi_in_stage.swap(&mut self.filtered_midi);
            self.filtered_midi.clear();
        }

        let RenderPlan {
            ops,
            audio_pool,
            midi_pool,
            ..
        } = &mut self.plan;
        audio_pool.clear(SILENCE_BUFFER);
        midi_pool[SILENCE_BUFFER].clear();

        let mut ctx = RenderContext {
            audio: audio_pool,
            midi: midi_pool.as_mut_slice(),
            input_stage: &self.input_stage,
            output_stage: &mut self.output_stage,
            midi_in: &mut self.midi_in_stage,
            midi_out: &mut self.midi_out_stage,
            frames,
        };
        for op in ops.iter_mut() {
            op.perform(&mut ctx, &mut self.nodes);
        }
    }

    // --- internals ---

    fn validate_connection(
        &self,
        source_node: u32,
        source_port: u32,
        dest_node: u32,
        dest_port: u32,
    ) -> Result<()> {
        if source_node == dest_node {
            return Err(GraphError::SelfConnection(source_node));
        }
        let source = self
            .node(source_node)
            .ok_or(GraphError::InvalidNodeId(source_node))?;
        if !source.ports().is_output(source_port) {
            return Err(GraphError::InvalidPort {
                node: source_node,
                port: source_port,
            });
        }
        let dest = self
            .node(dest_node)
            .ok_or(GraphError::InvalidNodeId(dest_node))?;
        if !dest.ports().is_input(dest_port) {
            return Err(GraphError::InvalidPort {
                node: dest_node,
                port: dest_port,
            });
        }
        let source_type = source.ports().port_type(source_port);
        let dest_type = dest.ports().port_type(dest_port);
        if !source_type.can_connect(dest_type) {
            return Err(GraphError::TypeMismatch {
                source_port: source_type,
                dest: dest_type,
            });
        }
        Ok(())
    }

    fn is_connection_legal(&self, c: &Connection) -> bool {
        let (Some(source), Some(dest)) = (self.node(c.source_node), self.node(c.dest_node)) else {
            return false;
        };
        source.ports().is_output(c.source_port)
            && dest.ports().is_input(c.dest_port)
            && source
                .ports()
                .port_type(c.source_port)
                .can_connect(dest.ports().port_type(c.dest_port))
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for Graph {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports(&self) -> PortList {
        self.ports.clone()
    }

    fn prepare(&mut self, sample_rate: f64, block_size: usize) -> std::result::Result<(), PrepareError> {
        Graph::prepare(self, sample_rate, block_size)
            .map_err(|e| PrepareError::new(e.to_string()))
    }

    fn release(&mut self) {
        Graph::release(self);
    }

    fn reset(&mut self) {
        Graph::reset(self);
    }

    fn render(
        &mut self,
        audio: &mut AudioView<'_>,
        midi: &mut MidiPipe<'_>,
    ) -> std::result::Result<(), RenderFault> {
        let frames = audio.num_frames().min(self.block_size);
        if !self.prepared {
            for channel in 0..audio.num_outputs() {
                audio.clear_channel(channel);
            }
            return Ok(());
        }

        for channel in 0..self.input_stage.len() {
            if channel < audio.num_inputs() {
                let src = audio.channel(channel);
                self.input_stage[channel][..frames].copy_from_slice(&src[..frames]);
            } else {
                self.input_stage[channel][..frames].fill(0.0);
            }
        }
        self.midi_in_stage.clear();
        if !midi.is_empty() {
            self.midi_in_stage.add_buffer(midi.read(0), 0, frames as u32, 0);
        }

        self.render_block(frames);

        for channel in 0..audio.num_outputs().min(self.output_stage.len()) {
            audio.channel_mut(channel)[..frames]
                .copy_from_slice(&self.output_stage[channel][..frames]);
        }
        for channel in self.output_stage.len()..audio.num_outputs() {
            audio.clear_channel(channel);
        }
        if !midi.is_empty() {
            let out = midi.write(0);
            out.clear();
            out.add_buffer(&self.midi_out_stage, 0, frames as u32, 0);
        }
        Ok(())
    }

    fn latency_samples(&self) -> u32 {
        self.total_latency_samples()
    }
}
