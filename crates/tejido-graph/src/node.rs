//! The node contract and the graph's node wrapper.
//!
//! A [`Processor`] is the unit of DSP the graph schedules: it declares a
//! port surface, allocates against a sample rate and block size in
//! `prepare`, and renders blocks through an [`AudioView`] and a
//! [`MidiPipe`]. The graph wraps every processor (and the built-in IO
//! behaviors) in a [`Node`], which adds the stable id, the rebuilt port
//! list, and the control state the audio thread reads while control
//! threads write: gains, bypass, enable, MIDI filters, and meters.
//!
//! Control state lives in an [`Arc<NodeControls>`] of atomic scalars, so
//! a UI or automation thread can hold a handle and adjust a node while
//! the audio thread renders. Changes become audible at the next block
//! boundary; the per-block gain ramp keeps them click-free.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, AtomicU16, AtomicU32, Ordering};

use tejido_midi::{MidiChannels, MidiPipe};

use crate::buffer::AudioView;
use crate::error::{GraphError, PrepareError, RenderFault};
use crate::port::{PortConfig, PortFlow, PortList, PortType};

/// An `f32` stored in an atomic, for control values shared across threads.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    /// A new atomic holding `value`.
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    /// The current value.
    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Replaces the value.
    #[inline]
    pub fn set(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// A processing unit schedulable by the graph.
///
/// Implementations must not block or allocate inside [`render`](Self::render);
/// everything sized by the sample rate or block size belongs in
/// [`prepare`](Self::prepare). Partial preparation is forbidden: a failing
/// `prepare` must release anything it already allocated.
pub trait Processor: Send {
    /// Display name of the processor.
    fn name(&self) -> &str;

    /// Describes the I/O surface. Called whenever the owning node rebuilds
    /// its ports; the result must stay constant between port resets.
    fn ports(&self) -> PortList;

    /// Allocates render resources for `(sample_rate, block_size)`.
    ///
    /// Idempotent: may be called again after [`release`](Self::release).
    fn prepare(&mut self, sample_rate: f64, block_size: usize) -> Result<(), PrepareError>;

    /// Releases render resources. Safe to call when unprepared.
    fn release(&mut self);

    /// Clears internal state without touching parameters.
    fn reset(&mut self) {}

    /// Processes exactly `audio.num_frames()` frames.
    ///
    /// Audio channels alias shared buffers laid out for in-place work;
    /// MIDI buffers are indexed per the node's MIDI port order. An error
    /// return is contained by the engine: outputs are silenced for the
    /// block and the node is flagged faulted.
    fn render(&mut self, audio: &mut AudioView<'_>, midi: &mut MidiPipe<'_>) -> Result<(), RenderFault>;

    /// Pass-through rendering used while the node is bypassed.
    ///
    /// The default keeps output channels that alias inputs untouched and
    /// silences outputs beyond the input count; MIDI flows through
    /// untouched wherever out ports alias in ports.
    fn render_bypassed(&mut self, audio: &mut AudioView<'_>, _midi: &mut MidiPipe<'_>) {
        for channel in audio.num_inputs()..audio.num_outputs() {
            audio.clear_channel(channel);
        }
    }

    /// Latency this processor contributes, in samples.
    ///
    /// May change only between prepares.
    fn latency_samples(&self) -> u32 {
        0
    }

    /// Appends an opaque state blob for host persistence.
    fn get_state(&self, _out: &mut Vec<u8>) {}

    /// Restores state from a blob produced by [`get_state`](Self::get_state).
    fn set_state(&mut self, _blob: &[u8]) {}
}

/// Names a node type: a factory format plus an identifier within it.
///
/// The graph stores the pair verbatim for hosts and factories; it never
/// parses either string. The only identifiers the engine itself
/// recognizes are the built-in IO nodes (see [`NodeKind::identifier`]).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeDescriptor {
    /// Factory format name, e.g. `internal`.
    pub format: String,
    /// Node type identifier within the format, e.g. `audio.input`.
    pub identifier: String,
}

impl NodeDescriptor {
    /// Builds a descriptor from the two strings.
    pub fn new(format: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            identifier: identifier.into(),
        }
    }
}

/// The behavior backing a node.
///
/// IO variants move samples and events between the outer callback and the
/// graph interior; everything else is a user [`Processor`]. The scheduler
/// only looks at port layout and latency, never at the variant.
pub enum NodeKind {
    /// Publishes the outer audio input on its output ports.
    AudioInput {
        /// Channels exposed to the graph.
        channels: u32,
    },
    /// Accumulates its input ports into the outer audio output.
    AudioOutput {
        /// Channels drained to the outer output.
        channels: u32,
    },
    /// Publishes the outer MIDI input on its output port.
    MidiInput,
    /// Drains its input port to the outer MIDI output.
    MidiOutput,
    /// A user-provided processor (including nested graphs).
    Processor(Box<dyn Processor>),
}

impl NodeKind {
    /// The stable identifier of a built-in IO behavior, `None` for user
    /// processors.
    pub fn identifier(&self) -> Option<&'static str> {
        match self {
            NodeKind::AudioInput { .. } => Some("audio.input"),
            NodeKind::AudioOutput { .. } => Some("audio.output"),
            NodeKind::MidiInput => Some("midi.input"),
            NodeKind::MidiOutput => Some("midi.output"),
            NodeKind::Processor(_) => None,
        }
    }
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::AudioInput { channels } => write!(f, "AudioInput({channels})"),
            NodeKind::AudioOutput { channels } => write!(f, "AudioOutput({channels})"),
            NodeKind::MidiInput => write!(f, "MidiInput"),
            NodeKind::MidiOutput => write!(f, "MidiOutput"),
            NodeKind::Processor(p) => write!(f, "Processor({})", p.name()),
        }
    }
}

/// Control state read on the audio thread, written from anywhere.
#[derive(Debug)]
pub struct NodeControls {
    gain: AtomicF32,
    input_gain: AtomicF32,
    enabled: AtomicBool,
    bypassed: AtomicBool,
    faulted: AtomicBool,
    transpose: AtomicI32,
    key_range_low: AtomicU8,
    key_range_high: AtomicU8,
    midi_channels: AtomicU16,
}

impl NodeControls {
    fn new() -> Self {
        Self {
            gain: AtomicF32::new(1.0),
            input_gain: AtomicF32::new(1.0),
            enabled: AtomicBool::new(true),
            bypassed: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            transpose: AtomicI32::new(0),
            key_range_low: AtomicU8::new(0),
            key_range_high: AtomicU8::new(127),
            midi_channels: AtomicU16::new(MidiChannels::omni().bits()),
        }
    }

    /// Output gain applied after `render`.
    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    /// Sets the output gain; ramped over the next block.
    pub fn set_gain(&self, gain: f32) {
        self.gain.set(gain);
    }

    /// Input gain applied before `render`.
    pub fn input_gain(&self) -> f32 {
        self.input_gain.get()
    }

    /// Sets the input gain; ramped over the next block.
    pub fn set_input_gain(&self, gain: f32) {
        self.input_gain.set(gain);
    }

    /// True while the node participates in rendering.
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enables or disables the node, effective at the next block boundary.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// True while the node renders through `render_bypassed`.
    pub fn is_bypassed(&self) -> bool {
        self.bypassed.load(Ordering::Relaxed)
    }

    /// Bypasses or resumes the node, effective at the next block boundary.
    pub fn set_bypassed(&self, bypassed: bool) {
        self.bypassed.store(bypassed, Ordering::Relaxed);
    }

    /// True after a render fault; cleared by [`clear_fault`](Self::clear_fault).
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Relaxed)
    }

    /// Marks the node faulted. Set by the engine when `render` errors.
    pub fn set_faulted(&self, faulted: bool) {
        self.faulted.store(faulted, Ordering::Relaxed);
    }

    /// Clears the fault flag so the node renders normally again.
    pub fn clear_fault(&self) {
        self.set_faulted(false);
    }

    /// Semitone offset applied to this node's incoming notes.
    pub fn transpose(&self) -> i32 {
        self.transpose.load(Ordering::Relaxed)
    }

    /// Sets the semitone offset.
    pub fn set_transpose(&self, offset: i32) {
        self.transpose.store(offset, Ordering::Relaxed);
    }

    /// Inclusive note window accepted by this node.
    pub fn key_range(&self) -> (u8, u8) {
        (
            self.key_range_low.load(Ordering::Relaxed),
            self.key_range_high.load(Ordering::Relaxed),
        )
    }

    /// Sets the inclusive note window.
    pub fn set_key_range(&self, low: u8, high: u8) {
        debug_assert!(low <= high);
        self.key_range_low.store(low.min(127), Ordering::Relaxed);
        self.key_range_high.store(high.min(127), Ordering::Relaxed);
    }

    /// Channel mask applied to this node's incoming MIDI.
    pub fn midi_channels(&self) -> MidiChannels {
        MidiChannels::from_bits(self.midi_channels.load(Ordering::Relaxed))
    }

    /// Sets the channel mask.
    pub fn set_midi_channels(&self, channels: MidiChannels) {
        self.midi_channels.store(channels.bits(), Ordering::Relaxed);
    }
}

/// Per-channel RMS levels published by the render step.
#[derive(Debug, Default)]
pub struct NodeMeters {
    input: Vec<AtomicF32>,
    output: Vec<AtomicF32>,
}

impl NodeMeters {
    fn sized(inputs: usize, outputs: usize) -> Self {
        Self {
            input: (0..inputs).map(|_| AtomicF32::new(0.0)).collect(),
            output: (0..outputs).map(|_| AtomicF32::new(0.0)).collect(),
        }
    }

    /// RMS of input channel `channel` over the last block.
    pub fn input_rms(&self, channel: usize) -> f32 {
        self.input.get(channel).map_or(0.0, AtomicF32::get)
    }

    /// RMS of output channel `channel` over the last block.
    pub fn output_rms(&self, channel: usize) -> f32 {
        self.output.get(channel).map_or(0.0, AtomicF32::get)
    }

    pub(crate) fn set_input_rms(&self, channel: usize, value: f32) {
        if let Some(meter) = self.input.get(channel) {
            meter.set(value);
        }
    }

    pub(crate) fn set_output_rms(&self, channel: usize, value: f32) {
        if let Some(meter) = self.output.get(channel) {
            meter.set(value);
        }
    }
}

/// A node in a graph: a behavior plus identity, ports, and control state.
pub struct Node {
    pub(crate) id: u32,
    name: String,
    pub(crate) kind: NodeKind,
    descriptor: Option<NodeDescriptor>,
    ports: PortList,
    controls: Arc<NodeControls>,
    meters: Arc<NodeMeters>,
    prepared: bool,
    sample_rate: f64,
    block_size: usize,
    // Gain values the last block ended on, for click-free ramps. Audio
    // thread only.
    pub(crate) last_gain: f32,
    pub(crate) last_input_gain: f32,
}

impl Node {
    fn with_kind(name: impl Into<String>, kind: NodeKind) -> Self {
        let mut node = Self {
            id: 0,
            name: name.into(),
            kind,
            descriptor: None,
            ports: PortList::new(),
            controls: Arc::new(NodeControls::new()),
            meters: Arc::new(NodeMeters::default()),
            prepared: false,
            sample_rate: 0.0,
            block_size: 0,
            last_gain: 1.0,
            last_input_gain: 1.0,
        };
        node.reset_ports();
        node
    }

    /// Wraps a processor in a node.
    pub fn new(processor: Box<dyn Processor>) -> Self {
        let name = processor.name().to_string();
        Self::with_kind(name, NodeKind::Processor(processor))
    }

    /// The built-in audio input node with `channels` channels.
    pub fn audio_input(channels: u32) -> Self {
        Self::with_kind("Audio Input", NodeKind::AudioInput { channels })
    }

    /// The built-in audio output node with `channels` channels.
    pub fn audio_output(channels: u32) -> Self {
        Self::with_kind("Audio Output", NodeKind::AudioOutput { channels })
    }

    /// The built-in MIDI input node.
    pub fn midi_input() -> Self {
        Self::with_kind("Midi Input", NodeKind::MidiInput)
    }

    /// The built-in MIDI output node.
    pub fn midi_output() -> Self {
        Self::with_kind("Midi Output", NodeKind::MidiOutput)
    }

    /// Stable id within the owning graph; 0 until added.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node's behavior.
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Attaches the factory descriptor this node was created from.
    pub fn with_descriptor(mut self, descriptor: NodeDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// The factory descriptor, if one was attached.
    pub fn descriptor(&self) -> Option<&NodeDescriptor> {
        self.descriptor.as_ref()
    }

    /// The node's type identifier: the built-in IO identity, or the
    /// attached descriptor's identifier.
    pub fn type_identifier(&self) -> Option<&str> {
        self.kind
            .identifier()
            .or_else(|| self.descriptor.as_ref().map(|d| d.identifier.as_str()))
    }

    /// True for the built-in audio input node.
    pub fn is_audio_input(&self) -> bool {
        matches!(self.kind, NodeKind::AudioInput { .. })
    }

    /// True for the built-in audio output node.
    pub fn is_audio_output(&self) -> bool {
        matches!(self.kind, NodeKind::AudioOutput { .. })
    }

    /// True for either built-in MIDI IO node.
    pub fn is_midi_io(&self) -> bool {
        matches!(self.kind, NodeKind::MidiInput | NodeKind::MidiOutput)
    }

    /// The wrapped processor, if this node has one.
    pub fn processor(&self) -> Option<&dyn Processor> {
        match &self.kind {
            NodeKind::Processor(p) => Some(p.as_ref()),
            _ => None,
        }
    }

    /// Mutable access to the wrapped processor, if any.
    pub fn processor_mut(&mut self) -> Option<&mut dyn Processor> {
        match &mut self.kind {
            NodeKind::Processor(p) => Some(p.as_mut()),
            _ => None,
        }
    }

    /// Shared control handle; clone it to adjust the node from any thread.
    pub fn controls(&self) -> &Arc<NodeControls> {
        &self.controls
    }

    /// Shared meter handle.
    pub fn meters(&self) -> &Arc<NodeMeters> {
        &self.meters
    }

    /// The node's port surface.
    pub fn ports(&self) -> &PortList {
        &self.ports
    }

    /// Total port count.
    pub fn num_ports(&self) -> u32 {
        self.ports.len() as u32
    }

    /// Ports of `port_type` in direction `flow`.
    pub fn port_count(&self, port_type: PortType, flow: PortFlow) -> u32 {
        self.ports.count(port_type, flow)
    }

    /// Audio input channel count.
    pub fn num_audio_inputs(&self) -> u32 {
        self.ports.count(PortType::Audio, PortFlow::Input)
    }

    /// Audio output channel count.
    pub fn num_audio_outputs(&self) -> u32 {
        self.ports.count(PortType::Audio, PortFlow::Output)
    }

    /// Port index for a type/flow channel ordinal.
    pub fn port_for_channel(&self, port_type: PortType, channel: u32, flow: PortFlow) -> Option<u32> {
        self.ports.port_for_channel(port_type, channel, flow)
    }

    /// Channel ordinal of a port index.
    pub fn channel_for_port(&self, port: u32) -> Option<u32> {
        self.ports.channel_for_port(port)
    }

    /// Rebuilds the port list from the node's behavior.
    ///
    /// Called when a node is added to a graph and whenever a processor's
    /// I/O layout changes; the graph purges connections made illegal by
    /// the new layout.
    pub fn reset_ports(&mut self) {
        self.ports = match &self.kind {
            NodeKind::AudioInput { channels } => {
                PortConfig::new().with(PortType::Audio, 0, *channels).build()
            }
            NodeKind::AudioOutput { channels } => {
                PortConfig::new().with(PortType::Audio, *channels, 0).build()
            }
            NodeKind::MidiInput => PortConfig::new().with(PortType::Midi, 0, 1).build(),
            NodeKind::MidiOutput => PortConfig::new().with(PortType::Midi, 1, 0).build(),
            NodeKind::Processor(p) => p.ports(),
        };
        self.meters = Arc::new(NodeMeters::sized(
            self.num_audio_inputs() as usize,
            self.num_audio_outputs() as usize,
        ));
    }

    /// True once `prepare` has succeeded and `release` has not run since.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Sample rate the node was prepared at.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Block size the node was prepared at.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Latency contributed by this node, in samples.
    pub fn latency_samples(&self) -> u32 {
        match &self.kind {
            NodeKind::Processor(p) => p.latency_samples(),
            _ => 0,
        }
    }

    /// Prepares the node for `(sample_rate, block_size)`.
    ///
    /// Already-prepared and disabled nodes return `Ok` without touching
    /// the processor. A failing processor leaves the node unprepared and
    /// excluded from scheduling.
    pub fn prepare(&mut self, sample_rate: f64, block_size: usize) -> Result<(), GraphError> {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        if self.prepared || !self.controls.is_enabled() {
            return Ok(());
        }
        if let NodeKind::Processor(p) = &mut self.kind {
            p.prepare(sample_rate, block_size)
                .map_err(|e| GraphError::PrepareFailed {
                    node: self.id,
                    reason: e.0,
                })?;
        }
        self.prepared = true;
        Ok(())
    }

    /// Releases render resources. Safe on unprepared nodes.
    pub fn unprepare(&mut self) {
        if self.prepared {
            self.prepared = false;
            if let NodeKind::Processor(p) = &mut self.kind {
                p.release();
            }
        }
    }

    /// Resets the wrapped processor's internal state.
    pub fn reset(&mut self) {
        if let NodeKind::Processor(p) = &mut self.kind {
            p.reset();
        }
    }

    /// Appends the node's opaque state blob.
    pub fn get_state(&self, out: &mut Vec<u8>) {
        if let NodeKind::Processor(p) = &self.kind {
            p.get_state(out);
        }
    }

    /// Restores the node's opaque state blob.
    pub fn set_state(&mut self, blob: &[u8]) {
        if let NodeKind::Processor(p) = &mut self.kind {
            p.set_state(blob);
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("prepared", &self.prepared)
            .finish()
    }
}
