//! The compiled render sequence and its operations.
//!
//! A [`RenderPlan`] is the product of the builder: a flat list of
//! [`RenderOp`]s plus the shared audio and MIDI pools sized to exactly
//! what the ops reference. The engine executes the ops in order once per
//! block; that order is the only synchronization between producers and
//! consumers inside a callback.
//!
//! Ops are variants of a tagged enum with a `perform` dispatch per op.
//! Everything an op needs at render time is owned by the plan (delay
//! lines, MIDI scratch), so executing a plan never allocates.

use tejido_midi::{MidiBuffer, MidiPipe, MidiTranspose};

use crate::buffer::{AudioBufferPool, AudioView, DelayLine, SILENCE_BUFFER};
use crate::node::{Node, NodeKind};

/// Everything an op may touch while the plan executes.
pub(crate) struct RenderContext<'a> {
    /// Shared audio pool owned by the plan.
    pub audio: &'a mut AudioBufferPool,
    /// Shared MIDI pool owned by the plan.
    pub midi: &'a mut [MidiBuffer],
    /// The outer audio input, staged per channel.
    pub input_stage: &'a [Vec<f32>],
    /// The outer audio output accumulator, staged per channel.
    pub output_stage: &'a mut [Vec<f32>],
    /// The effective outer MIDI input (already filtered by the graph).
    pub midi_in: &'a mut MidiBuffer,
    /// The outer MIDI output being collected.
    pub midi_out: &'a mut MidiBuffer,
    /// Frames in this block.
    pub frames: usize,
}

/// One entry in the compiled plan.
pub(crate) enum RenderOp {
    /// Zero an audio buffer.
    ClearAudio { buffer: usize },
    /// Copy one audio buffer into another.
    CopyAudio { source: usize, dest: usize },
    /// Mix one audio buffer into another.
    AddAudio { source: usize, dest: usize },
    /// Delay an audio buffer in place for latency compensation.
    DelayAudio { buffer: usize, delay: DelayLine },
    /// Empty a MIDI buffer.
    ClearMidi { buffer: usize },
    /// Replace one MIDI buffer's events with another's.
    CopyMidi { source: usize, dest: usize },
    /// Merge one MIDI buffer's events into another at offset 0.
    AddMidi { source: usize, dest: usize },
    /// Run one node's render step.
    Process(ProcessOp),
}

/// Split borrow of two distinct MIDI pool entries.
fn midi_pair(buffers: &mut [MidiBuffer], source: usize, dest: usize) -> (&MidiBuffer, &mut MidiBuffer) {
    assert_ne!(source, dest);
    if source < dest {
        let (head, tail) = buffers.split_at_mut(dest);
        (&head[source], &mut tail[0])
    } else {
        let (head, tail) = buffers.split_at_mut(source);
        (&tail[0], &mut head[dest])
    }
}

impl RenderOp {
    pub(crate) fn perform(&mut self, ctx: &mut RenderContext<'_>, nodes: &mut [Node]) {
        let frames = ctx.frames;
        match self {
            RenderOp::ClearAudio { buffer } => {
                ctx.audio.buffer_mut(*buffer)[..frames].fill(0.0);
            }
            RenderOp::CopyAudio { source, dest } => {
                let (src, dst) = ctx.audio.pair_mut(*source, *dest);
                dst[..frames].copy_from_slice(&src[..frames]);
            }
            RenderOp::AddAudio { source, dest } => {
                let (src, dst) = ctx.audio.pair_mut(*source, *dest);
                for (d, s) in dst[..frames].iter_mut().zip(&src[..frames]) {
                    *d += *s;
                }
            }
            RenderOp::DelayAudio { buffer, delay } => {
                delay.process(&mut ctx.audio.buffer_mut(*buffer)[..frames]);
            }
            RenderOp::ClearMidi { buffer } => {
                ctx.midi[*buffer].clear();
            }
            RenderOp::CopyMidi { source, dest } => {
                let (src, dst) = midi_pair(ctx.midi, *source, *dest);
                dst.copy_from(src);
            }
            RenderOp::AddMidi { source, dest } => {
                let (src, dst) = midi_pair(ctx.midi, *source, *dest);
                dst.add_buffer(src, 0, frames as u32, 0);
            }
            RenderOp::Process(op) => op.perform(ctx, nodes),
        }
    }

    /// Stable one-line description, used for plan introspection and tests.
    pub(crate) fn summary(&self) -> String {
        match self {
            RenderOp::ClearAudio { buffer } => format!("clear-audio {buffer}"),
            RenderOp::CopyAudio { source, dest } => format!("copy-audio {source} -> {dest}"),
            RenderOp::AddAudio { source, dest } => format!("add-audio {source} -> {dest}"),
            RenderOp::DelayAudio { buffer, delay } => {
                format!("delay-audio {buffer} by {}", delay.delay())
            }
            RenderOp::ClearMidi { buffer } => format!("clear-midi {buffer}"),
            RenderOp::CopyMidi { source, dest } => format!("copy-midi {source} -> {dest}"),
            RenderOp::AddMidi { source, dest } => format!("add-midi {source} -> {dest}"),
            RenderOp::Process(op) => format!(
                "process node {} audio {:?} midi {:?}",
                op.node_id, op.audio_channels, op.midi_channels
            ),
        }
    }
}

/// The render step for one node.
///
/// Assembles the node's channel view over the shared pools, applies input
/// gain (ramped on change), runs the node-level MIDI filters, dispatches
/// to `render`/`render_bypassed`/silence, applies output gain, refreshes
/// the RMS meters, and snapshots the gains for the next block's ramp.
pub(crate) struct ProcessOp {
    pub node_index: usize,
    pub node_id: u32,
    pub audio_channels: Vec<usize>,
    pub midi_channels: Vec<usize>,
    pub num_audio_ins: usize,
    pub num_audio_outs: usize,
    pub num_midi_ins: usize,
    pub num_midi_outs: usize,
    /// Pool index of the node's primary MIDI input, for the filter stage.
    pub midi_input: usize,
    scratch_midi: MidiBuffer,
}

impl ProcessOp {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        node_index: usize,
        node_id: u32,
        audio_channels: Vec<usize>,
        midi_channels: Vec<usize>,
        num_audio_ins: usize,
        num_audio_outs: usize,
        num_midi_ins: usize,
        num_midi_outs: usize,
        midi_input: usize,
    ) -> Self {
        Self {
            node_index,
            node_id,
            audio_channels,
            midi_channels,
            num_audio_ins,
            num_audio_outs,
            num_midi_ins,
            num_midi_outs,
            midi_input,
            scratch_midi: MidiBuffer::new(),
        }
    }

    fn silence_outputs(&self, ctx: &mut RenderContext<'_>) {
        let frames = ctx.frames;
        for c in 0..self.num_audio_outs {
            let buf = self.audio_channels[c];
            if buf != SILENCE_BUFFER {
                ctx.audio.buffer_mut(buf)[..frames].fill(0.0);
            }
        }
        for c in 0..self.num_midi_outs {
            ctx.midi[self.midi_channels[c]].clear();
        }
    }

    fn filter_midi_input(&mut self, ctx: &mut RenderContext<'_>, node: &Node) {
        if self.num_midi_ins == 0 {
            return;
        }
        let controls = node.controls();
        let transpose = controls.transpose();
        let (key_low, key_high) = controls.key_range();
        let mask = controls.midi_channels();
        let midi = &mut ctx.midi[self.midi_input];

        if (key_low, key_high) != (0, 127) || !mask.is_omni() {
            self.scratch_midi.clear();
            for ev in midi.iter() {
                let mut msg = ev.message;
                if msg.is_note_on_or_off() && (msg.note() < key_low || msg.note() > key_high) {
                    continue;
                }
                if let Some(ch) = msg.channel()
                    && !mask.contains(ch)
                {
                    continue;
                }
                MidiTranspose::process_message(&mut msg, transpose);
                self.scratch_midi.add_event(msg, ev.frame);
            }
            midi.swap(&mut self.scratch_midi);
            self.scratch_midi.clear();
        } else if transpose != 0 {
            for ev in midi.iter_mut() {
                MidiTranspose::process_message(&mut ev.message, transpose);
            }
        }
    }

    fn perform(&mut self, ctx: &mut RenderContext<'_>, nodes: &mut [Node]) {
        let Some(node) = nodes.get_mut(self.node_index) else {
            return;
        };
        let frames = ctx.frames;
        let controls = node.controls().clone();

        // Disabled nodes render silence; downstream sees empty buffers.
        if !controls.is_enabled() {
            self.silence_outputs(ctx);
            return;
        }

        let input_gain = controls.input_gain();
        {
            let mut view = AudioView::new(
                ctx.audio,
                &self.audio_channels,
                self.num_audio_ins,
                self.num_audio_outs,
                frames,
            );
            if input_gain != node.last_input_gain {
                view.apply_gain_ramp(node.last_input_gain, input_gain);
            } else {
                view.apply_gain(input_gain);
            }
            for c in 0..self.num_audio_ins {
                node.meters().set_input_rms(c, view.rms(c));
            }
        }

        self.filter_midi_input(ctx, node);

        let suspended = controls.is_bypassed() || controls.is_faulted();
        let mut faulted = false;
        match &mut node.kind {
            NodeKind::AudioInput { .. } => {
                for (c, &buf) in self.audio_channels.iter().enumerate() {
                    if buf == SILENCE_BUFFER {
                        continue;
                    }
                    let dst = &mut ctx.audio.buffer_mut(buf)[..frames];
                    match ctx.input_stage.get(c) {
                        Some(src) => dst.copy_from_slice(&src[..frames]),
                        None => dst.fill(0.0),
                    }
                }
            }
            NodeKind::AudioOutput { .. } => {
                let drained = self.num_audio_ins.min(ctx.output_stage.len());
                for c in 0..drained {
                    let src = &ctx.audio.buffer(self.audio_channels[c])[..frames];
                    for (d, s) in ctx.output_stage[c][..frames].iter_mut().zip(src) {
                        *d += *s;
                    }
                }
            }
            NodeKind::MidiInput => {
                if let Some(&buf) = self.midi_channels.first() {
                    ctx.midi[buf].clear();
                    ctx.midi[buf].add_buffer(ctx.midi_in, 0, frames as u32, 0);
                    ctx.midi_in.clear();
                }
            }
            NodeKind::MidiOutput => {
                if let Some(&buf) = self.midi_channels.first() {
                    ctx.midi_out.clear();
                    ctx.midi_out.add_buffer(&ctx.midi[buf], 0, frames as u32, 0);
                    ctx.midi[buf].clear();
                }
            }
            NodeKind::Processor(p) => {
                let mut view = AudioView::new(
                    ctx.audio,
                    &self.audio_channels,
                    self.num_audio_ins,
                    self.num_audio_outs,
                    frames,
                );
                let mut pipe = MidiPipe::new(ctx.midi, &self.midi_channels);
                if suspended {
                    p.render_bypassed(&mut view, &mut pipe);
                } else if p.render(&mut view, &mut pipe).is_err() {
                    faulted = true;
                }
            }
        }

        if faulted {
            controls.set_faulted(true);
            self.silence_outputs(ctx);
        }

        let gain = controls.gain();
        {
            let mut view = AudioView::new(
                ctx.audio,
                &self.audio_channels,
                self.num_audio_ins,
                self.num_audio_outs,
                frames,
            );
            if gain != node.last_gain {
                view.apply_gain_ramp(node.last_gain, gain);
            } else {
                view.apply_gain(gain);
            }
            for c in 0..self.num_audio_outs {
                node.meters().set_output_rms(c, view.rms(c));
            }
        }
        node.last_gain = gain;
        node.last_input_gain = input_gain;
    }
}

/// A compiled, immutable-by-the-editor snapshot of the graph.
///
/// Owns the ops and the shared pools they index. Swapping plans swaps the
/// pools with them, so a plan never runs against buffers sized for
/// another plan.
pub struct RenderPlan {
    pub(crate) ops: Vec<RenderOp>,
    pub(crate) audio_pool: AudioBufferPool,
    pub(crate) midi_pool: Vec<MidiBuffer>,
    pub(crate) total_latency: u32,
}

impl RenderPlan {
    pub(crate) fn new(
        ops: Vec<RenderOp>,
        num_audio_buffers: usize,
        num_midi_buffers: usize,
        total_latency: u32,
        block_size: usize,
    ) -> Self {
        Self {
            ops,
            audio_pool: AudioBufferPool::new(num_audio_buffers, block_size),
            midi_pool: (0..num_midi_buffers.max(1)).map(|_| MidiBuffer::new()).collect(),
            total_latency,
        }
    }

    /// A plan that renders nothing.
    pub(crate) fn empty() -> Self {
        Self::new(Vec::new(), 1, 1, 0, 0)
    }

    /// Number of ops in the plan.
    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    /// Shared audio buffers the plan requires.
    pub fn num_audio_buffers(&self) -> usize {
        self.audio_pool.count()
    }

    /// Shared MIDI buffers the plan requires.
    pub fn num_midi_buffers(&self) -> usize {
        self.midi_pool.len()
    }

    /// Compensated end-to-end latency of the graph, in samples.
    pub fn total_latency(&self) -> u32 {
        self.total_latency
    }

    /// Stable one-line descriptions of every op, in execution order.
    pub fn op_summaries(&self) -> Vec<String> {
        self.ops.iter().map(RenderOp::summary).collect()
    }
}

impl std::fmt::Debug for RenderPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPlan")
            .field("ops", &self.ops.len())
            .field("audio_buffers", &self.audio_pool.count())
            .field("midi_buffers", &self.midi_pool.len())
            .field("total_latency", &self.total_latency)
            .finish()
    }
}
