//! End-to-end render scenarios exercising the builder and engine
//! together: routing, mixing, latency compensation, feedback, MIDI
//! filtering, bypass and disable, and fault containment.

use tejido_graph::{
    AudioView, DelayLine, Graph, GraphError, Node, PortConfig, PortList, PortType, PrepareError,
    Processor, RenderFault,
};
use tejido_midi::{MidiBuffer, MidiChannels, MidiMessage, MidiPipe};

/// Unity pass-through: the output channel aliases the input buffer, so
/// rendering is a no-op.
struct Pass;

impl Processor for Pass {
    fn name(&self) -> &str {
        "pass"
    }
    fn ports(&self) -> PortList {
        PortConfig::new().with(PortType::Audio, 1, 1).build()
    }
    fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
        Ok(())
    }
    fn release(&mut self) {}
    fn render(&mut self, _: &mut AudioView<'_>, _: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        Ok(())
    }
}

/// Applies a fixed factor to its single channel.
struct Gain(f32);

impl Processor for Gain {
    fn name(&self) -> &str {
        "gain"
    }
    fn ports(&self) -> PortList {
        PortConfig::new().with(PortType::Audio, 1, 1).build()
    }
    fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
        Ok(())
    }
    fn release(&mut self) {}
    fn render(&mut self, audio: &mut AudioView<'_>, _: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        for sample in audio.channel_mut(0) {
            *sample *= self.0;
        }
        Ok(())
    }
}

/// Delays its channel by `latency` frames and reports that latency.
struct Latent {
    latency: u32,
    line: DelayLine,
}

impl Latent {
    fn new(latency: u32) -> Self {
        Self {
            latency,
            line: DelayLine::new(0),
        }
    }
}

impl Processor for Latent {
    fn name(&self) -> &str {
        "latent"
    }
    fn ports(&self) -> PortList {
        PortConfig::new().with(PortType::Audio, 1, 1).build()
    }
    fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
        self.line = DelayLine::new(self.latency as usize);
        Ok(())
    }
    fn release(&mut self) {}
    fn reset(&mut self) {
        self.line.reset();
    }
    fn render(&mut self, audio: &mut AudioView<'_>, _: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        self.line.process(audio.channel_mut(0));
        Ok(())
    }
    fn latency_samples(&self) -> u32 {
        self.latency
    }
}

/// Reports latency but emits silence, to observe the compensation path
/// on its own.
struct SilentLatent(u32);

impl Processor for SilentLatent {
    fn name(&self) -> &str {
        "silent-latent"
    }
    fn ports(&self) -> PortList {
        PortConfig::new().with(PortType::Audio, 1, 1).build()
    }
    fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
        Ok(())
    }
    fn release(&mut self) {}
    fn render(&mut self, audio: &mut AudioView<'_>, _: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        audio.clear_channel(0);
        Ok(())
    }
    fn latency_samples(&self) -> u32 {
        self.0
    }
}

/// Always fails to render.
struct Faulty;

impl Processor for Faulty {
    fn name(&self) -> &str {
        "faulty"
    }
    fn ports(&self) -> PortList {
        PortConfig::new().with(PortType::Audio, 1, 1).build()
    }
    fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
        Ok(())
    }
    fn release(&mut self) {}
    fn render(&mut self, audio: &mut AudioView<'_>, _: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        // Scribble before failing; the engine must silence this.
        for sample in audio.channel_mut(0) {
            *sample = 99.0;
        }
        Err(RenderFault("induced"))
    }
}

/// Mono graph scaffold: `audio.input(1)` and `audio.output(1)` wired by
/// the caller.
fn mono_graph() -> (Graph, u32, u32) {
    let mut graph = Graph::with_ports(
        PortConfig::new()
            .with(PortType::Audio, 1, 1)
            .with(PortType::Midi, 1, 1),
    );
    let input = graph.add_node(Node::audio_input(1), None);
    let output = graph.add_node(Node::audio_output(1), None);
    (graph, input, output)
}

fn run_mono_block(graph: &mut Graph, input: &[f32]) -> Vec<f32> {
    let mut data = input.to_vec();
    let mut channels: Vec<&mut [f32]> = vec![&mut data];
    let mut midi = MidiBuffer::new();
    graph.process_block(&mut channels, &mut midi).unwrap();
    data
}

// --- §8 end-to-end scenarios ---

#[test]
fn straight_wire_is_identity() {
    let (mut graph, input, output) = mono_graph();
    graph.connect_audio(input, output).unwrap();
    graph.prepare(48000.0, 4).unwrap();

    let out = run_mono_block(&mut graph, &[1.0, 0.5, -0.25, 0.0]);
    assert_eq!(out, [1.0, 0.5, -0.25, 0.0]);
}

#[test]
fn two_sources_mix_into_one_port() {
    let mut graph = Graph::new();
    let input = graph.add_node(Node::audio_input(2), None);
    let output = graph.add_node(Node::audio_output(2), None);
    let pass = graph.add_node(Node::new(Box::new(Pass)), None);

    // Both input channels feed the pass node's single input port.
    graph
        .connect_channels(PortType::Audio, input, 0, pass, 0)
        .unwrap();
    graph
        .connect_channels(PortType::Audio, input, 1, pass, 0)
        .unwrap();
    graph
        .connect_channels(PortType::Audio, pass, 0, output, 0)
        .unwrap();
    graph.prepare(48000.0, 4).unwrap();

    let mut left = [1.0f32, 1.0, 1.0, 1.0];
    let mut right = [-1.0f32, 0.0, 1.0, 2.0];
    let mut channels: Vec<&mut [f32]> = vec![&mut left, &mut right];
    let mut midi = MidiBuffer::new();
    graph.process_block(&mut channels, &mut midi).unwrap();

    assert_eq!(left, [0.0, 1.0, 2.0, 3.0]);
}

#[test]
fn parallel_path_is_delay_compensated() {
    let (mut graph, input, output) = mono_graph();
    let latent = graph.add_node(Node::new(Box::new(Latent::new(3))), None);
    graph.connect_audio(input, latent).unwrap();
    graph.connect_audio(latent, output).unwrap();
    graph.connect_audio(input, output).unwrap();
    graph.prepare(48000.0, 8).unwrap();

    assert_eq!(graph.total_latency_samples(), 3);

    // Both paths align at the output: the impulse arrives once, doubled,
    // three samples late.
    let out = run_mono_block(&mut graph, &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    assert_eq!(out, [0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn direct_path_gets_pure_delay_when_latent_path_is_silent() {
    let (mut graph, input, output) = mono_graph();
    let latent = graph.add_node(Node::new(Box::new(SilentLatent(3))), None);
    graph.connect_audio(input, latent).unwrap();
    graph.connect_audio(latent, output).unwrap();
    graph.connect_audio(input, output).unwrap();
    graph.prepare(48000.0, 8).unwrap();

    let out = run_mono_block(&mut graph, &[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
    assert_eq!(out, [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn midi_channel_mask_filters_incoming_events() {
    let mut graph = Graph::new();
    let midi_in = graph.add_node(Node::midi_input(), None);
    let midi_out = graph.add_node(Node::midi_output(), None);
    graph.add_connection(midi_in, 0, midi_out, 0).unwrap();

    let mut mask = MidiChannels::none();
    mask.set(1, true);
    mask.set(3, true);
    graph.set_midi_channel_mask(mask);
    graph.prepare(48000.0, 64).unwrap();

    let mut midi = MidiBuffer::new();
    midi.add_event(MidiMessage::note_on(1, 60, 100), 0);
    midi.add_event(MidiMessage::note_on(2, 61, 100), 5);
    midi.add_event(MidiMessage::note_on(3, 62, 100), 9);
    midi.add_event(MidiMessage::note_on(4, 63, 100), 12);

    let mut left = [0.0f32; 64];
    let mut right = [0.0f32; 64];
    let mut channels: Vec<&mut [f32]> = vec![&mut left, &mut right];
    graph.process_block(&mut channels, &mut midi).unwrap();

    let events: Vec<(u32, Option<u8>)> = midi.iter().map(|e| (e.frame, e.message.channel())).collect();
    assert_eq!(events, [(0, Some(1)), (9, Some(3))]);
}

#[test]
fn feedback_cycle_delivers_signal_one_block_late() {
    let (mut graph, input, output) = mono_graph();
    let a = graph.add_node(Node::new(Box::new(Pass)), None);
    let b = graph.add_node(Node::new(Box::new(Pass)), None);
    graph.connect_audio(input, a).unwrap();
    graph.connect_audio(a, b).unwrap();
    graph.connect_audio(b, a).unwrap();
    graph.connect_audio(a, output).unwrap();
    graph.prepare(48000.0, 4).unwrap();

    // Block 1: the feedback edge contributes silence.
    let out = run_mono_block(&mut graph, &[1.0, 0.0, 0.0, 0.0]);
    assert_eq!(out, [1.0, 0.0, 0.0, 0.0]);

    // Block 2: the impulse comes back around, one block late.
    let out = run_mono_block(&mut graph, &[0.0, 0.0, 0.0, 0.0]);
    assert_eq!(out, [1.0, 0.0, 0.0, 0.0]);
}

#[test]
fn bypassed_node_passes_through_disabled_node_is_silent() {
    let (mut graph, input, output) = mono_graph();
    let gain = graph.add_node(Node::new(Box::new(Gain(4.0))), None);
    graph.connect_audio(input, gain).unwrap();
    graph.connect_audio(gain, output).unwrap();
    graph.prepare(48000.0, 4).unwrap();

    let out = run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]);
    assert_eq!(out, [4.0, 4.0, 4.0, 4.0]);

    // Bypassed: stays in the schedule, copies input to output.
    graph.set_node_bypassed(gain, true).unwrap();
    let out = run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]);
    assert_eq!(out, [1.0, 1.0, 1.0, 1.0]);
    graph.set_node_bypassed(gain, false).unwrap();

    // Disabled: silence, and the node leaves the schedule.
    let ops_enabled = graph.plan().num_ops();
    graph.set_node_enabled(gain, false).unwrap();
    assert!(graph.plan().num_ops() < ops_enabled);
    let out = run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]);
    assert_eq!(out, [0.0, 0.0, 0.0, 0.0]);
}

// --- boundary behaviors ---

#[test]
fn single_frame_blocks_are_bit_exact() {
    let (mut graph, input, output) = mono_graph();
    let gain = graph.add_node(Node::new(Box::new(Gain(0.5))), None);
    graph.connect_audio(input, gain).unwrap();
    graph.connect_audio(gain, output).unwrap();
    graph.prepare(48000.0, 1).unwrap();

    for value in [1.0f32, -0.5, 0.25, 0.0] {
        let out = run_mono_block(&mut graph, &[value]);
        assert_eq!(out, [value * 0.5]);
    }
}

#[test]
fn empty_graph_renders_silence_and_no_midi() {
    let mut graph = Graph::new();
    graph.add_node(Node::audio_input(2), None);
    graph.add_node(Node::audio_output(2), None);
    graph.add_node(Node::midi_input(), None);
    graph.add_node(Node::midi_output(), None);
    graph.prepare(48000.0, 4).unwrap();

    let mut left = [1.0f32; 4];
    let mut right = [1.0f32; 4];
    let mut channels: Vec<&mut [f32]> = vec![&mut left, &mut right];
    let mut midi = MidiBuffer::new();
    midi.add_event(MidiMessage::note_on(1, 60, 100), 0);
    graph.process_block(&mut channels, &mut midi).unwrap();

    assert_eq!(left, [0.0; 4]);
    assert_eq!(right, [0.0; 4]);
    assert!(midi.is_empty());
}

// --- laws ---

#[test]
fn add_then_remove_connection_restores_the_plan() {
    let (mut graph, input, output) = mono_graph();
    let gain = graph.add_node(Node::new(Box::new(Gain(2.0))), None);
    graph.connect_audio(input, gain).unwrap();
    graph.connect_audio(gain, output).unwrap();
    graph.prepare(48000.0, 16).unwrap();

    let before_ops = graph.plan().op_summaries();
    let before_audio = graph.plan().num_audio_buffers();
    let before_midi = graph.plan().num_midi_buffers();

    graph.connect_audio(input, output).unwrap();
    assert_ne!(graph.plan().op_summaries(), before_ops);
    assert!(graph.remove_connection(input, 0, output, 0));

    assert_eq!(graph.plan().op_summaries(), before_ops);
    assert_eq!(graph.plan().num_audio_buffers(), before_audio);
    assert_eq!(graph.plan().num_midi_buffers(), before_midi);
}

#[test]
fn enable_toggle_order_is_equivalent_across_blocks() {
    let run = |first: bool, second: bool| -> Vec<f32> {
        let (mut graph, input, output) = mono_graph();
        let gain = graph.add_node(Node::new(Box::new(Gain(2.0))), None);
        graph.connect_audio(input, gain).unwrap();
        graph.connect_audio(gain, output).unwrap();
        graph.prepare(48000.0, 4).unwrap();

        graph.set_node_enabled(gain, first).unwrap();
        let mut out = run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]);
        graph.set_node_enabled(gain, second).unwrap();
        out.extend(run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]));
        out
    };

    // Disable-then-enable mirrors enable-then-disable.
    assert_eq!(run(false, true), [0.0, 0.0, 0.0, 0.0, 2.0, 2.0, 2.0, 2.0]);
    assert_eq!(run(true, false), [2.0, 2.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0]);
}

// --- fault containment ---

#[test]
fn render_fault_is_contained_to_the_node() {
    let (mut graph, input, output) = mono_graph();
    let faulty = graph.add_node(Node::new(Box::new(Faulty)), None);
    graph.connect_audio(input, faulty).unwrap();
    graph.connect_audio(faulty, output).unwrap();
    graph.connect_audio(input, output).unwrap();
    graph.prepare(48000.0, 4).unwrap();

    // The callback completes; the faulty node's contribution is silence,
    // the parallel path still flows.
    let out = run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]);
    assert_eq!(out, [1.0, 1.0, 1.0, 1.0]);
    assert!(graph.node(faulty).unwrap().controls().is_faulted());
    assert!(matches!(
        graph.node_render_status(faulty),
        Err(GraphError::NodeRenderFault { node }) if node == faulty
    ));
    assert!(graph.node_render_status(input).is_ok());

    // Subsequent blocks run the node bypassed (suspended).
    let out = run_mono_block(&mut graph, &[0.5, 0.5, 0.5, 0.5]);
    assert_eq!(out, [1.0, 1.0, 1.0, 1.0]);
}

// --- gain ramps and metering ---

#[test]
fn gain_change_ramps_across_one_block() {
    let (mut graph, input, output) = mono_graph();
    let pass = graph.add_node(Node::new(Box::new(Pass)), None);
    graph.connect_audio(input, pass).unwrap();
    graph.connect_audio(pass, output).unwrap();
    graph.prepare(48000.0, 4).unwrap();

    // Settle one block at unity, then drop the output gain to zero.
    run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]);
    graph.node(pass).unwrap().controls().set_gain(0.0);
    let out = run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]);
    assert_eq!(out, [1.0, 0.75, 0.5, 0.25]);

    // Next block sits at the new gain.
    let out = run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]);
    assert_eq!(out, [0.0, 0.0, 0.0, 0.0]);
}

#[test]
fn meters_report_per_channel_rms() {
    let (mut graph, input, output) = mono_graph();
    let pass = graph.add_node(Node::new(Box::new(Pass)), None);
    graph.connect_audio(input, pass).unwrap();
    graph.connect_audio(pass, output).unwrap();
    graph.prepare(48000.0, 4).unwrap();

    run_mono_block(&mut graph, &[1.0, -1.0, 1.0, -1.0]);
    let meters = graph.node(pass).unwrap().meters();
    assert!((meters.input_rms(0) - 1.0).abs() < 1e-6);
    assert!((meters.output_rms(0) - 1.0).abs() < 1e-6);
}

// --- per-node MIDI filters ---

#[test]
fn node_transpose_and_key_range_filter_midi() {
    let mut graph = Graph::new();
    let midi_in = graph.add_node(Node::midi_input(), None);
    let midi_out = graph.add_node(Node::midi_output(), None);
    graph.add_connection(midi_in, 0, midi_out, 0).unwrap();
    graph.prepare(48000.0, 64).unwrap();

    let controls = graph.node(midi_out).unwrap().controls().clone();
    controls.set_transpose(12);
    controls.set_key_range(60, 72);

    let mut midi = MidiBuffer::new();
    midi.add_event(MidiMessage::note_on(1, 40, 100), 0); // below range
    midi.add_event(MidiMessage::note_on(1, 60, 100), 3);
    midi.add_event(MidiMessage::note_on(1, 80, 100), 7); // above range

    let mut left = [0.0f32; 64];
    let mut right = [0.0f32; 64];
    let mut channels: Vec<&mut [f32]> = vec![&mut left, &mut right];
    graph.process_block(&mut channels, &mut midi).unwrap();

    let notes: Vec<u8> = midi.iter().map(|e| e.message.note()).collect();
    assert_eq!(notes, [72]);
}

// --- nesting ---

#[test]
fn nested_graph_renders_as_a_node() {
    // Inner graph: in -> gain(0.5) -> out.
    let mut inner = Graph::with_ports(
        PortConfig::new()
            .with(PortType::Audio, 1, 1)
            .with(PortType::Midi, 1, 1),
    );
    let in_node = inner.add_node(Node::audio_input(1), None);
    let gain = inner.add_node(Node::new(Box::new(Gain(0.5))), None);
    let out_node = inner.add_node(Node::audio_output(1), None);
    inner.connect_audio(in_node, gain).unwrap();
    inner.connect_audio(gain, out_node).unwrap();

    let (mut outer, input, output) = mono_graph();
    let sub = outer.add_node(Node::new(Box::new(inner)), None);
    outer.connect_audio(input, sub).unwrap();
    outer.connect_audio(sub, output).unwrap();
    outer.prepare(48000.0, 4).unwrap();

    let out = run_mono_block(&mut outer, &[1.0, 2.0, 3.0, 4.0]);
    assert_eq!(out, [0.5, 1.0, 1.5, 2.0]);
}

#[test]
fn disconnect_scope_survives_removal_of_counterpart() {
    let (mut graph, input, output) = mono_graph();
    graph.connect_audio(input, output).unwrap();
    graph.prepare(48000.0, 4).unwrap();
    assert!(graph.remove_node(input));
    assert_eq!(graph.num_connections(), 0);

    let out = run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]);
    assert_eq!(out, [0.0; 4]);
}

#[test]
fn unprepared_child_is_excluded_but_graph_runs() {
    struct Refuses;
    impl Processor for Refuses {
        fn name(&self) -> &str {
            "refuses"
        }
        fn ports(&self) -> PortList {
            PortConfig::new().with(PortType::Audio, 1, 1).build()
        }
        fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
            Err(PrepareError::new("no memory"))
        }
        fn release(&mut self) {}
        fn render(
            &mut self,
            _: &mut AudioView<'_>,
            _: &mut MidiPipe<'_>,
        ) -> Result<(), RenderFault> {
            Ok(())
        }
    }

    let (mut graph, input, output) = mono_graph();
    let refuses = graph.add_node(Node::new(Box::new(Refuses)), None);
    graph.connect_audio(input, refuses).unwrap();
    graph.connect_audio(refuses, output).unwrap();
    graph.connect_audio(input, output).unwrap();
    graph.prepare(48000.0, 4).unwrap();

    assert!(!graph.node(refuses).unwrap().is_prepared());
    let out = run_mono_block(&mut graph, &[1.0, 1.0, 1.0, 1.0]);
    assert_eq!(out, [1.0, 1.0, 1.0, 1.0]);
}

#[test]
fn velocity_curve_reshapes_note_on_velocity() {
    use tejido_midi::VelocityCurveMode;

    let mut graph = Graph::new();
    let midi_in = graph.add_node(Node::midi_input(), None);
    let midi_out = graph.add_node(Node::midi_output(), None);
    graph.add_connection(midi_in, 0, midi_out, 0).unwrap();
    graph.set_velocity_curve(VelocityCurveMode::Hard2);
    graph.prepare(48000.0, 64).unwrap();

    let mut midi = MidiBuffer::new();
    midi.add_event(MidiMessage::note_on(1, 60, 64), 0);
    midi.add_event(MidiMessage::note_off(1, 60), 10);

    let mut left = [0.0f32; 64];
    let mut right = [0.0f32; 64];
    let mut channels: Vec<&mut [f32]> = vec![&mut left, &mut right];
    graph.process_block(&mut channels, &mut midi).unwrap();

    // Hard curve squares the normalized velocity: (64/127)^2 * 127 ~= 32.
    let velocities: Vec<u8> = midi.iter().map(|e| e.message.velocity()).collect();
    assert_eq!(velocities.len(), 2);
    assert_eq!(velocities[0], 32);
    // Note-offs pass through the curve untouched.
    assert!(midi.events()[1].message.is_note_off());
}

#[test]
fn latency_is_zero_without_latent_nodes() {
    let (mut graph, input, output) = mono_graph();
    graph.connect_audio(input, output).unwrap();
    graph.prepare(48000.0, 32).unwrap();
    assert_eq!(graph.total_latency_samples(), 0);
}
