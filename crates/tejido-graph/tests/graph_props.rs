//! Property-based tests over random graph shapes and edit sequences.

use proptest::prelude::*;
use tejido_graph::{
    AudioView, Graph, Node, PortConfig, PortList, PortType, PrepareError, Processor, RenderFault,
};
use tejido_midi::MidiPipe;

struct Stub {
    audio_ins: u32,
    audio_outs: u32,
    midi_ins: u32,
    midi_outs: u32,
}

impl Processor for Stub {
    fn name(&self) -> &str {
        "stub"
    }
    fn ports(&self) -> PortList {
        PortConfig::new()
            .with(PortType::Audio, self.audio_ins, self.audio_outs)
            .with(PortType::Midi, self.midi_ins, self.midi_outs)
            .build()
    }
    fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
        Ok(())
    }
    fn release(&mut self) {}
    fn render(&mut self, _: &mut AudioView<'_>, _: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        Ok(())
    }
}

fn stub(audio_ins: u32, audio_outs: u32, midi_ins: u32, midi_outs: u32) -> Node {
    Node::new(Box::new(Stub {
        audio_ins,
        audio_outs,
        midi_ins,
        midi_outs,
    }))
}

proptest! {
    /// Port/channel mapping stays a bijection for any layout.
    #[test]
    fn port_channel_mapping_is_a_bijection(
        audio_ins in 0u32..5,
        audio_outs in 0u32..5,
        midi_ins in 0u32..3,
        midi_outs in 0u32..3,
    ) {
        let node = stub(audio_ins, audio_outs, midi_ins, midi_outs);
        prop_assert_eq!(node.num_ports(), audio_ins + audio_outs + midi_ins + midi_outs);
        for p in node.ports().iter() {
            let back = node
                .port_for_channel(p.port_type, p.channel, p.flow)
                .unwrap();
            prop_assert_eq!(back, p.index);
            prop_assert_eq!(node.channel_for_port(p.index), Some(p.channel));
        }
    }

    /// Whatever a random edit sequence does, every surviving connection
    /// satisfies the structural invariants.
    #[test]
    fn random_edits_preserve_connection_invariants(
        edits in prop::collection::vec((0u32..8, 0u32..8, 0u32..4, 0u32..4, prop::bool::ANY), 0..60),
    ) {
        let mut graph = Graph::new();
        let ids: Vec<u32> = (0..8).map(|_| graph.add_node(stub(2, 2, 1, 1), None)).collect();

        for (src, dst, sp, dp, remove) in edits {
            let source = ids[src as usize];
            let dest = ids[dst as usize];
            if remove {
                graph.remove_connection(source, sp, dest, dp);
            } else {
                let _ = graph.add_connection(source, sp, dest, dp);
            }
        }

        let mut previous = None;
        for c in graph.connections() {
            // No self-connections, correct flows, compatible types.
            prop_assert_ne!(c.source_node, c.dest_node);
            let source = graph.node(c.source_node).unwrap();
            let dest = graph.node(c.dest_node).unwrap();
            prop_assert!(source.ports().is_output(c.source_port));
            prop_assert!(dest.ports().is_input(c.dest_port));
            prop_assert!(
                source
                    .ports()
                    .port_type(c.source_port)
                    .can_connect(dest.ports().port_type(c.dest_port))
            );
            // Sorted and duplicate-free.
            if let Some(prev) = previous {
                prop_assert!(prev < *c);
            }
            previous = Some(*c);
        }
    }

    /// On a DAG, schedule order puts every producer before its consumers.
    #[test]
    fn acyclic_ordering_respects_every_connection(
        edges in prop::collection::vec((0usize..6, 0usize..6), 0..15),
    ) {
        let mut graph = Graph::new();
        let ids: Vec<u32> = (0..6).map(|_| graph.add_node(stub(1, 1, 0, 0), None)).collect();

        for (a, b) in edges {
            // Wire lower index to higher index only, which cannot cycle.
            if a == b {
                continue;
            }
            let (from, to) = if a < b { (a, b) } else { (b, a) };
            let _ = graph.add_connection(ids[from], 1, ids[to], 0);
        }

        let order = graph.ordered_node_ids();
        let pos = |id: u32| order.iter().position(|&n| n == id).unwrap();
        for c in graph.connections() {
            prop_assert!(pos(c.source_node) < pos(c.dest_node));
        }
    }

    /// Compiling after add-then-remove of a random legal connection gives
    /// back the original plan.
    #[test]
    fn add_remove_connection_round_trips_the_plan(
        src in 0usize..4,
        dst in 0usize..4,
    ) {
        let mut graph = Graph::new();
        let input = graph.add_node(Node::audio_input(2), None);
        let output = graph.add_node(Node::audio_output(2), None);
        let ids: Vec<u32> = (0..4).map(|_| graph.add_node(stub(2, 2, 1, 1), None)).collect();
        graph.connect_audio(input, ids[0]).unwrap();
        graph.connect_audio(ids[0], ids[1]).unwrap();
        graph.connect_audio(ids[1], output).unwrap();
        graph.prepare(48000.0, 64).unwrap();

        let before = graph.plan().op_summaries();
        let (before_audio, before_midi) =
            (graph.plan().num_audio_buffers(), graph.plan().num_midi_buffers());

        let source = ids[src];
        let dest = ids[dst];
        // Audio out ch0 of a stub is port 2, audio in ch0 is port 0.
        if graph.add_connection(source, 2, dest, 0).is_ok() {
            graph.remove_connection(source, 2, dest, 0);
        }

        prop_assert_eq!(graph.plan().op_summaries(), before);
        prop_assert_eq!(graph.plan().num_audio_buffers(), before_audio);
        prop_assert_eq!(graph.plan().num_midi_buffers(), before_midi);
    }
}
