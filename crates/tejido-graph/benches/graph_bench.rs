//! Benchmarks for plan compilation and per-block rendering.

use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use tejido_graph::{
    AudioView, Graph, Node, PortConfig, PortList, PortType, PrepareError, Processor, RenderFault,
};
use tejido_midi::{MidiBuffer, MidiPipe};

struct Gain(f32);

impl Processor for Gain {
    fn name(&self) -> &str {
        "gain"
    }
    fn ports(&self) -> PortList {
        PortConfig::new().with(PortType::Audio, 2, 2).build()
    }
    fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
        Ok(())
    }
    fn release(&mut self) {}
    fn render(&mut self, audio: &mut AudioView<'_>, _: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        for channel in 0..audio.num_outputs() {
            for sample in audio.channel_mut(channel) {
                *sample *= self.0;
            }
        }
        Ok(())
    }
}

/// A 16-node stereo chain with one parallel branch.
fn build_chain() -> Graph {
    let mut graph = Graph::new();
    let input = graph.add_node(Node::audio_input(2), None);
    let output = graph.add_node(Node::audio_output(2), None);

    let mut prev = input;
    for _ in 0..16 {
        let node = graph.add_node(Node::new(Box::new(Gain(0.99))), None);
        graph.connect_audio(prev, node).unwrap();
        prev = node;
    }
    graph.connect_audio(prev, output).unwrap();
    graph.connect_audio(input, output).unwrap();
    graph
}

fn bench_compile(c: &mut Criterion) {
    let mut graph = build_chain();
    graph.prepare(48000.0, 256).unwrap();

    c.bench_function("compile_16_node_chain", |b| {
        b.iter(|| {
            // Any structural edit recompiles; toggling a connection is the
            // cheapest way to force a full rebuild.
            let last = *graph.connections().last().unwrap();
            graph.remove_connection(last.source_node, last.source_port, last.dest_node, last.dest_port);
            graph
                .add_connection(last.source_node, last.source_port, last.dest_node, last.dest_port)
                .unwrap();
            black_box(graph.plan().num_ops());
        });
    });
}

fn bench_render(c: &mut Criterion) {
    let mut graph = build_chain();
    graph.prepare(48000.0, 256).unwrap();

    let mut left = vec![0.5f32; 256];
    let mut right = vec![0.5f32; 256];
    let mut midi = MidiBuffer::new();

    c.bench_function("render_16_node_chain_256", |b| {
        b.iter(|| {
            let mut channels: Vec<&mut [f32]> = vec![&mut left, &mut right];
            graph.process_block(&mut channels, &mut midi).unwrap();
            black_box(());
        });
    });
}

criterion_group!(benches, bench_compile, bench_render);
criterion_main!(benches);
