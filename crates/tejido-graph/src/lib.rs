//! Real-time audio/MIDI processing graph engine.
//!
//! tejido-graph compiles a directed, possibly cyclic graph of signal
//! processing nodes into a flat render sequence and executes it block by
//! block under a real-time constraint: edit the graph at mutation time
//! (add/remove/connect), compile to a [`RenderPlan`] snapshot, execute
//! that plan per audio callback with zero allocations.
//!
//! # Architecture
//!
//! The system keeps a strict **edit/render split**:
//!
//! - The mutation side owns the topology ([`Graph`]: nodes, connections)
//!   and recompiles after every structural edit into a *pending* plan.
//! - The render side adopts the pending plan at the next block boundary
//!   and executes its ops against plan-owned buffer pools. A callback
//!   sees an entirely old or entirely new plan, never a mix.
//!
//! Per-node live configuration (gain, bypass, enable, MIDI filters) sits
//! in [`NodeControls`] atomics, so control threads adjust a running node
//! without touching the plan. Gains ramp across one block on change,
//! which keeps adjustments click-free without locks.
//!
//! # Buffer reuse
//!
//! The builder assigns shared buffers like a register allocator: a
//! buffer holds one node-output signal from the step that writes it to
//! the last step that reads it, then returns to the free list. Buffer 0
//! is read-only silence, wired to unconnected inputs. A long processing
//! chain therefore renders in a handful of buffers regardless of length.
//!
//! # Latency compensation
//!
//! Each node reports [`latency_samples`](Processor::latency_samples).
//! While scheduling, the builder tracks the accumulated latency on every
//! path and inserts delay ops wherever a signal would arrive early, so
//! parallel paths stay sample-aligned at every merge.
//!
//! # Cycles
//!
//! Feedback is allowed. An edge whose source renders after its consumer
//! reads a reserved buffer holding the previous block's signal, so a
//! cycle costs exactly one block of latency and the first block hears
//! silence on the feedback path.
//!
//! # Example
//!
//! ```rust,ignore
//! use tejido_graph::{Graph, Node};
//!
//! let mut graph = Graph::new();
//! let input = graph.add_node(Node::audio_input(2), None);
//! let fx = graph.add_node(Node::new(Box::new(MyEffect::default())), None);
//! let output = graph.add_node(Node::audio_output(2), None);
//!
//! graph.connect_audio(input, fx)?;
//! graph.connect_audio(fx, output)?;
//! graph.prepare(48000.0, 256)?;
//!
//! // In the audio callback:
//! graph.process_block(&mut channels, &mut midi)?;
//! ```

pub mod buffer;
pub mod connection;
pub mod error;
pub mod graph;
pub mod node;
pub mod ops;
pub mod port;

mod builder;

pub use buffer::{AudioBufferPool, AudioView, DelayLine, SILENCE_BUFFER};
pub use connection::Connection;
pub use error::{GraphError, PrepareError, RenderFault, Result};
pub use graph::{DisconnectFilter, Graph};
pub use node::{AtomicF32, Node, NodeControls, NodeDescriptor, NodeKind, NodeMeters, Processor};
pub use ops::RenderPlan;
pub use port::{PortConfig, PortDescription, PortFlow, PortList, PortType};
