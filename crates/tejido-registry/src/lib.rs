//! Node type registry and factory for the tejido graph engine.
//!
//! This crate provides a centralized registry for discovering and
//! instantiating node types. It enables building graphs from saved
//! descriptions by identifier and provides metadata for host UIs.
//!
//! # Example
//!
//! ```rust
//! use tejido_registry::NodeRegistry;
//!
//! let registry = NodeRegistry::new();
//!
//! // List everything the registry can build.
//! for info in registry.all_nodes() {
//!     println!("{}: {}", info.identifier, info.description);
//! }
//!
//! // Create a node by identifier.
//! let gain = registry.create("gain").unwrap();
//! assert_eq!(gain.num_audio_inputs(), 2);
//! ```

use tejido_graph::{Node, NodeDescriptor};

mod nodes;

pub use nodes::{
    GainProcessor, MidiClockProcessor, MidiMonitorProcessor, MidiTransposeProcessor,
    MixerProcessor,
};

/// The factory format name for everything this registry builds.
pub const INTERNAL_FORMAT: &str = "internal";

/// Category of a node type, for organization and filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeCategory {
    /// Moves samples/events between the outer callback and the graph.
    Io,
    /// Audio utilities (gain, mixing).
    Utility,
    /// MIDI utilities (transpose, clock, monitoring).
    Midi,
}

impl NodeCategory {
    /// Human-readable category name.
    pub const fn name(&self) -> &'static str {
        match self {
            NodeCategory::Io => "I/O",
            NodeCategory::Utility => "Utility",
            NodeCategory::Midi => "MIDI",
        }
    }
}

/// Describes one node type the registry can build.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Stable identifier, e.g. `audio.input` or `gain`.
    pub identifier: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Brief description.
    pub description: &'static str,
    /// Category for filtering.
    pub category: NodeCategory,
}

const NODE_INFOS: &[NodeInfo] = &[
    NodeInfo {
        identifier: "audio.input",
        name: "Audio Input",
        description: "Publishes the outer audio input inside the graph",
        category: NodeCategory::Io,
    },
    NodeInfo {
        identifier: "audio.output",
        name: "Audio Output",
        description: "Drains graph audio to the outer output",
        category: NodeCategory::Io,
    },
    NodeInfo {
        identifier: "midi.input",
        name: "Midi Input",
        description: "Publishes the outer MIDI input inside the graph",
        category: NodeCategory::Io,
    },
    NodeInfo {
        identifier: "midi.output",
        name: "Midi Output",
        description: "Drains graph MIDI to the outer output",
        category: NodeCategory::Io,
    },
    NodeInfo {
        identifier: "gain",
        name: "Gain",
        description: "Stereo gain stage",
        category: NodeCategory::Utility,
    },
    NodeInfo {
        identifier: "mixer",
        name: "Mixer",
        description: "Sums two stereo pairs into one",
        category: NodeCategory::Utility,
    },
    NodeInfo {
        identifier: "midi.transpose",
        name: "Midi Transpose",
        description: "Shifts note numbers by a semitone offset",
        category: NodeCategory::Midi,
    },
    NodeInfo {
        identifier: "midi.clock",
        name: "Midi Clock",
        description: "Emits MIDI timing clocks at a configured tempo",
        category: NodeCategory::Midi,
    },
    NodeInfo {
        identifier: "midi.monitor",
        name: "Midi Monitor",
        description: "Counts events passing through, for diagnostics",
        category: NodeCategory::Midi,
    },
];

/// Factory for the built-in node set.
#[derive(Debug, Default)]
pub struct NodeRegistry;

impl NodeRegistry {
    /// A registry over the built-in node set.
    pub fn new() -> Self {
        Self
    }

    /// Metadata for every node type, in menu order.
    pub fn all_nodes(&self) -> &'static [NodeInfo] {
        NODE_INFOS
    }

    /// Metadata for one identifier.
    pub fn find(&self, identifier: &str) -> Option<&'static NodeInfo> {
        NODE_INFOS.iter().find(|info| info.identifier == identifier)
    }

    /// Node types in a category.
    pub fn nodes_in_category(&self, category: NodeCategory) -> Vec<&'static NodeInfo> {
        NODE_INFOS
            .iter()
            .filter(|info| info.category == category)
            .collect()
    }

    /// Builds a node by identifier, with the factory descriptor attached.
    ///
    /// IO nodes come up stereo; hosts needing other widths construct them
    /// directly through [`Node::audio_input`] and friends.
    pub fn create(&self, identifier: &str) -> Option<Node> {
        let node = match identifier {
            "audio.input" => Node::audio_input(2),
            "audio.output" => Node::audio_output(2),
            "midi.input" => Node::midi_input(),
            "midi.output" => Node::midi_output(),
            "gain" => Node::new(Box::new(GainProcessor::default())),
            "mixer" => Node::new(Box::new(MixerProcessor)),
            "midi.transpose" => Node::new(Box::new(MidiTransposeProcessor::default())),
            "midi.clock" => Node::new(Box::new(MidiClockProcessor::default())),
            "midi.monitor" => Node::new(Box::new(MidiMonitorProcessor::default())),
            _ => {
                tracing::debug!(identifier, "unknown node type requested");
                return None;
            }
        };
        Some(node.with_descriptor(NodeDescriptor::new(INTERNAL_FORMAT, identifier)))
    }
}
