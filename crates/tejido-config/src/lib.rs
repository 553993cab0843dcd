//! Graph description persistence for the tejido graph engine.
//!
//! The engine itself imposes no on-disk schema; this crate is the host
//! layer that serializes a graph as an attributed tree: nodes with type
//! descriptors, names, positions, control values and opaque state blobs,
//! plus the connection list and graph-level MIDI settings. Files are
//! TOML; state blobs are base64 inside them and round-trip byte-exactly.
//!
//! # Example
//!
//! ```rust,ignore
//! use tejido_config::{capture_graph, instantiate_graph, load_graph, save_graph};
//! use tejido_registry::NodeRegistry;
//!
//! let description = capture_graph(&graph);
//! save_graph(&description, "session.toml")?;
//!
//! let description = load_graph("session.toml")?;
//! let graph = instantiate_graph(&description, &NodeRegistry::new())?;
//! ```

use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use tejido_graph::Graph;
use tejido_midi::{MidiChannels, VelocityCurveMode};
use tejido_registry::NodeRegistry;

/// Errors from loading, saving, or instantiating graph descriptions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File read/write failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for a graph description.
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// The description could not be serialized.
    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A node's state blob is not valid base64.
    #[error("invalid state blob on node {node}")]
    InvalidStateBlob {
        /// The node carrying the bad blob.
        node: u32,
    },

    /// The registry does not know the node type.
    #[error("unknown node type {identifier:?} (format {format:?})")]
    UnknownNodeType {
        /// Factory format name from the file.
        format: String,
        /// Node type identifier from the file.
        identifier: String,
    },
}

/// Convenience result type for persistence operations.
pub type Result<T> = std::result::Result<T, Error>;

fn default_gain() -> f32 {
    1.0
}

fn default_enabled() -> bool {
    true
}

/// One node of a saved graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescription {
    /// Stable node id within the graph.
    pub id: u32,
    /// Factory format name, e.g. `internal`.
    pub format: String,
    /// Node type identifier, e.g. `gain`.
    pub identifier: String,
    /// Display name override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Editor canvas position, if the host tracks one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<(f32, f32)>,
    /// Output gain.
    #[serde(default = "default_gain")]
    pub gain: f32,
    /// Input gain.
    #[serde(default = "default_gain")]
    pub input_gain: f32,
    /// Whether the node is bypassed.
    #[serde(default)]
    pub bypassed: bool,
    /// Whether the node is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Opaque state blob, base64.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

/// One connection of a saved graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDescription {
    /// Source node id.
    pub source_node: u32,
    /// Output port on the source node.
    pub source_port: u32,
    /// Destination node id.
    pub dest_node: u32,
    /// Input port on the destination node.
    pub dest_port: u32,
}

/// A complete saved graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDescription {
    /// Graph display name.
    pub name: String,
    /// Graph-level MIDI channel mask bits; omitted means omni.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi_channel_mask: Option<u16>,
    /// Velocity curve mode name; omitted means linear.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_curve: Option<String>,
    /// Saved nodes.
    #[serde(default)]
    pub nodes: Vec<NodeDescription>,
    /// Saved connections.
    #[serde(default)]
    pub connections: Vec<ConnectionDescription>,
}

/// Captures a live graph into a description.
///
/// Nodes without a type identifier (neither built-in IO nor a factory
/// descriptor) cannot be re-instantiated and are skipped with a warning.
pub fn capture_graph(graph: &Graph) -> GraphDescription {
    let mut nodes = Vec::new();
    for node in graph.nodes() {
        let Some(identifier) = node.type_identifier() else {
            tracing::warn!(node = node.id(), name = node.name(), "node has no type identifier; not saved");
            continue;
        };
        let format = node
            .descriptor()
            .map_or_else(|| "internal".to_string(), |d| d.format.clone());

        let mut blob = Vec::new();
        node.get_state(&mut blob);
        let controls = node.controls();
        nodes.push(NodeDescription {
            id: node.id(),
            format,
            identifier: identifier.to_string(),
            name: Some(node.name().to_string()),
            position: None,
            gain: controls.gain(),
            input_gain: controls.input_gain(),
            bypassed: controls.is_bypassed(),
            enabled: controls.is_enabled(),
            state: (!blob.is_empty()).then(|| BASE64.encode(&blob)),
        });
    }

    let saved_ids: Vec<u32> = nodes.iter().map(|n| n.id).collect();
    let connections = graph
        .connections()
        .iter()
        .filter(|c| saved_ids.contains(&c.source_node) && saved_ids.contains(&c.dest_node))
        .map(|c| ConnectionDescription {
            source_node: c.source_node,
            source_port: c.source_port,
            dest_node: c.dest_node,
            dest_port: c.dest_port,
        })
        .collect();

    let mask = graph.midi_channel_mask();
    GraphDescription {
        name: graph.name().to_string(),
        midi_channel_mask: (!mask.is_omni()).then(|| mask.bits()),
        velocity_curve: (graph.velocity_curve() != VelocityCurveMode::Linear)
            .then(|| graph.velocity_curve().name().to_string()),
        nodes,
        connections,
    }
}

/// Rebuilds a graph from a description, creating nodes through the
/// registry.
///
/// Node types the registry does not know fail the whole load; a
/// connection that no longer lines up is skipped with a warning, matching
/// the engine's purge-on-illegal behavior.
pub fn instantiate_graph(description: &GraphDescription, registry: &NodeRegistry) -> Result<Graph> {
    let mut graph = Graph::new();
    graph.set_name(description.name.clone());

    if let Some(bits) = description.midi_channel_mask {
        graph.set_midi_channel_mask(MidiChannels::from_bits(bits));
    }
    if let Some(curve) = &description.velocity_curve {
        match velocity_mode_by_name(curve) {
            Some(mode) => graph.set_velocity_curve(mode),
            None => tracing::warn!(curve, "unknown velocity curve; keeping linear"),
        }
    }

    for saved in &description.nodes {
        let mut node = registry
            .create(&saved.identifier)
            .ok_or_else(|| Error::UnknownNodeType {
                format: saved.format.clone(),
                identifier: saved.identifier.clone(),
            })?;
        let controls = node.controls();
        controls.set_gain(saved.gain);
        controls.set_input_gain(saved.input_gain);
        controls.set_bypassed(saved.bypassed);
        controls.set_enabled(saved.enabled);
        if let Some(state) = &saved.state {
            let blob = BASE64
                .decode(state)
                .map_err(|_| Error::InvalidStateBlob { node: saved.id })?;
            node.set_state(&blob);
        }
        graph.add_node(node, Some(saved.id));
    }

    for c in &description.connections {
        if let Err(error) =
            graph.add_connection(c.source_node, c.source_port, c.dest_node, c.dest_port)
        {
            tracing::warn!(
                source = c.source_node,
                dest = c.dest_node,
                %error,
                "saved connection skipped"
            );
        }
    }

    Ok(graph)
}

fn velocity_mode_by_name(name: &str) -> Option<VelocityCurveMode> {
    VelocityCurveMode::ALL.into_iter().find(|m| m.name() == name)
}

/// Saves a description as TOML.
pub fn save_graph(description: &GraphDescription, path: impl AsRef<Path>) -> Result<()> {
    let text = toml::to_string_pretty(description)?;
    std::fs::write(path.as_ref(), text)?;
    tracing::info!(path = %path.as_ref().display(), "graph description saved");
    Ok(())
}

/// Loads a description from TOML.
pub fn load_graph(path: impl AsRef<Path>) -> Result<GraphDescription> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let description = toml::from_str(&text)?;
    tracing::info!(path = %path.as_ref().display(), "graph description loaded");
    Ok(description)
}
