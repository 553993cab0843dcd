//! Error types for graph operations.

use crate::port::PortType;

/// Errors reported by graph and node operations.
///
/// Structural errors reject the edit and leave the graph unchanged.
/// Render-time faults are contained to the offending node for the current
/// block and surfaced through the node's status flags.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The referenced node does not exist in this graph.
    #[error("node {0} not found in graph")]
    InvalidNodeId(u32),

    /// Port index out of range, or wrong flow direction for the operation.
    #[error("port {port} is invalid for node {node}")]
    InvalidPort {
        /// Node the port was looked up on.
        node: u32,
        /// The offending port index.
        port: u32,
    },

    /// The two port types cannot be connected.
    #[error("cannot connect {source_port:?} port to {dest:?} port")]
    TypeMismatch {
        /// Type of the source port.
        source_port: PortType,
        /// Type of the destination port.
        dest: PortType,
    },

    /// A node cannot be connected to itself.
    #[error("cannot connect node {0} to itself")]
    SelfConnection(u32),

    /// The connection is already present.
    #[error("connection already exists")]
    DuplicateConnection,

    /// The connection would create a cycle (cycle-free policy only).
    #[error("connection would create a cycle")]
    Cycle,

    /// Render was requested before `prepare`.
    #[error("graph rendered before prepare")]
    NotPrepared,

    /// A child refused to allocate for the requested rate and block size.
    #[error("node {node} failed to prepare: {reason}")]
    PrepareFailed {
        /// The node whose preparation failed.
        node: u32,
        /// The reason reported by the node.
        reason: String,
    },

    /// A node's render aborted; its outputs were silenced for the block.
    ///
    /// Returned by `Graph::node_render_status` while the node's fault
    /// flag is set.
    #[error("node {node} faulted during render")]
    NodeRenderFault {
        /// The node that faulted.
        node: u32,
    },
}

/// Convenience result type for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;

/// Failure signalled by a node from inside `render`.
///
/// The engine catches this, silences the node's outputs for the remainder
/// of the block, and flags the node as faulted; the callback completes.
#[derive(Debug, thiserror::Error)]
#[error("render fault: {0}")]
pub struct RenderFault(pub &'static str);

/// Failure signalled by a node from `prepare`.
///
/// Partial preparation is forbidden: a node returning this must have
/// released anything it allocated before failing.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PrepareError(pub String);

impl PrepareError {
    /// Builds an error from any displayable reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}
