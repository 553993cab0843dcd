//! Port model: typed, indexed descriptions of a node's I/O surface.
//!
//! Every node exposes a [`PortList`]: a dense array of
//! [`PortDescription`]s where `index` identifies the port within the node
//! and `channel` is the ordinal within the port's type and flow (audio
//! input 0, 1, 2..., audio output 0, 1...). The scheduler routes only
//! Audio and Midi ports; Control ports describe the parameter surface.
//!
//! `port_for_channel` and `channel_for_port` are mutual inverses over the
//! port set, which the builder relies on when it maps input channels onto
//! matching output channels for in-place processing.

/// The kind of data a port carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortType {
    /// Audio sample stream.
    Audio,
    /// MIDI event stream.
    Midi,
    /// Control value (parameter surface, not routed by the scheduler).
    Control,
    /// Structured event payload (not routed by the scheduler).
    Atom,
    /// Placeholder for out-of-range lookups.
    Unknown,
}

impl PortType {
    /// True when the scheduler routes this type through shared buffers.
    pub fn is_routable(self) -> bool {
        matches!(self, PortType::Audio | PortType::Midi)
    }

    /// True when an output of `self` may feed an input of `other`.
    pub fn can_connect(self, other: PortType) -> bool {
        self == other && self != PortType::Unknown
    }

    /// Lowercase name used in symbols and descriptions.
    pub fn name(self) -> &'static str {
        match self {
            PortType::Audio => "audio",
            PortType::Midi => "midi",
            PortType::Control => "control",
            PortType::Atom => "atom",
            PortType::Unknown => "unknown",
        }
    }
}

/// Direction of a port, from the owning node's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PortFlow {
    /// The node reads from this port.
    Input,
    /// The node writes to this port.
    Output,
}

/// Description of one port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDescription {
    /// Dense index, unique within the node.
    pub index: u32,
    /// Ordinal within this port's type and flow.
    pub channel: u32,
    /// What the port carries.
    pub port_type: PortType,
    /// Input or output.
    pub flow: PortFlow,
    /// Stable machine-readable identifier, e.g. `audio_in_1`.
    pub symbol: String,
    /// Human-readable name, e.g. `Audio In 1`.
    pub name: String,
}

/// A node's complete port surface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortList {
    ports: Vec<PortDescription>,
}

impl PortList {
    /// An empty port list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of ports.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// True when the node has no ports.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// The description at `port`, if in range.
    pub fn get(&self, port: u32) -> Option<&PortDescription> {
        self.ports.get(port as usize)
    }

    /// The type of `port`; `Unknown` when out of range.
    pub fn port_type(&self, port: u32) -> PortType {
        self.get(port).map_or(PortType::Unknown, |p| p.port_type)
    }

    /// True when `port` exists and is an input.
    pub fn is_input(&self, port: u32) -> bool {
        self.get(port).is_some_and(|p| p.flow == PortFlow::Input)
    }

    /// True when `port` exists and is an output.
    pub fn is_output(&self, port: u32) -> bool {
        self.get(port).is_some_and(|p| p.flow == PortFlow::Output)
    }

    /// Number of ports of the given type and flow.
    pub fn count(&self, port_type: PortType, flow: PortFlow) -> u32 {
        self.ports
            .iter()
            .filter(|p| p.port_type == port_type && p.flow == flow)
            .count() as u32
    }

    /// The port index for a type/flow channel ordinal.
    pub fn port_for_channel(&self, port_type: PortType, channel: u32, flow: PortFlow) -> Option<u32> {
        self.ports
            .iter()
            .find(|p| p.port_type == port_type && p.flow == flow && p.channel == channel)
            .map(|p| p.index)
    }

    /// The type/flow channel ordinal of a port index.
    pub fn channel_for_port(&self, port: u32) -> Option<u32> {
        self.get(port).map(|p| p.channel)
    }

    /// Iterates the descriptions in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, PortDescription> {
        self.ports.iter()
    }

    fn push(&mut self, port_type: PortType, flow: PortFlow, channel: u32) {
        let index = self.ports.len() as u32;
        let dir = match flow {
            PortFlow::Input => "in",
            PortFlow::Output => "out",
        };
        let human_dir = match flow {
            PortFlow::Input => "In",
            PortFlow::Output => "Out",
        };
        let ty = port_type.name();
        self.ports.push(PortDescription {
            index,
            channel,
            port_type,
            flow,
            symbol: format!("{ty}_{dir}_{}", channel + 1),
            name: format!(
                "{}{} {human_dir} {}",
                ty[..1].to_uppercase(),
                &ty[1..],
                channel + 1
            ),
        });
    }
}

impl<'a> IntoIterator for &'a PortList {
    type Item = &'a PortDescription;
    type IntoIter = std::slice::Iter<'a, PortDescription>;

    fn into_iter(self) -> Self::IntoIter {
        self.ports.iter()
    }
}

/// Builder producing a [`PortList`] from per-type input/output counts.
///
/// Ports are laid out per type in the order the types were given, inputs
/// before outputs, with dense indices across the whole list.
#[derive(Clone, Debug, Default)]
pub struct PortConfig {
    entries: Vec<(PortType, u32, u32)>,
}

impl PortConfig {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `inputs`/`outputs` ports of `port_type`.
    pub fn with(mut self, port_type: PortType, inputs: u32, outputs: u32) -> Self {
        self.entries.push((port_type, inputs, outputs));
        self
    }

    /// Builds the port list.
    pub fn build(&self) -> PortList {
        let mut list = PortList::new();
        for &(port_type, inputs, outputs) in &self.entries {
            for channel in 0..inputs {
                list.push(port_type, PortFlow::Input, channel);
            }
            for channel in 0..outputs {
                list.push(port_type, PortFlow::Output, channel);
            }
        }
        list
    }
}
