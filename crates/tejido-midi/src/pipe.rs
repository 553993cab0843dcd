//! Indexed view over a set of shared MIDI buffers.
//!
//! During rendering each node sees its MIDI ports as a [`MidiPipe`]: a
//! small table mapping the node's MIDI port order onto buffers in the
//! shared pool. The pipe borrows the pool for the duration of one render
//! call, so access always goes through an index rather than a stored
//! reference.

use crate::buffer::MidiBuffer;

/// Maximum number of buffers a single pipe may reference.
pub const MAX_PIPE_BUFFERS: usize = 32;

/// A node's window onto the shared MIDI buffer pool.
pub struct MidiPipe<'a> {
    buffers: &'a mut [MidiBuffer],
    ports: &'a [usize],
}

impl<'a> MidiPipe<'a> {
    /// Creates a pipe over `buffers`, exposing the pool entries selected by
    /// `ports` in order.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_PIPE_BUFFERS`] ports are given or a port
    /// index is out of range for the pool.
    pub fn new(buffers: &'a mut [MidiBuffer], ports: &'a [usize]) -> Self {
        assert!(ports.len() <= MAX_PIPE_BUFFERS);
        assert!(ports.iter().all(|&p| p < buffers.len()));
        Self { buffers, ports }
    }

    /// Number of buffers visible through the pipe.
    pub fn num_buffers(&self) -> usize {
        self.ports.len()
    }

    /// True when the pipe references no buffers.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Read access to the buffer at pipe index `index`.
    pub fn read(&self, index: usize) -> &MidiBuffer {
        &self.buffers[self.ports[index]]
    }

    /// Write access to the buffer at pipe index `index`.
    pub fn write(&mut self, index: usize) -> &mut MidiBuffer {
        &mut self.buffers[self.ports[index]]
    }

    /// Clears every buffer visible through the pipe.
    pub fn clear_all(&mut self) {
        for &port in self.ports {
            self.buffers[port].clear();
        }
    }

    /// Clears the buffer at pipe index `index`.
    pub fn clear(&mut self, index: usize) {
        self.buffers[self.ports[index]].clear();
    }
}
