//! Frame-ordered MIDI event buffer.
//!
//! A [`MidiBuffer`] holds the events for one render block, kept sorted by
//! frame offset. Insertion preserves the relative order of events that
//! share a frame, so merging buffers is deterministic. Clearing a buffer
//! keeps its capacity, which makes the per-block paths allocation-free
//! once the buffer has seen its peak event count.

use crate::message::MidiMessage;

/// A message plus the frame offset it occurs at within the block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MidiEvent {
    /// Frame offset from the start of the block.
    pub frame: u32,
    /// The message itself.
    pub message: MidiMessage,
}

/// An ordered collection of MIDI events for one block.
#[derive(Clone, Debug, Default)]
pub struct MidiBuffer {
    events: Vec<MidiEvent>,
}

impl MidiBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// Creates an empty buffer with room for `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
        }
    }

    /// Number of events in the buffer.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when the buffer holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Adds an event, keeping the buffer sorted by frame. Events sharing a
    /// frame keep insertion order.
    pub fn add_event(&mut self, message: MidiMessage, frame: u32) {
        let pos = self.events.partition_point(|e| e.frame <= frame);
        self.events.insert(pos, MidiEvent { frame, message });
    }

    /// Merges events from `other` whose frames fall in
    /// `start_frame..start_frame + num_frames`, shifting each by
    /// `frame_offset` (which may be negative).
    pub fn add_buffer(&mut self, other: &MidiBuffer, start_frame: u32, num_frames: u32, frame_offset: i32) {
        let end = start_frame.saturating_add(num_frames);
        for ev in &other.events {
            if ev.frame < start_frame || ev.frame >= end {
                continue;
            }
            let frame = i64::from(ev.frame) + i64::from(frame_offset);
            if frame >= 0 {
                self.add_event(ev.message, frame as u32);
            }
        }
    }

    /// Removes all events, keeping capacity.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Removes events with frames in `start_frame..start_frame + num_frames`.
    pub fn clear_range(&mut self, start_frame: u32, num_frames: u32) {
        let end = start_frame.saturating_add(num_frames);
        self.events.retain(|e| e.frame < start_frame || e.frame >= end);
    }

    /// The events in frame order.
    pub fn events(&self) -> &[MidiEvent] {
        &self.events
    }

    /// Iterates the events in frame order.
    pub fn iter(&self) -> std::slice::Iter<'_, MidiEvent> {
        self.events.iter()
    }

    /// Mutable iteration, for in-place rewriting (transpose, velocity).
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, MidiEvent> {
        self.events.iter_mut()
    }

    /// Keeps only the events for which `keep` returns true.
    pub fn retain(&mut self, keep: impl FnMut(&MidiEvent) -> bool) {
        self.events.retain(keep);
    }

    /// Swaps contents with another buffer without reallocating.
    pub fn swap(&mut self, other: &mut MidiBuffer) {
        std::mem::swap(&mut self.events, &mut other.events);
    }

    /// Replaces the contents with a copy of `other`, keeping capacity.
    pub fn copy_from(&mut self, other: &MidiBuffer) {
        self.events.clear();
        self.events.extend_from_slice(&other.events);
    }
}

impl<'a> IntoIterator for &'a MidiBuffer {
    type Item = &'a MidiEvent;
    type IntoIter = std::slice::Iter<'a, MidiEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}
