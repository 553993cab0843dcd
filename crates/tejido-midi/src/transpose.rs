//! Additive MIDI note transposition.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::buffer::MidiBuffer;
use crate::message::MidiMessage;

/// Transposes note-on/off messages by a semitone offset.
///
/// The offset is an atomic so a control thread can retune while the audio
/// thread processes. All other message types pass through untouched, and a
/// zero offset is a no-op.
#[derive(Debug, Default)]
pub struct MidiTranspose {
    offset: AtomicI32,
}

impl MidiTranspose {
    /// Creates a transpose with zero offset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the note offset, e.g. -12 for one octave down.
    pub fn set_note_offset(&self, offset: i32) {
        self.offset.store(offset, Ordering::Relaxed);
    }

    /// The current note offset.
    pub fn note_offset(&self) -> i32 {
        self.offset.load(Ordering::Relaxed)
    }

    /// Transposes a single message in place.
    pub fn process_message(message: &mut MidiMessage, offset: i32) {
        if message.is_note_on_or_off() {
            message.set_note(i32::from(message.note()) + offset);
        }
    }

    /// Transposes every note event in `midi` in place.
    pub fn process(&self, midi: &mut MidiBuffer) {
        let offset = self.offset.load(Ordering::Relaxed);
        if offset == 0 {
            return;
        }
        for ev in midi.iter_mut() {
            Self::process_message(&mut ev.message, offset);
        }
    }
}
