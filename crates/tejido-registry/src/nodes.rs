//! The built-in processor set.
//!
//! Small utility nodes shipped with the engine. Each stores its
//! parameters in its opaque state blob (little-endian, fixed layout), so
//! hosts round-trip them byte-exactly without knowing the contents.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tejido_graph::{AudioView, PortConfig, PortList, PortType, PrepareError, Processor, RenderFault};
use tejido_midi::{MidiClockMaster, MidiPipe, MidiTranspose};

/// Stereo gain stage.
pub struct GainProcessor {
    gain: f32,
}

impl GainProcessor {
    /// A gain stage at the given linear factor.
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }

    /// The linear gain factor.
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Sets the linear gain factor.
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }
}

impl Default for GainProcessor {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl Processor for GainProcessor {
    fn name(&self) -> &str {
        "Gain"
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
                *sample *= self.gain;
            }
        }
        Ok(())
    }

    fn get_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.gain.to_le_bytes());
    }

    fn set_state(&mut self, blob: &[u8]) {
        if let Ok(bytes) = <[u8; 4]>::try_from(blob) {
            self.gain = f32::from_le_bytes(bytes);
        }
    }
}

/// Sums two stereo pairs into one.
///
/// Inputs 0/1 alias the outputs; inputs 2/3 are mixed in.
pub struct MixerProcessor;

impl Processor for MixerProcessor {
    fn name(&self) -> &str {
        "Mixer"
    }

    fn ports(&self) -> PortList {
        PortConfig::new().with(PortType::Audio, 4, 2).build()
    }

    fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
        Ok(())
    }

    fn release(&mut self) {}

    fn render(&mut self, audio: &mut AudioView<'_>, _: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        for channel in 0..2 {
            if let Some((src, dst)) = audio.channel_pair_mut(channel + 2, channel) {
                for (d, s) in dst.iter_mut().zip(src) {
                    *d += *s;
                }
            }
        }
        Ok(())
    }
}

/// Shifts note numbers by a semitone offset.
pub struct MidiTransposeProcessor {
    transpose: MidiTranspose,
}

impl MidiTransposeProcessor {
    /// A transpose node with the given offset.
    pub fn new(offset: i32) -> Self {
        let transpose = MidiTranspose::new();
        transpose.set_note_offset(offset);
        Self { transpose }
    }

    /// The semitone offset.
    pub fn offset(&self) -> i32 {
        self.transpose.note_offset()
    }

    /// Sets the semitone offset.
    pub fn set_offset(&self, offset: i32) {
        self.transpose.set_note_offset(offset);
    }
}

impl Default for MidiTransposeProcessor {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Processor for MidiTransposeProcessor {
    fn name(&self) -> &str {
        "Midi Transpose"
    }

    fn ports(&self) -> PortList {
        PortConfig::new().with(PortType::Midi, 1, 1).build()
    }

    fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
        Ok(())
    }

    fn release(&mut self) {}

    fn render(&mut self, _: &mut AudioView<'_>, midi: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        if !midi.is_empty() {
            self.transpose.process(midi.write(0));
        }
        Ok(())
    }

    fn get_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.offset().to_le_bytes());
    }

    fn set_state(&mut self, blob: &[u8]) {
        if let Ok(bytes) = <[u8; 4]>::try_from(blob) {
            self.transpose.set_note_offset(i32::from_le_bytes(bytes));
        }
    }
}

/// Emits MIDI timing clocks at a configured tempo.
pub struct MidiClockProcessor {
    master: MidiClockMaster,
}

impl MidiClockProcessor {
    /// A clock generator at the given tempo.
    pub fn new(tempo: f64) -> Self {
        let mut master = MidiClockMaster::new();
        master.set_tempo(tempo);
        Self { master }
    }

    /// The configured tempo in BPM.
    pub fn tempo(&self) -> f64 {
        self.master.tempo()
    }

    /// Sets the tempo in BPM.
    pub fn set_tempo(&mut self, tempo: f64) {
        self.master.set_tempo(tempo);
    }
}

impl Default for MidiClockProcessor {
    fn default() -> Self {
        Self::new(120.0)
    }
}

impl Processor for MidiClockProcessor {
    fn name(&self) -> &str {
        "Midi Clock"
    }

    fn ports(&self) -> PortList {
        PortConfig::new().with(PortType::Midi, 0, 1).build()
    }

    fn prepare(&mut self, sample_rate: f64, _: usize) -> Result<(), PrepareError> {
        self.master.set_sample_rate(sample_rate);
        self.master.reset();
        Ok(())
    }

    fn release(&mut self) {}

    fn reset(&mut self) {
        self.master.reset();
    }

    fn render(&mut self, audio: &mut AudioView<'_>, midi: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        let frames = audio.num_frames();
        if !midi.is_empty() {
            let out = midi.write(0);
            out.clear();
            self.master.render(out, frames);
        }
        Ok(())
    }

    fn get_state(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.master.tempo().to_le_bytes());
    }

    fn set_state(&mut self, blob: &[u8]) {
        if let Ok(bytes) = <[u8; 8]>::try_from(blob) {
            self.master.set_tempo(f64::from_le_bytes(bytes));
        }
    }
}

/// Pass-through that counts the events it sees, for diagnostics.
#[derive(Default)]
pub struct MidiMonitorProcessor {
    seen: Arc<AtomicUsize>,
}

impl MidiMonitorProcessor {
    /// A monitor with a fresh counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the event counter; clone it before boxing the node.
    pub fn counter(&self) -> Arc<AtomicUsize> {
        self.seen.clone()
    }
}

impl Processor for MidiMonitorProcessor {
    fn name(&self) -> &str {
        "Midi Monitor"
    }

    fn ports(&self) -> PortList {
        PortConfig::new().with(PortType::Midi, 1, 1).build()
    }

    fn prepare(&mut self, _: f64, _: usize) -> Result<(), PrepareError> {
        Ok(())
    }

    fn release(&mut self) {}

    fn render(&mut self, _: &mut AudioView<'_>, midi: &mut MidiPipe<'_>) -> Result<(), RenderFault> {
        if !midi.is_empty() {
            self.seen.fetch_add(midi.read(0).len(), Ordering::Relaxed);
        }
        Ok(())
    }
}
