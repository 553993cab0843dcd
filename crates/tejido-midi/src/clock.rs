//! MIDI clock generation and tempo recovery.
//!
//! [`MidiClockMaster`] emits 0xF8 timing clocks at 24 per quarter note
//! with sample-accurate spacing across block boundaries.
//!
//! [`MidiClock`] consumes incoming clocks and recovers the sender's tempo
//! through a delay-locked loop. The loop smooths timestamp jitter; after a
//! sync period of 48 ticks (two beats) the signal is considered acquired
//! and tempo estimates are reported about once a second.

use crate::buffer::MidiBuffer;
use crate::message::MidiMessage;

/// Second-order delay-locked loop tracking a periodic event stream.
///
/// The loop predicts the next event time and corrects its period estimate
/// from the prediction error, low-pass filtering the measured interval.
#[derive(Debug, Clone)]
struct DelayLockedLoop {
    t0: f64,
    t1: f64,
    e2: f64,
    b: f64,
    c: f64,
}

impl DelayLockedLoop {
    fn new() -> Self {
        Self {
            t0: 0.0,
            t1: 0.0,
            e2: 0.0,
            b: 0.0,
            c: 0.0,
        }
    }

    /// Re-centers the loop at `now` with an initial `period` guess.
    fn reset(&mut self, now: f64, period: f64) {
        self.t0 = now;
        self.t1 = now + period;
        self.e2 = period;
    }

    /// Sets the loop filter from the nominal period and bandwidth in Hz.
    fn set_params(&mut self, period: f64, bandwidth: f64) {
        let omega = 2.0 * std::f64::consts::PI * bandwidth * period;
        self.b = std::f64::consts::SQRT_2 * omega;
        self.c = omega * omega;
    }

    /// Feeds the timestamp of the next observed event.
    fn update(&mut self, time: f64) {
        let err = time - self.t1;
        self.t0 = self.t1;
        self.t1 += self.b * err + self.e2;
        self.e2 += self.c * err;
    }

    /// The filtered interval between consecutive events.
    fn time_diff(&self) -> f64 {
        self.t1 - self.t0
    }
}

/// What a call to [`MidiClock::process`] observed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MidiClockUpdate {
    /// The sync period just completed; the clock signal is locked.
    pub acquired: bool,
    /// A fresh tempo estimate in BPM, at most one per second.
    pub tempo: Option<f64>,
}

/// Recovers tempo from an incoming 24-ppqn clock stream.
#[derive(Debug, Clone)]
pub struct MidiClock {
    sample_rate: f64,
    block_size: usize,
    dll: DelayLockedLoop,
    time_of_last_update: f64,
    ticks: u64,
    sync_period_ticks: u64,
    tempo_update_seconds: f64,
}

impl MidiClock {
    /// Creates an unsynced clock. Call [`reset`](Self::reset) before use.
    pub fn new() -> Self {
        Self {
            sample_rate: 0.0,
            block_size: 0,
            dll: DelayLockedLoop::new(),
            time_of_last_update: 0.0,
            ticks: 0,
            sync_period_ticks: 48,
            tempo_update_seconds: 1.0,
        }
    }

    /// Resets sync state for a new stream at the given render details.
    pub fn reset(&mut self, sample_rate: f64, block_size: usize) {
        self.sample_rate = sample_rate;
        self.block_size = block_size;
        self.time_of_last_update = 0.0;
        self.ticks = 0;
    }

    /// Number of ticks consumed since the last reset.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Feeds one clock tick observed at `time` seconds.
    ///
    /// Returns what changed: whether the sync period completed on this
    /// tick, and a tempo estimate when one is due. Estimates outside the
    /// plausible 20..=999 BPM window are discarded.
    pub fn process(&mut self, time: f64) -> MidiClockUpdate {
        debug_assert!(self.sample_rate > 0.0 && self.block_size > 0);
        let mut update = MidiClockUpdate::default();

        let block_period = self.block_size as f64 / self.sample_rate;
        if self.ticks == 0 {
            self.dll.reset(time, block_period);
            self.dll.set_params(block_period, 1.0);
        } else {
            self.dll.update(time);
        }

        if self.ticks == self.sync_period_ticks {
            update.acquired = true;
        }

        if self.ticks >= self.sync_period_ticks
            && time - self.time_of_last_update >= self.tempo_update_seconds
        {
            let bpm = 60.0 / (self.dll.time_diff() * 24.0);
            self.time_of_last_update = time;
            if (20.0..=999.0).contains(&bpm) {
                update.tempo = Some(bpm);
            }
        }

        self.ticks += 1;
        update
    }
}

impl Default for MidiClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Emits MIDI timing clocks at a configured tempo.
#[derive(Debug, Clone)]
pub struct MidiClockMaster {
    pos: u64,
    tempo: f64,
    sample_rate: f64,
    samples_per_clock: u64,
}

impl MidiClockMaster {
    /// Creates a generator at 120 BPM and 44.1 kHz.
    pub fn new() -> Self {
        let mut master = Self {
            pos: 0,
            tempo: 120.0,
            sample_rate: 44100.0,
            samples_per_clock: 0,
        };
        master.update_coefficients();
        master
    }

    /// Restarts the clock phase.
    pub fn reset(&mut self) {
        self.pos = 0;
        self.update_coefficients();
    }

    /// Sets the tempo in BPM.
    pub fn set_tempo(&mut self, tempo: f64) {
        if self.tempo != tempo {
            self.tempo = tempo;
            self.update_coefficients();
        }
    }

    /// The configured tempo in BPM.
    pub fn tempo(&self) -> f64 {
        self.tempo
    }

    /// Sets the sample rate in Hz.
    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            self.update_coefficients();
        }
    }

    /// Appends clock events for the next `num_samples` frames.
    pub fn render(&mut self, midi: &mut MidiBuffer, num_samples: usize) {
        if self.samples_per_clock == 0 {
            return;
        }

        let mut frame = self.pos % self.samples_per_clock;
        if frame > 0 {
            frame = self.samples_per_clock - frame;
        }
        while frame < num_samples as u64 {
            midi.add_event(MidiMessage::timing_clock(), frame as u32);
            frame += self.samples_per_clock;
        }

        self.pos += num_samples as u64;
    }

    fn update_coefficients(&mut self) {
        let clocks_per_minute = 24.0 * self.tempo;
        self.samples_per_clock = ((60.0 * self.sample_rate) / clocks_per_minute).round() as u64;
    }
}

impl Default for MidiClockMaster {
    fn default() -> Self {
        Self::new()
    }
}
