//! Shared audio buffer pool, channel views, and delay lines.
//!
//! The render engine owns one [`AudioBufferPool`] per compiled plan.
//! Buffer 0 is the silence buffer: read-only zeros wired to unconnected
//! inputs and feedback break points. The builder never emits an op that
//! writes it, and the engine re-zeros it at the start of every block as a
//! guard against misbehaving nodes.
//!
//! Nodes never see the pool directly. A [`ProcessOp`](crate::ops) hands
//! each node an [`AudioView`]: the slice of pool channels assigned to the
//! node for this block, addressed by the node's own channel ordinals.

/// Index of the read-only silence buffer in every pool.
pub const SILENCE_BUFFER: usize = 0;

/// Pool of shared mono audio buffers, indexed by small integers.
#[derive(Debug)]
pub struct AudioBufferPool {
    buffers: Vec<Vec<f32>>,
    block_size: usize,
}

impl AudioBufferPool {
    /// Creates a pool of `count` zeroed buffers of `block_size` frames.
    pub fn new(count: usize, block_size: usize) -> Self {
        Self {
            buffers: (0..count.max(1)).map(|_| vec![0.0; block_size]).collect(),
            block_size,
        }
    }

    /// Number of buffers in the pool.
    pub fn count(&self) -> usize {
        self.buffers.len()
    }

    /// Frames per buffer.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Read access to buffer `index`.
    #[inline]
    pub fn buffer(&self, index: usize) -> &[f32] {
        &self.buffers[index]
    }

    /// Write access to buffer `index`.
    #[inline]
    pub fn buffer_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.buffers[index]
    }

    /// Split borrow of two distinct buffers, the first read-only.
    ///
    /// # Panics
    ///
    /// Panics if `source == dest`.
    #[inline]
    pub fn pair_mut(&mut self, source: usize, dest: usize) -> (&[f32], &mut [f32]) {
        assert_ne!(source, dest);
        if source < dest {
            let (head, tail) = self.buffers.split_at_mut(dest);
            (&head[source], &mut tail[0])
        } else {
            let (head, tail) = self.buffers.split_at_mut(source);
            (&tail[0], &mut head[dest])
        }
    }

    /// Zeroes buffer `index`.
    pub fn clear(&mut self, index: usize) {
        self.buffers[index].fill(0.0);
    }

    /// Zeroes every buffer.
    pub fn clear_all(&mut self) {
        for buf in &mut self.buffers {
            buf.fill(0.0);
        }
    }
}

/// Single-channel delay line advancing one frame per sample.
///
/// Backing storage is `delay + 1` frames so a zero delay passes through
/// unchanged with a single read/write step.
pub struct DelayLine {
    buffer: Vec<f32>,
    read: usize,
    write: usize,
}

impl DelayLine {
    /// A delay of `delay` frames.
    pub fn new(delay: usize) -> Self {
        Self {
            buffer: vec![0.0; delay + 1],
            read: 0,
            write: delay,
        }
    }

    /// The configured delay in frames.
    pub fn delay(&self) -> usize {
        self.buffer.len() - 1
    }

    /// Delays `data` in place.
    pub fn process(&mut self, data: &mut [f32]) {
        let len = self.buffer.len();
        for sample in data {
            self.buffer[self.write] = *sample;
            *sample = self.buffer[self.read];
            self.read += 1;
            if self.read >= len {
                self.read = 0;
            }
            self.write += 1;
            if self.write >= len {
                self.write = 0;
            }
        }
    }

    /// Flushes the stored history to silence.
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.read = 0;
        self.write = self.buffer.len() - 1;
    }
}

impl std::fmt::Debug for DelayLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayLine")
            .field("delay", &self.delay())
            .finish()
    }
}

/// A node's window onto the shared audio pool for one render call.
///
/// Channels are addressed by the node's unified channel ordinal: indices
/// `0..num_inputs` are the node's audio inputs, and output channel `c`
/// lives at index `c` as well. When an output channel index is below the
/// input count it aliases the corresponding input channel, so in-place
/// processing works the way the builder laid the buffers out.
pub struct AudioView<'a> {
    pool: &'a mut AudioBufferPool,
    channels: &'a [usize],
    num_inputs: usize,
    num_outputs: usize,
    frames: usize,
}

impl<'a> AudioView<'a> {
    /// Creates a view over `channels` of `pool`.
    pub fn new(
        pool: &'a mut AudioBufferPool,
        channels: &'a [usize],
        num_inputs: usize,
        num_outputs: usize,
        frames: usize,
    ) -> Self {
        debug_assert!(channels.iter().all(|&c| c < pool.count()));
        Self {
            pool,
            channels,
            num_inputs,
            num_outputs,
            frames,
        }
    }

    /// Total channels visible through the view.
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Audio input channel count of the node.
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }

    /// Audio output channel count of the node.
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    /// Frames in this block.
    pub fn num_frames(&self) -> usize {
        self.frames
    }

    /// Read access to channel `channel`.
    #[inline]
    pub fn channel(&self, channel: usize) -> &[f32] {
        &self.pool.buffer(self.channels[channel])[..self.frames]
    }

    /// Write access to channel `channel`.
    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [f32] {
        let frames = self.frames;
        &mut self.pool.buffer_mut(self.channels[channel])[..frames]
    }

    /// Split borrow of a source and destination channel.
    ///
    /// Returns `None` when both map to the same underlying buffer, in
    /// which case the caller already has the data in place.
    pub fn channel_pair_mut(&mut self, source: usize, dest: usize) -> Option<(&[f32], &mut [f32])> {
        let src = self.channels[source];
        let dst = self.channels[dest];
        if src == dst {
            return None;
        }
        let frames = self.frames;
        let (s, d) = self.pool.pair_mut(src, dst);
        Some((&s[..frames], &mut d[..frames]))
    }

    /// Copies `source` into `dest`; a no-op when they alias.
    pub fn copy_channel(&mut self, source: usize, dest: usize) {
        if let Some((src, dst)) = self.channel_pair_mut(source, dest) {
            dst.copy_from_slice(src);
        }
    }

    /// Zeroes channel `channel`.
    pub fn clear_channel(&mut self, channel: usize) {
        self.channel_mut(channel).fill(0.0);
    }

    /// Multiplies every channel by `gain`.
    pub fn apply_gain(&mut self, gain: f32) {
        if gain == 1.0 {
            return;
        }
        for &buf in self.channels {
            if buf == SILENCE_BUFFER {
                continue;
            }
            let frames = self.frames;
            for sample in &mut self.pool.buffer_mut(buf)[..frames] {
                *sample *= gain;
            }
        }
    }

    /// Ramps every channel linearly from `start` to `end` gain across the
    /// block.
    pub fn apply_gain_ramp(&mut self, start: f32, end: f32) {
        if start == end {
            self.apply_gain(start);
            return;
        }
        let frames = self.frames;
        let step = (end - start) / frames as f32;
        for &buf in self.channels {
            if buf == SILENCE_BUFFER {
                continue;
            }
            let mut gain = start;
            for sample in &mut self.pool.buffer_mut(buf)[..frames] {
                *sample *= gain;
                gain += step;
            }
        }
    }

    /// Root-mean-square level of channel `channel` over the block.
    pub fn rms(&self, channel: usize) -> f32 {
        let data = self.channel(channel);
        if data.is_empty() {
            return 0.0;
        }
        let sum: f32 = data.iter().map(|s| s * s).sum();
        (sum / data.len() as f32).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_pair_mut_is_disjoint() {
        let mut pool = AudioBufferPool::new(3, 4);
        pool.buffer_mut(1).copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        let (src, dst) = pool.pair_mut(1, 2);
        dst.copy_from_slice(src);
        assert_eq!(pool.buffer(2), &[1.0, 2.0, 3.0, 4.0]);

        let (src, dst) = pool.pair_mut(2, 1);
        assert_eq!(src, &[1.0, 2.0, 3.0, 4.0]);
        dst.fill(0.0);
        assert_eq!(pool.buffer(1), &[0.0; 4]);
    }

    #[test]
    fn delay_line_delays_by_configured_frames() {
        let mut delay = DelayLine::new(3);
        let mut data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        delay.process(&mut data);
        assert_eq!(data, [0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn delay_line_state_spans_blocks() {
        let mut delay = DelayLine::new(2);
        let mut a = [1.0, 2.0];
        let mut b = [3.0, 4.0];
        delay.process(&mut a);
        delay.process(&mut b);
        assert_eq!(a, [0.0, 0.0]);
        assert_eq!(b, [1.0, 2.0]);
    }

    #[test]
    fn zero_delay_is_identity() {
        let mut delay = DelayLine::new(0);
        let mut data = [1.0, -1.0, 0.5];
        delay.process(&mut data);
        assert_eq!(data, [1.0, -1.0, 0.5]);
    }

    #[test]
    fn view_gain_skips_silence_buffer() {
        let mut pool = AudioBufferPool::new(3, 4);
        pool.buffer_mut(1).fill(1.0);
        let channels = [SILENCE_BUFFER, 1];
        let mut view = AudioView::new(&mut pool, &channels, 2, 0, 4);
        view.apply_gain(0.5);
        assert_eq!(pool.buffer(SILENCE_BUFFER), &[0.0; 4]);
        assert_eq!(pool.buffer(1), &[0.5; 4]);
    }

    #[test]
    fn view_gain_ramp_interpolates() {
        let mut pool = AudioBufferPool::new(2, 4);
        pool.buffer_mut(1).fill(1.0);
        let channels = [1usize];
        let mut view = AudioView::new(&mut pool, &channels, 1, 1, 4);
        view.apply_gain_ramp(0.0, 1.0);
        assert_eq!(pool.buffer(1), &[0.0, 0.25, 0.5, 0.75]);
    }

    #[test]
    fn view_copy_channel_handles_aliasing() {
        let mut pool = AudioBufferPool::new(2, 2);
        pool.buffer_mut(1).copy_from_slice(&[0.5, 0.25]);
        // Input and output alias the same buffer: copy must be a no-op.
        let channels = [1usize, 1];
        let mut view = AudioView::new(&mut pool, &channels, 1, 1, 2);
        view.copy_channel(0, 1);
        assert_eq!(pool.buffer(1), &[0.5, 0.25]);
    }

    #[test]
    fn view_rms() {
        let mut pool = AudioBufferPool::new(2, 4);
        pool.buffer_mut(1).copy_from_slice(&[1.0, -1.0, 1.0, -1.0]);
        let channels = [1usize];
        let view = AudioView::new(&mut pool, &channels, 1, 0, 4);
        assert!((view.rms(0) - 1.0).abs() < 1e-6);
    }
}
