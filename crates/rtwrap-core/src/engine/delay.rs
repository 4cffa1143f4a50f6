//! Per-input latency compensation delay line
//!
//! Each hardware input gets its own delay so that every channel reaching the
//! unit is aligned to the slowest capture path. When the wanted delay changes
//! the read cursor jumps, which would click; instead the stale signal is faded
//! out, the cursor jumps, and the new signal is faded back in, all inside one
//! cycle.

use crate::types::{Sample, FADE_LEN, MAX_DELAY};

/// Ring buffer of samples with an independently moving read cursor
pub struct DelayLine {
    buffer: Vec<Sample>,
    write_pos: usize,
    read_pos: usize,
    current_delay: usize,
}

impl DelayLine {
    /// Create a delay line that can delay by up to `max_delay - 1` samples
    pub fn new(max_delay: usize) -> Self {
        let max_delay = max_delay.max(1);
        Self {
            buffer: vec![0.0; max_delay],
            write_pos: 0,
            read_pos: 0,
            current_delay: 0,
        }
    }

    /// Delay currently applied (samples)
    pub fn current_delay(&self) -> usize {
        self.current_delay
    }

    /// Buffer length; wanted delays are clamped below this
    pub fn max_delay(&self) -> usize {
        self.buffer.len()
    }

    /// Push `input` into the line and fill `output` with the delayed signal
    ///
    /// `wanted_delay` is clamped to `max_delay() - 1`. If it differs from the
    /// current delay the block contains a fade-out, the cursor jump and a
    /// fade-in; from the next block on the new delay is exact.
    pub fn push_and_pull(&mut self, input: &[Sample], output: &mut [Sample], wanted_delay: usize) {
        let n = input.len().min(output.len());
        let len = self.buffer.len();
        // Out-of-range delays are reported by LatencyGraph, not here
        let wanted = wanted_delay.min(len - 1);

        if wanted == self.current_delay {
            for pos in 0..n {
                self.tick(input[pos], &mut output[pos], 1.0);
            }
            return;
        }

        // Two full fade windows must fit into the block
        let fade_len = if n >= 2 * FADE_LEN { FADE_LEN } else { n / 2 };
        let mut pos = 0;

        while pos < fade_len {
            let gain = (fade_len - pos) as Sample / fade_len as Sample;
            self.tick(input[pos], &mut output[pos], gain);
            pos += 1;
        }

        // read = write - delay, so moving from current to wanted shifts the
        // read cursor by (current - wanted)
        self.read_pos = (self.read_pos + len + self.current_delay - wanted) % len;
        self.current_delay = wanted;

        while pos < 2 * fade_len {
            let gain = (pos - fade_len) as Sample / fade_len as Sample;
            self.tick(input[pos], &mut output[pos], gain);
            pos += 1;
        }

        while pos < n {
            self.tick(input[pos], &mut output[pos], 1.0);
            pos += 1;
        }
    }

    #[inline]
    fn tick(&mut self, input: Sample, output: &mut Sample, gain: Sample) {
        let len = self.buffer.len();
        self.buffer[self.write_pos] = input;
        *output = self.buffer[self.read_pos] * gain;
        self.write_pos = (self.write_pos + 1) % len;
        self.read_pos = (self.read_pos + 1) % len;
    }
}

impl Default for DelayLine {
    fn default() -> Self {
        Self::new(MAX_DELAY)
    }
}
