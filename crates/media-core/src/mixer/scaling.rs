//! Anti-clipping gain for mixed output
//!
//! The gain is a fixed-point factor in 1/64 steps. It creeps up by one step
//! per output packet until it reaches its ceiling, and is cut back for any
//! sample whose scaled value would leave the linear PCM range.

use crate::types::MAX_LINEAR_SAMPLE;

const SCALE_SHIFT: u32 = 6;

/// Adaptive gain applied to accumulator output
#[derive(Debug, Clone)]
pub struct Scaler {
    factor: i32,
    max_factor: i32,
}

impl Scaler {
    pub fn new(initial: i32, max: i32) -> Self {
        let max_factor = max.max(1);
        Self {
            factor: initial.clamp(1, max_factor),
            max_factor,
        }
    }

    /// Current gain in 1/64 steps.
    pub fn factor(&self) -> i32 {
        self.factor
    }

    /// Scale one packet of mixed samples into `out`.
    ///
    /// Returns the number of samples that had to be clamped.
    pub fn scale_packet(&mut self, mixed: &[i32], out: &mut [i16]) -> usize {
        self.factor = (self.factor + 1).min(self.max_factor);

        let max = MAX_LINEAR_SAMPLE as i64;
        let mut clipped = 0;
        for (dst, &sample) in out.iter_mut().zip(mixed) {
            let mut scaled = (sample as i64 * self.factor as i64) >> SCALE_SHIFT;
            if scaled.abs() > max {
                self.factor = ((max << SCALE_SHIFT) / (sample as i64).abs()).max(1) as i32;
                scaled = scaled.clamp(-max, max);
                clipped += 1;
            }
            *dst = scaled as i16;
        }
        clipped
    }
}
