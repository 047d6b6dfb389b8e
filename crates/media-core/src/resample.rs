//! Streaming sample-rate conversion
//!
//! Linear interpolation with state carried across packets: the fractional
//! read position and the last input sample survive between calls, so a
//! stream converted packet by packet has no seams at packet boundaries.

/// Stateful linear-interpolation resampler for one direction of one stream
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u32,
    to_rate: u32,
    step: f64,
    /// Read position relative to the next input block; -1.0 addresses the
    /// last sample of the previous block.
    position: f64,
    last_sample: i16,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let step = if from_rate == 0 || to_rate == 0 {
            1.0
        } else {
            from_rate as f64 / to_rate as f64
        };
        Self {
            from_rate,
            to_rate,
            step,
            position: 0.0,
            last_sample: 0,
        }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate
    }

    /// True if this resampler converts exactly `from_rate` to `to_rate`.
    pub fn converts(&self, from_rate: u32, to_rate: u32) -> bool {
        self.from_rate == from_rate && self.to_rate == to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Convert one block, appending the output to `out`.
    ///
    /// A resampler with a zero rate on either side produces nothing.
    pub fn process(&mut self, input: &[i16], out: &mut Vec<i16>) {
        let Some(&tail) = input.last() else {
            return;
        };
        if self.from_rate == 0 || self.to_rate == 0 {
            return;
        }
        if self.is_passthrough() {
            out.extend_from_slice(input);
            self.last_sample = tail;
            return;
        }

        let last_index = (input.len() - 1) as f64;
        out.reserve((input.len() as f64 / self.step) as usize + 1);
        while self.position <= last_index {
            let base = self.position.floor();
            let fraction = self.position - base;
            let index = base as isize;

            let s0 = if index < 0 {
                self.last_sample
            } else {
                input[index as usize]
            };
            let sample = if fraction == 0.0 {
                s0
            } else {
                let s1 = input[(index + 1) as usize];
                let s0 = s0 as f64;
                (s0 + (s1 as f64 - s0) * fraction).round() as i16
            };
            out.push(sample);
            self.position += self.step;
        }

        self.position -= input.len() as f64;
        self.last_sample = tail;
    }

    /// Forget stream state.
    pub fn reset(&mut self) {
        self.position = 0.0;
        self.last_sample = 0;
    }
}

/// Pad (repeating the final sample) or truncate `samples` to exactly `len`.
pub fn fit_to_length(samples: &mut Vec<i16>, len: usize) {
    let fill = samples.last().copied().unwrap_or(0);
    samples.resize(len, fill);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough_copies() {
        let mut resampler = Resampler::new(8000, 8000);
        let mut out = Vec::new();
        resampler.process(&[1, 2, 3], &mut out);
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn test_upsample_doubles_length_across_packets() {
        let mut resampler = Resampler::new(8000, 16000);
        let input: Vec<i16> = (0..160).map(|i| i * 10).collect();

        for _ in 0..5 {
            let mut out = Vec::new();
            resampler.process(&input, &mut out);
            assert_eq!(out.len(), 320);
        }
    }

    #[test]
    fn test_upsample_interpolates_midpoints() {
        let mut resampler = Resampler::new(8000, 16000);
        let mut out = Vec::new();
        resampler.process(&[0, 100, 200], &mut out);
        assert_eq!(out, vec![0, 50, 100, 150, 200]);

        // The next block starts half a sample before its first input.
        out.clear();
        resampler.process(&[300, 400], &mut out);
        assert_eq!(out, vec![250, 300, 350, 400]);
    }

    #[test]
    fn test_downsample_halves_length() {
        let mut resampler = Resampler::new(16000, 8000);
        let input: Vec<i16> = (0..320).map(|i| i as i16).collect();
        let mut out = Vec::new();
        resampler.process(&input, &mut out);
        assert_eq!(out.len(), 160);
        assert_eq!(out[1], 2);
    }

    #[test]
    fn test_constant_signal_stays_constant() {
        let mut resampler = Resampler::new(44100, 48000);
        let mut out = Vec::new();
        for _ in 0..10 {
            resampler.process(&[1234; 441], &mut out);
        }
        assert!(out.iter().skip(1).all(|&s| s == 1234));
        let expected = 4800i64;
        assert!((out.len() as i64 - expected).abs() <= 1);
    }

    #[test]
    fn test_zero_rate_produces_nothing() {
        let mut out = Vec::new();
        Resampler::new(0, 8000).process(&[5; 80], &mut out);
        Resampler::new(8000, 0).process(&[5; 80], &mut out);
        Resampler::new(0, 0).process(&[5; 80], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_fit_to_length() {
        let mut samples = vec![1, 2, 3];
        fit_to_length(&mut samples, 5);
        assert_eq!(samples, vec![1, 2, 3, 3, 3]);
        fit_to_length(&mut samples, 2);
        assert_eq!(samples, vec![1, 2]);

        let mut empty = Vec::new();
        fit_to_length(&mut empty, 2);
        assert_eq!(empty, vec![0, 0]);
    }
}
