//! Timestamp-addressed sample ring
//!
//! A [`SampleRing`] is a fixed arena of samples addressed by absolute
//! position (`position % capacity`) rather than by a write cursor. Writers
//! and readers agree on positions derived from the wall clock, so they can
//! run at a fixed skew without further synchronization.
//!
//! The ring remembers the end of its newest write. Only positions inside
//! `[end - capacity, end)` are readable; everything else reads as silence.
//! Moving the end forward zero-fills any gap, so a slot left over from an
//! earlier lap is never returned for a different absolute position.

use std::ops::Range;

/// Fixed-capacity circular sample buffer indexed by absolute position.
#[derive(Debug, Clone)]
pub struct SampleRing<T> {
    buf: Box<[T]>,
    end: u64,
}

impl<T: Copy + Default> SampleRing<T> {
    /// Create a ring holding `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![T::default(); capacity.max(1)].into_boxed_slice(),
            end: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Absolute positions currently readable.
    pub fn window(&self) -> Range<u64> {
        self.end.saturating_sub(self.buf.len() as u64)..self.end
    }

    /// True until the first write.
    pub fn is_empty(&self) -> bool {
        self.end == 0
    }

    /// Write `samples` starting at absolute position `ts`.
    ///
    /// Positions that end up older than the readable window are discarded.
    /// If the block is longer than the ring only its tail is kept.
    pub fn put(&mut self, ts: u64, samples: &[T]) {
        if samples.is_empty() {
            return;
        }
        let cap = self.buf.len() as u64;
        let (ts, samples) = if samples.len() as u64 > cap {
            let skip = samples.len() - cap as usize;
            (ts + skip as u64, &samples[skip..])
        } else {
            (ts, samples)
        };

        let new_end = ts + samples.len() as u64;
        if new_end > self.end {
            if ts > self.end {
                self.fill_default(self.end, ts);
            }
            self.end = new_end;
        }

        let window_start = self.end.saturating_sub(cap);
        for (i, &sample) in samples.iter().enumerate() {
            let pos = ts + i as u64;
            if pos < window_start {
                continue;
            }
            self.buf[(pos % cap) as usize] = sample;
        }
    }

    /// Read `out.len()` samples starting at absolute position `ts`.
    /// Positions outside the readable window yield `T::default()`.
    pub fn get(&self, ts: u64, out: &mut [T]) {
        let cap = self.buf.len() as u64;
        let window = self.window();
        for (i, slot) in out.iter_mut().enumerate() {
            let pos = ts + i as u64;
            *slot = if window.contains(&pos) {
                self.buf[(pos % cap) as usize]
            } else {
                T::default()
            };
        }
    }

    /// Single-sample read with the same window rules as [`get`](Self::get).
    pub fn sample_at(&self, pos: u64) -> T {
        if self.window().contains(&pos) {
            self.buf[(pos % self.buf.len() as u64) as usize]
        } else {
            T::default()
        }
    }

    /// Forget all content.
    pub fn clear(&mut self) {
        self.buf.iter_mut().for_each(|s| *s = T::default());
        self.end = 0;
    }

    fn fill_default(&mut self, from: u64, to: u64) {
        let cap = self.buf.len() as u64;
        if to - from >= cap {
            self.buf.iter_mut().for_each(|s| *s = T::default());
            return;
        }
        for pos in from..to {
            self.buf[(pos % cap) as usize] = T::default();
        }
    }
}
