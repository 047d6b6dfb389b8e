//! Per-rate mixing state
//!
//! A [`MixBufferSnapshot`] holds one ring per participant channel plus a wide
//! accumulator carrying the running sum of every channel, all at a single
//! sample rate. The accumulator is kept exact by read-modify-write: a write
//! subtracts whatever the channel previously stored at those positions before
//! adding the new samples, and removing a channel subtracts everything it
//! still holds.

use std::collections::HashMap;

use crate::ring::SampleRing;
use crate::types::ChannelId;

/// Mixing state for one sample rate
#[derive(Debug)]
pub struct MixBufferSnapshot {
    sample_rate: u32,
    capacity: usize,
    last_ts: u64,
    written: bool,
    channels: HashMap<ChannelId, SampleRing<i16>>,
    accumulator: SampleRing<i32>,
}

impl MixBufferSnapshot {
    pub fn new(sample_rate: u32, capacity: usize, channels: impl IntoIterator<Item = ChannelId>) -> Self {
        let channels = channels
            .into_iter()
            .map(|id| (id, SampleRing::new(capacity)))
            .collect();
        Self {
            sample_rate,
            capacity,
            last_ts: 0,
            written: false,
            channels,
            accumulator: SampleRing::new(capacity),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Wall-clock end of the newest write.
    pub fn last_ts(&self) -> u64 {
        self.last_ts
    }

    /// False until the first successful write.
    pub fn has_data(&self) -> bool {
        self.written
    }

    pub fn contains_channel(&self, channel_id: ChannelId) -> bool {
        self.channels.contains_key(&channel_id)
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = ChannelId> + '_ {
        self.channels.keys().copied()
    }

    pub fn add_channel(&mut self, channel_id: ChannelId) {
        let capacity = self.capacity;
        self.channels
            .entry(channel_id)
            .or_insert_with(|| SampleRing::new(capacity));
    }

    /// Drop a channel and take its stored samples out of the accumulator.
    pub fn remove_channel(&mut self, channel_id: ChannelId) {
        let Some(ring) = self.channels.remove(&channel_id) else {
            return;
        };
        let own = ring.window();
        let acc = self.accumulator.window();
        let start = own.start.max(acc.start);
        let end = own.end.min(acc.end);
        if start >= end {
            return;
        }

        let mut sums = vec![0i32; (end - start) as usize];
        self.accumulator.get(start, &mut sums);
        for (i, sum) in sums.iter_mut().enumerate() {
            *sum -= ring.sample_at(start + i as u64) as i32;
        }
        self.accumulator.put(start, &sums);
    }

    /// Make the channel set match `active`: add rings for missing channels,
    /// drop rings (and their contribution) for channels no longer active.
    pub fn fix_channels(&mut self, active: &[ChannelId]) {
        let stale: Vec<ChannelId> = self
            .channels
            .keys()
            .filter(|id| !active.contains(id))
            .copied()
            .collect();
        for id in stale {
            self.remove_channel(id);
        }
        for &id in active {
            self.add_channel(id);
        }
    }

    /// Write `samples` for `channel_id` at sample position `pos`, ending at
    /// wall-clock `end_ts`.
    ///
    /// Returns false when the channel has no ring here or the block lies
    /// entirely before the accumulator window.
    pub fn write(&mut self, channel_id: ChannelId, pos: u64, samples: &[i16], end_ts: u64) -> bool {
        let Some(ring) = self.channels.get_mut(&channel_id) else {
            return false;
        };
        if !self.accumulator.is_empty() && pos + samples.len() as u64 <= self.accumulator.window().start {
            return false;
        }

        let mixed: Vec<i32> = samples
            .iter()
            .enumerate()
            .map(|(i, &sample)| {
                let p = pos + i as u64;
                self.accumulator.sample_at(p) - ring.sample_at(p) as i32 + sample as i32
            })
            .collect();
        ring.put(pos, samples);
        self.accumulator.put(pos, &mixed);

        self.last_ts = self.last_ts.max(end_ts);
        self.written = true;
        true
    }

    /// Mix for `channel_id` at sample position `pos`: every other channel's
    /// contribution, i.e. the accumulator minus the channel's own samples.
    pub fn read(&self, channel_id: ChannelId, pos: u64, out: &mut [i32]) {
        self.accumulator.get(pos, out);
        if let Some(ring) = self.channels.get(&channel_id) {
            let acc = self.accumulator.window();
            for (i, sum) in out.iter_mut().enumerate() {
                let p = pos + i as u64;
                if acc.contains(&p) {
                    *sum -= ring.sample_at(p) as i32;
                }
            }
        }
    }
}
