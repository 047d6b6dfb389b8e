//! Multi-party audio mixer
//!
//! One [`Mixer`] serves one conference room. Every participant owns a
//! channel; each `put` lands in the snapshot for the mixer's current sample
//! rate (the highest rate any participant declared), and each `get` returns
//! the sum of every *other* channel at the requested time, gain-scaled so it
//! never clips.
//!
//! Puts are written a fixed delay ahead of their timestamp, so a reader at
//! time `t` always sees data that arrived at least that long ago.
//!
//! ```
//! use confmix_media_core::config::MixerConfig;
//! use confmix_media_core::mixer::Mixer;
//!
//! let mixer = Mixer::new("demo", MixerConfig::default());
//! let a = mixer.add_channel(8000).unwrap();
//! let b = mixer.add_channel(8000).unwrap();
//!
//! // Both participants talk at t = 0; 20 ms later each hears the other.
//! mixer.put(a, 0, &[1000; 80], 8000);
//! mixer.put(b, 0, &[-500; 80], 8000);
//! let heard = mixer.get(a, 960, 80, 8000);
//! assert_eq!(heard.sample_rate, 8000);
//! assert!(heard.samples.iter().all(|&s| s < 0));
//! ```

mod scaling;
mod snapshot;

pub use scaling::Scaler;
pub use snapshot::MixBufferSnapshot;

use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace, warn};

use crate::config::MixerConfig;
use crate::error::{MediaError, Result};
use crate::types::{
    ms_to_wallclock, rescale_count, samples_to_wallclock, wallclock_to_samples, ChannelId,
};

/// Output of [`Mixer::get`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixedPacket {
    /// Scaled mix; empty when the mixer has nothing to offer yet
    pub samples: Vec<i16>,
    /// Rate of `samples`
    pub sample_rate: u32,
}

impl MixedPacket {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Counters kept per mixer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MixerStats {
    pub puts: u64,
    pub gets: u64,
    pub dropped_packets: u64,
    pub clipped_samples: u64,
}

#[derive(Debug)]
struct ChannelState {
    sample_rate: u32,
    last_read: Option<u64>,
}

#[derive(Debug)]
struct MixerState {
    channels: BTreeMap<ChannelId, ChannelState>,
    rates: BTreeMap<u32, usize>,
    snapshots: VecDeque<MixBufferSnapshot>,
    scaler: Scaler,
    stats: MixerStats,
}

impl MixerState {
    fn current_rate(&self, default_rate: u32) -> u32 {
        self.rates.keys().next_back().copied().unwrap_or(default_rate)
    }

    fn active_ids(&self) -> Vec<ChannelId> {
        self.channels.keys().copied().collect()
    }
}

/// Mixer for one conference room
pub struct Mixer {
    label: String,
    config: MixerConfig,
    delay: u64,
    state: Mutex<MixerState>,
}

impl Mixer {
    /// Create a mixer; `label` names it in log output (usually the room id).
    pub fn new(label: impl Into<String>, config: MixerConfig) -> Self {
        let state = MixerState {
            channels: BTreeMap::new(),
            rates: BTreeMap::new(),
            snapshots: VecDeque::new(),
            scaler: Scaler::new(config.initial_scaling, config.max_scaling),
            stats: MixerStats::default(),
        };
        Self {
            label: label.into(),
            delay: ms_to_wallclock(config.mixer_delay_ms),
            config,
            state: Mutex::new(state),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Register a participant producing audio at `sample_rate`.
    ///
    /// Returns the lowest channel id not currently in use.
    pub fn add_channel(&self, sample_rate: u32) -> Result<ChannelId> {
        if sample_rate == 0 {
            return Err(MediaError::InvalidSampleRate { rate: sample_rate });
        }

        let mut state = self.state.lock();
        let channel_id = (0..)
            .find(|id| !state.channels.contains_key(id))
            .unwrap_or_default();

        state.channels.insert(
            channel_id,
            ChannelState {
                sample_rate,
                last_read: None,
            },
        );
        *state.rates.entry(sample_rate).or_insert(0) += 1;
        for snapshot in state.snapshots.iter_mut() {
            if snapshot.sample_rate() >= sample_rate {
                snapshot.add_channel(channel_id);
            }
        }

        debug!(
            room = %self.label,
            channel_id,
            sample_rate,
            current_rate = state.current_rate(self.config.default_sample_rate),
            "Mixer channel added"
        );
        Ok(channel_id)
    }

    /// Remove a participant. Unknown ids are ignored.
    pub fn remove_channel(&self, channel_id: ChannelId) {
        let mut state = self.state.lock();
        let Some(channel) = state.channels.remove(&channel_id) else {
            debug!(room = %self.label, channel_id, "remove_channel for unknown channel");
            return;
        };

        if let Some(count) = state.rates.get_mut(&channel.sample_rate) {
            *count -= 1;
            if *count == 0 {
                state.rates.remove(&channel.sample_rate);
            }
        }
        for snapshot in state.snapshots.iter_mut() {
            snapshot.remove_channel(channel_id);
        }
        if state.channels.is_empty() {
            state.snapshots.clear();
        }

        debug!(
            room = %self.label,
            channel_id,
            remaining = state.channels.len(),
            current_rate = state.current_rate(self.config.default_sample_rate),
            "Mixer channel removed"
        );
    }

    /// Feed `samples` captured at wall-clock `ts` for `channel_id`.
    ///
    /// `sample_rate` must be the mixer's current rate; a packet produced for
    /// a rate that has since changed is dropped.
    pub fn put(&self, channel_id: ChannelId, ts: u64, samples: &[i16], sample_rate: u32) {
        if samples.is_empty() {
            return;
        }

        let mut state = self.state.lock();
        let current = state.current_rate(self.config.default_sample_rate);
        if sample_rate != current {
            state.stats.dropped_packets += 1;
            debug!(
                room = %self.label,
                channel_id,
                sample_rate,
                current_rate = current,
                "Dropping put made for a stale mixer rate"
            );
            return;
        }
        if !state.channels.contains_key(&channel_id) {
            state.stats.dropped_packets += 1;
            warn!(room = %self.label, channel_id, "put for unknown mixer channel");
            return;
        }

        let put_ts = ts + self.delay;
        let pos = wallclock_to_samples(put_ts, current);
        let end_ts = put_ts + samples_to_wallclock(samples.len(), current);

        let index = self.find_or_create(&mut state, current);
        if state.snapshots[index].write(channel_id, pos, samples, end_ts) {
            state.stats.puts += 1;
            trace!(room = %self.label, channel_id, pos, count = samples.len(), "Mixed put");
        } else {
            state.stats.dropped_packets += 1;
            warn!(
                room = %self.label,
                channel_id,
                ts,
                "Dropping packet older than the mix buffer"
            );
        }
    }

    /// Mix for `channel_id` at wall-clock `ts`, covering `count` samples at
    /// `count_rate`.
    ///
    /// The packet comes back at the rate of the snapshot that served it,
    /// which may differ from `count_rate`. An empty packet means nothing has
    /// been mixed yet; an unknown channel gets silence.
    pub fn get(&self, channel_id: ChannelId, ts: u64, count: usize, count_rate: u32) -> MixedPacket {
        let mut state = self.state.lock();
        if !state.channels.contains_key(&channel_id) {
            warn!(room = %self.label, channel_id, "get for unknown mixer channel");
            return MixedPacket {
                samples: vec![0; count],
                sample_rate: count_rate,
            };
        }

        let current = state.current_rate(self.config.default_sample_rate);
        let read_end = ts + samples_to_wallclock(count, count_rate);
        let index = match state.snapshots.iter().position(|s| s.last_ts() >= read_end) {
            Some(index) => index,
            None if !state.snapshots.is_empty() => state.snapshots.len() - 1,
            None => self.find_or_create(&mut state, current),
        };

        let snapshot = &state.snapshots[index];
        if !snapshot.has_data() {
            return MixedPacket {
                samples: Vec::new(),
                sample_rate: snapshot.sample_rate(),
            };
        }

        let sample_rate = snapshot.sample_rate();
        let snap_count = rescale_count(count, count_rate, sample_rate);
        let mut mixed = vec![0i32; snap_count];
        snapshot.read(channel_id, wallclock_to_samples(ts, sample_rate), &mut mixed);

        let mut samples = vec![0i16; snap_count];
        let clipped = state.scaler.scale_packet(&mixed, &mut samples);
        state.stats.gets += 1;
        state.stats.clipped_samples += clipped as u64;
        if clipped > 0 {
            trace!(room = %self.label, channel_id, clipped, factor = state.scaler.factor(), "Gain reduced");
        }

        if let Some(channel) = state.channels.get_mut(&channel_id) {
            channel.last_read = Some(ts);
        }
        self.evict_unreachable(&mut state, current);

        MixedPacket { samples, sample_rate }
    }

    /// Rate every put must currently be made at.
    pub fn current_sample_rate(&self) -> u32 {
        self.state.lock().current_rate(self.config.default_sample_rate)
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    pub fn has_channel(&self, channel_id: ChannelId) -> bool {
        self.state.lock().channels.contains_key(&channel_id)
    }

    /// Current output gain in 1/64 steps.
    pub fn scaling_factor(&self) -> i32 {
        self.state.lock().scaler.factor()
    }

    /// Rates of live snapshots, oldest first.
    pub fn snapshot_rates(&self) -> Vec<u32> {
        self.state.lock().snapshots.iter().map(|s| s.sample_rate()).collect()
    }

    pub fn stats(&self) -> MixerStats {
        self.state.lock().stats
    }

    /// Index of the snapshot at `rate`, creating it if needed. A reused
    /// snapshot moves to the back of the deque and has its channel set
    /// brought up to date.
    fn find_or_create(&self, state: &mut MixerState, rate: u32) -> usize {
        let active = state.active_ids();
        match state.snapshots.iter().position(|s| s.sample_rate() == rate) {
            Some(index) => {
                let last = state.snapshots.len() - 1;
                if index != last {
                    if let Some(snapshot) = state.snapshots.remove(index) {
                        state.snapshots.push_back(snapshot);
                    }
                }
                state.snapshots[last].fix_channels(&active);
            }
            None => {
                let capacity = self.config.ring_capacity(rate);
                state
                    .snapshots
                    .push_back(MixBufferSnapshot::new(rate, capacity, active));
                debug!(room = %self.label, sample_rate = rate, "Created mix snapshot");

                while state.snapshots.len() > self.config.max_snapshots {
                    let Some(oldest) = state.snapshots.iter().position(|s| s.sample_rate() != rate) else {
                        break;
                    };
                    state.snapshots.remove(oldest);
                }
            }
        }
        state.snapshots.len() - 1
    }

    /// Drop snapshots no reader can reach any more, keeping the one at the
    /// current rate.
    fn evict_unreachable(&self, state: &mut MixerState, current: u32) {
        let Some(min_read) = state.channels.values().filter_map(|c| c.last_read).min() else {
            return;
        };
        let before = state.snapshots.len();
        state
            .snapshots
            .retain(|s| s.sample_rate() == current || s.last_ts() >= min_read);
        if state.snapshots.len() != before {
            debug!(
                room = %self.label,
                evicted = before - state.snapshots.len(),
                "Evicted stale mix snapshots"
            );
        }
    }
}

impl std::fmt::Debug for Mixer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mixer").field("label", &self.label).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ms_to_wallclock;

    fn unity_config() -> MixerConfig {
        MixerConfig {
            initial_scaling: 64,
            ..Default::default()
        }
    }

    const TICK: u64 = 480;
    const DELAY: u64 = 960;

    #[test]
    fn test_channel_ids_reuse_lowest_free() {
        let mixer = Mixer::new("r", MixerConfig::default());
        assert_eq!(mixer.add_channel(8000).unwrap(), 0);
        assert_eq!(mixer.add_channel(8000).unwrap(), 1);
        assert_eq!(mixer.add_channel(8000).unwrap(), 2);

        mixer.remove_channel(1);
        assert_eq!(mixer.add_channel(16000).unwrap(), 1);
        assert_eq!(mixer.channel_count(), 3);
    }

    #[test]
    fn test_zero_rate_rejected() {
        let mixer = Mixer::new("r", MixerConfig::default());
        assert!(matches!(mixer.add_channel(0), Err(MediaError::InvalidSampleRate { rate: 0 })));
    }

    #[test]
    fn test_current_rate_follows_highest_member() {
        let mixer = Mixer::new("r", MixerConfig::default());
        assert_eq!(mixer.current_sample_rate(), 8000);

        let a = mixer.add_channel(16000).unwrap();
        let b = mixer.add_channel(48000).unwrap();
        let c = mixer.add_channel(48000).unwrap();
        assert_eq!(mixer.current_sample_rate(), 48000);

        mixer.remove_channel(b);
        assert_eq!(mixer.current_sample_rate(), 48000);
        mixer.remove_channel(c);
        assert_eq!(mixer.current_sample_rate(), 16000);
        mixer.remove_channel(a);
        assert_eq!(mixer.current_sample_rate(), 8000);
    }

    #[test]
    fn test_two_party_mix_after_delay() {
        let mixer = Mixer::new("r", unity_config());
        let a = mixer.add_channel(8000).unwrap();
        let b = mixer.add_channel(8000).unwrap();

        mixer.put(a, 0, &[1000; 80], 8000);
        mixer.put(b, 0, &[-300; 80], 8000);

        let to_a = mixer.get(a, DELAY, 80, 8000);
        let to_b = mixer.get(b, DELAY, 80, 8000);
        assert_eq!(to_a.samples, vec![-300; 80]);
        assert_eq!(to_b.samples, vec![1000; 80]);

        // Before the delay has elapsed nothing from t = 0 is audible.
        let early = mixer.get(a, 0, 80, 8000);
        assert!(early.samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_get_before_any_put_is_empty() {
        let mixer = Mixer::new("r", MixerConfig::default());
        let a = mixer.add_channel(8000).unwrap();
        let packet = mixer.get(a, 0, 80, 8000);
        assert!(packet.is_empty());
        assert_eq!(packet.sample_rate, 8000);
    }

    #[test]
    fn test_unknown_channel_gets_silence() {
        let mixer = Mixer::new("r", MixerConfig::default());
        mixer.add_channel(8000).unwrap();
        let packet = mixer.get(42, 0, 160, 16000);
        assert_eq!(packet.samples, vec![0; 160]);
        assert_eq!(packet.sample_rate, 16000);

        mixer.put(42, 0, &[1; 80], 8000);
        assert_eq!(mixer.stats().dropped_packets, 1);
    }

    #[test]
    fn test_stale_rate_put_is_dropped() {
        let mixer = Mixer::new("r", unity_config());
        let a = mixer.add_channel(8000).unwrap();
        let b = mixer.add_channel(8000).unwrap();
        mixer.add_channel(16000).unwrap();

        mixer.put(a, 0, &[500; 80], 8000);
        assert_eq!(mixer.stats().dropped_packets, 1);
        assert_eq!(mixer.stats().puts, 0);

        mixer.put(a, 0, &[500; 160], 16000);
        let heard = mixer.get(b, DELAY, 80, 8000);
        assert_eq!(heard.sample_rate, 16000);
        assert_eq!(heard.samples, vec![500; 160]);
    }

    #[test]
    fn test_removed_channel_is_silent_immediately() {
        let mixer = Mixer::new("r", unity_config());
        let a = mixer.add_channel(8000).unwrap();
        let b = mixer.add_channel(8000).unwrap();
        let c = mixer.add_channel(8000).unwrap();

        mixer.put(a, 0, &[100; 80], 8000);
        mixer.put(b, 0, &[200; 80], 8000);
        mixer.remove_channel(b);

        let heard = mixer.get(c, DELAY, 80, 8000);
        assert_eq!(heard.samples, vec![100; 80]);
    }

    #[test]
    fn test_late_packet_dropped() {
        let config = MixerConfig {
            buffer_ms: 100,
            ..unity_config()
        };
        let mixer = Mixer::new("r", config);
        let a = mixer.add_channel(8000).unwrap();
        mixer.put(a, ms_to_wallclock(1000), &[1; 80], 8000);
        mixer.put(a, 0, &[1; 80], 8000);
        assert_eq!(mixer.stats().puts, 1);
        assert_eq!(mixer.stats().dropped_packets, 1);
    }

    #[test]
    fn test_snapshots_follow_rate_changes_and_get_evicted() {
        let mixer = Mixer::new("r", unity_config());
        let a = mixer.add_channel(8000).unwrap();
        let b = mixer.add_channel(8000).unwrap();

        mixer.put(a, 0, &[10; 80], 8000);
        mixer.get(a, 0, 80, 8000);
        mixer.get(b, 0, 80, 8000);
        assert_eq!(mixer.snapshot_rates(), vec![8000]);

        let c = mixer.add_channel(16000).unwrap();
        mixer.put(c, TICK, &[20; 160], 16000);
        assert_eq!(mixer.snapshot_rates(), vec![8000, 16000]);

        // Readers at t = 10 ms still drain the 8 kHz data written for 20 ms.
        let heard = mixer.get(b, DELAY, 80, 8000);
        assert_eq!(heard.sample_rate, 8000);
        assert_eq!(heard.samples, vec![10; 80]);

        // Once every reader has moved past it, the old snapshot goes.
        for ch in [a, b, c] {
            mixer.get(ch, DELAY + TICK * 3, 80, 8000);
        }
        assert_eq!(mixer.snapshot_rates(), vec![16000]);
    }

    #[test]
    fn test_snapshot_count_is_capped() {
        let config = MixerConfig {
            max_snapshots: 2,
            ..unity_config()
        };
        let mixer = Mixer::new("r", config);
        let base = mixer.add_channel(8000).unwrap();
        mixer.put(base, 0, &[1; 80], 8000);

        let mid = mixer.add_channel(16000).unwrap();
        mixer.put(mid, 0, &[1; 160], 16000);
        mixer.add_channel(32000).unwrap();
        mixer.put(mid, 0, &[1; 320], 32000);

        assert_eq!(mixer.snapshot_rates(), vec![16000, 32000]);
    }

    #[test]
    fn test_last_leave_clears_snapshots() {
        let mixer = Mixer::new("r", MixerConfig::default());
        let a = mixer.add_channel(8000).unwrap();
        mixer.put(a, 0, &[1; 80], 8000);
        mixer.remove_channel(a);
        assert!(mixer.snapshot_rates().is_empty());
        assert_eq!(mixer.channel_count(), 0);
    }
}
