//! Adapter between a session's native-rate audio and a room mixer

use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

use super::registry::ConferenceRegistry;
use crate::error::Result;
use crate::mixer::Mixer;
use crate::resample::{fit_to_length, Resampler};
use crate::session::AudioPort;
use crate::types::{rescale_count, ChannelId, RoomId, SessionId};

/// One participant's view of a room mixer.
///
/// Converts between the participant's native rate and whatever rate the
/// mixer currently runs at. An owning channel gives its id back when
/// dropped: through the registry it came from if that is still alive,
/// otherwise straight to the mixer.
pub struct ConferenceChannel {
    room_id: RoomId,
    session_id: Option<SessionId>,
    channel_id: ChannelId,
    mixer: Arc<Mixer>,
    owns_channel: bool,
    registry: Weak<ConferenceRegistry>,
    inbound: Option<Resampler>,
    outbound: Option<Resampler>,
}

impl ConferenceChannel {
    /// Wrap an existing mixer channel.
    pub fn new(mixer: Arc<Mixer>, channel_id: ChannelId, owns_channel: bool) -> Self {
        Self {
            room_id: RoomId::from(mixer.label()),
            session_id: None,
            channel_id,
            mixer,
            owns_channel,
            registry: Weak::new(),
            inbound: None,
            outbound: None,
        }
    }

    pub(crate) fn attached(
        registry: Weak<ConferenceRegistry>,
        room_id: RoomId,
        session_id: SessionId,
        channel_id: ChannelId,
        mixer: Arc<Mixer>,
        owns_channel: bool,
    ) -> Self {
        Self {
            room_id,
            session_id: Some(session_id),
            channel_id,
            mixer,
            owns_channel,
            registry,
            inbound: None,
            outbound: None,
        }
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Whether dropping this channel releases the mixer channel.
    pub fn owns_channel(&self) -> bool {
        self.owns_channel
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    /// Send `samples` at `native_rate`, captured at wall-clock `ts`.
    pub fn put_samples(&mut self, ts: u64, samples: &[i16], native_rate: u32) -> usize {
        if samples.is_empty() {
            return 0;
        }
        if native_rate == 0 {
            warn!(channel_id = self.channel_id, "Dropping samples sent at rate 0");
            return 0;
        }
        let mixer_rate = self.mixer.current_sample_rate();
        if mixer_rate == native_rate {
            self.mixer.put(self.channel_id, ts, samples, native_rate);
            return samples.len();
        }

        if !self.inbound.as_ref().is_some_and(|r| r.converts(native_rate, mixer_rate)) {
            trace!(channel_id = self.channel_id, native_rate, mixer_rate, "New inbound resampler");
            self.inbound = Some(Resampler::new(native_rate, mixer_rate));
        }
        let resampler = self
            .inbound
            .get_or_insert_with(|| Resampler::new(native_rate, mixer_rate));
        let mut converted = Vec::with_capacity(rescale_count(samples.len(), native_rate, mixer_rate));
        resampler.process(samples, &mut converted);
        fit_to_length(&mut converted, rescale_count(samples.len(), native_rate, mixer_rate));

        self.mixer.put(self.channel_id, ts, &converted, mixer_rate);
        samples.len()
    }

    /// Fill `buf` with the mix at `native_rate` for wall-clock `ts`.
    ///
    /// Returns 0 when the mixer has nothing yet; `buf` is left untouched.
    pub fn get_samples(&mut self, ts: u64, buf: &mut [i16], native_rate: u32) -> usize {
        if buf.is_empty() {
            return 0;
        }
        if native_rate == 0 {
            warn!(channel_id = self.channel_id, "Ignoring read at rate 0");
            return 0;
        }
        let packet = self.mixer.get(self.channel_id, ts, buf.len(), native_rate);
        if packet.is_empty() {
            return 0;
        }

        let mut samples = if packet.sample_rate == native_rate {
            packet.samples
        } else {
            let mix_rate = packet.sample_rate;
            if !self.outbound.as_ref().is_some_and(|r| r.converts(mix_rate, native_rate)) {
                trace!(channel_id = self.channel_id, mix_rate, native_rate, "New outbound resampler");
                self.outbound = Some(Resampler::new(mix_rate, native_rate));
            }
            let resampler = self
                .outbound
                .get_or_insert_with(|| Resampler::new(mix_rate, native_rate));
            let mut converted = Vec::with_capacity(buf.len());
            resampler.process(&packet.samples, &mut converted);
            converted
        };
        fit_to_length(&mut samples, buf.len());
        buf.copy_from_slice(&samples);
        buf.len()
    }
}

impl AudioPort for ConferenceChannel {
    fn get(&mut self, ts: u64, buf: &mut [i16], sample_rate: u32) -> Result<usize> {
        Ok(self.get_samples(ts, buf, sample_rate))
    }

    fn put(&mut self, ts: u64, samples: &[i16], sample_rate: u32) -> Result<usize> {
        Ok(self.put_samples(ts, samples, sample_rate))
    }
}

impl Drop for ConferenceChannel {
    fn drop(&mut self) {
        if !self.owns_channel {
            return;
        }
        match self.registry.upgrade() {
            Some(registry) => registry.release_channel(&self.room_id, self.channel_id),
            None => {
                debug!(room_id = %self.room_id, channel_id = self.channel_id, "Releasing channel directly to mixer");
                self.mixer.remove_channel(self.channel_id);
            }
        }
    }
}

impl std::fmt::Debug for ConferenceChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceChannel")
            .field("room_id", &self.room_id)
            .field("session_id", &self.session_id)
            .field("channel_id", &self.channel_id)
            .field("owns_channel", &self.owns_channel)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MixerConfig;

    const DELAY: u64 = 960;

    fn mixer() -> Arc<Mixer> {
        Arc::new(Mixer::new(
            "room",
            MixerConfig {
                initial_scaling: 64,
                ..Default::default()
            },
        ))
    }

    #[test]
    fn test_same_rate_round_trip_through_mixer() {
        let mixer = mixer();
        let mut a = ConferenceChannel::new(mixer.clone(), mixer.add_channel(8000).unwrap(), true);
        let mut b = ConferenceChannel::new(mixer.clone(), mixer.add_channel(8000).unwrap(), true);

        assert_eq!(a.put_samples(0, &[400; 80], 8000), 80);
        let mut buf = [0i16; 80];
        assert_eq!(b.get_samples(DELAY, &mut buf, 8000), 80);
        assert_eq!(buf, [400; 80]);
    }

    #[test]
    fn test_zero_native_rate_is_a_no_op() {
        let mixer = mixer();
        let mut a = ConferenceChannel::new(mixer.clone(), mixer.add_channel(8000).unwrap(), true);
        let mut b = ConferenceChannel::new(mixer.clone(), mixer.add_channel(8000).unwrap(), true);

        assert_eq!(a.put_samples(0, &[1; 80], 0), 0);
        let mut buf = [7i16; 80];
        assert_eq!(a.get_samples(DELAY, &mut buf, 0), 0);
        assert_eq!(buf, [7; 80]);
        assert_eq!(a.put(0, &[1; 80], 0).unwrap(), 0);

        // The channel still works at a real rate afterwards.
        assert_eq!(a.put_samples(0, &[400; 80], 8000), 80);
        assert_eq!(b.get_samples(DELAY, &mut buf, 8000), 80);
        assert_eq!(buf, [400; 80]);
    }

    #[test]
    fn test_nothing_yet_returns_zero() {
        let mixer = mixer();
        let mut a = ConferenceChannel::new(mixer.clone(), mixer.add_channel(8000).unwrap(), true);
        let mut buf = [7i16; 80];
        assert_eq!(a.get_samples(0, &mut buf, 8000), 0);
        assert_eq!(buf, [7; 80]);
    }

    #[test]
    fn test_low_rate_participant_hears_high_rate_mix() {
        let mixer = mixer();
        let mut narrow = ConferenceChannel::new(mixer.clone(), mixer.add_channel(8000).unwrap(), true);
        let mut wide = ConferenceChannel::new(mixer.clone(), mixer.add_channel(16000).unwrap(), true);
        assert_eq!(mixer.current_sample_rate(), 16000);

        // The 8 kHz participant is upsampled on the way in.
        narrow.put_samples(0, &[1000; 80], 8000);
        let mut wide_buf = [0i16; 160];
        assert_eq!(wide.get_samples(DELAY, &mut wide_buf, 16000), 160);
        assert!(wide_buf[1..].iter().all(|&s| s == 1000));

        wide.put_samples(0, &[-2000; 160], 16000);
        let mut narrow_buf = [0i16; 80];
        assert_eq!(narrow.get_samples(DELAY, &mut narrow_buf, 8000), 80);
        assert!(narrow_buf.iter().all(|&s| s == -2000));
    }

    #[test]
    fn test_owning_channel_releases_on_drop() {
        let mixer = mixer();
        let id = mixer.add_channel(8000).unwrap();
        let observer = ConferenceChannel::new(mixer.clone(), id, false);
        drop(observer);
        assert!(mixer.has_channel(id));

        let owner = ConferenceChannel::new(mixer.clone(), id, true);
        drop(owner);
        assert!(!mixer.has_channel(id));
    }
}
