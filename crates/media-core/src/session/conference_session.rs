//! A [`MediaSession`] that bridges a transport port into a room mixer

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::debug;

use super::dtmf::{DtmfEvent, DtmfQueue};
use super::{AudioPort, MediaSession};
use crate::conference::ConferenceChannel;
use crate::error::Result;
use crate::types::{samples_per_ms, SessionId};

/// Callback receiving each DTMF event drained by the worker
pub type DtmfHandler = Box<dyn Fn(&SessionId, DtmfEvent) + Send + Sync>;

/// Session that moves one frame per tick between a transport and a
/// conference channel.
///
/// On read the transport's audio goes into the room; on write the room's
/// mix (minus this participant) goes back out. A transport that has no
/// audio yet and a mix that is not ready yet are both skipped quietly.
pub struct ConferenceSession {
    id: SessionId,
    sample_rate: u32,
    frame_samples: usize,
    transport: Mutex<Box<dyn AudioPort>>,
    channel: Mutex<Option<ConferenceChannel>>,
    dtmf: DtmfQueue,
    dtmf_handler: Option<DtmfHandler>,
    processing: AtomicBool,
    rtp_timeout_resets: AtomicU64,
}

impl ConferenceSession {
    /// `frame_ms` should match the scheduler tick.
    pub fn new(id: SessionId, sample_rate: u32, frame_ms: u64, transport: Box<dyn AudioPort>) -> Self {
        Self {
            id,
            sample_rate,
            frame_samples: samples_per_ms(frame_ms, sample_rate),
            transport: Mutex::new(transport),
            channel: Mutex::new(None),
            dtmf: DtmfQueue::new(),
            dtmf_handler: None,
            processing: AtomicBool::new(false),
            rtp_timeout_resets: AtomicU64::new(0),
        }
    }

    pub fn with_dtmf_handler(mut self, handler: DtmfHandler) -> Self {
        self.dtmf_handler = Some(handler);
        self
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Connect to a room, replacing (and releasing) any previous channel.
    pub fn attach(&self, channel: ConferenceChannel) {
        let previous = self.channel.lock().replace(channel);
        drop(previous);
    }

    /// Disconnect from the room, handing the channel back to the caller.
    pub fn detach(&self) -> Option<ConferenceChannel> {
        self.channel.lock().take()
    }

    pub fn is_attached(&self) -> bool {
        self.channel.lock().is_some()
    }

    pub fn dtmf_queue(&self) -> &DtmfQueue {
        &self.dtmf
    }

    pub fn rtp_timeout_resets(&self) -> u64 {
        self.rtp_timeout_resets.load(Ordering::Relaxed)
    }
}

impl MediaSession for ConferenceSession {
    fn session_id(&self) -> &SessionId {
        &self.id
    }

    fn read_streams(&self, ts: u64) -> Result<()> {
        let mut frame = vec![0i16; self.frame_samples];
        let mut transport = self.transport.lock();
        let received = transport.get(ts, &mut frame, self.sample_rate)?;
        drop(transport);
        if received == 0 {
            return Ok(());
        }

        if let Some(channel) = self.channel.lock().as_mut() {
            channel.put_samples(ts, &frame[..received.min(frame.len())], self.sample_rate);
        }
        Ok(())
    }

    fn write_streams(&self, ts: u64) -> Result<()> {
        let mut frame = vec![0i16; self.frame_samples];
        let mixed = match self.channel.lock().as_mut() {
            Some(channel) => channel.get_samples(ts, &mut frame, self.sample_rate),
            None => 0,
        };
        if mixed == 0 {
            return Ok(());
        }

        self.transport.lock().put(ts, &frame[..mixed], self.sample_rate)?;
        Ok(())
    }

    fn process_dtmf_events(&self) {
        for event in self.dtmf.drain() {
            debug!(session_id = %self.id, tone = %event.tone, duration_ms = event.duration_ms, "DTMF");
            if let Some(handler) = &self.dtmf_handler {
                handler(&self.id, event);
            }
        }
    }

    fn clear_audio(&self) {
        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            debug!(session_id = %self.id, room_id = %channel.room_id(), "Clearing conference audio");
        }
        self.dtmf.clear();
    }

    fn clear_rtp_timeout(&self) {
        self.rtp_timeout_resets.fetch_add(1, Ordering::Relaxed);
    }

    fn is_processing_media(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    fn set_processing_media(&self, processing: bool) {
        self.processing.store(processing, Ordering::Release);
    }
}

impl std::fmt::Debug for ConferenceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceSession")
            .field("id", &self.id)
            .field("sample_rate", &self.sample_rate)
            .field("frame_samples", &self.frame_samples)
            .finish_non_exhaustive()
    }
}
