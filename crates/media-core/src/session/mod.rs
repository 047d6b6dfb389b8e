//! What the scheduler needs from a call's media
//!
//! The media scheduler drives sessions through [`MediaSession`] and knows
//! nothing about transports or codecs. Audio moves through [`AudioPort`]s:
//! a transport on one side, a [`ConferenceChannel`](crate::conference::ConferenceChannel)
//! on the other.

mod conference_session;
pub mod dtmf;

pub use conference_session::{ConferenceSession, DtmfHandler};
pub use dtmf::{DtmfEvent, DtmfQueue, DtmfTone};

use crate::error::Result;
use crate::types::SessionId;

/// A call's media as seen by a media worker.
///
/// Every method is called from the worker that owns the session and must
/// return promptly: no method may block waiting for audio.
pub trait MediaSession: Send + Sync {
    fn session_id(&self) -> &SessionId;

    /// Pull one tick of audio from the transport into the mix.
    fn read_streams(&self, ts: u64) -> Result<()>;

    /// Push one tick of mixed audio out to the transport.
    fn write_streams(&self, ts: u64) -> Result<()>;

    fn process_dtmf_events(&self);

    /// Detach and reset all audio objects.
    fn clear_audio(&self);

    fn clear_rtp_timeout(&self);

    fn is_processing_media(&self) -> bool;

    fn set_processing_media(&self, processing: bool);

    /// Called once the session has left its worker for good.
    fn on_media_processing_terminated(&self) {
        self.set_processing_media(false);
    }
}

/// A bidirectional source/sink of linear PCM addressed by wall-clock time.
pub trait AudioPort: Send {
    /// Fill `buf` with audio at `sample_rate` for time `ts`. Returns the
    /// number of samples produced; 0 means nothing available yet.
    fn get(&mut self, ts: u64, buf: &mut [i16], sample_rate: u32) -> Result<usize>;

    /// Consume `samples` at `sample_rate` for time `ts`. Returns the number
    /// of samples accepted.
    fn put(&mut self, ts: u64, samples: &[i16], sample_rate: u32) -> Result<usize>;
}
