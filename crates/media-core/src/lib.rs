//! # Media-Core: Real-Time Conference Mixing Engine
//!
//! This crate is the real-time audio core of a conferencing media server.
//! It mixes any number of participants per room, each at their own native
//! sample rate, and drives every call's media from a small pool of worker
//! threads on a fixed tick.
//!
//! ## Components
//!
//! - [`ring`]: timestamp-addressed sample rings
//! - [`mixer`]: per-room N-1 mixer with per-rate snapshots and anti-clipping gain
//! - [`resample`]: streaming linear-interpolation rate conversion
//! - [`conference`]: room registry, participant channels, join/leave events
//! - [`session`]: the capabilities the scheduler drives, plus a
//!   conference-bound session implementation
//! - [`scheduler`]: media worker pool with callgroup affinity
//! - [`engine`]: process-wide state with explicit start and shutdown
//!
//! ## Usage
//!
//! ```rust,no_run
//! use confmix_media_core::config::EngineConfig;
//! use confmix_media_core::MediaEngine;
//!
//! let engine = MediaEngine::start(EngineConfig::default())?;
//! let channel = engine.registry().get_or_create_channel("room-1", "session-a", 8000)?;
//! assert_eq!(channel.channel_id(), 0);
//! engine.shutdown();
//! # Ok::<(), confmix_media_core::MediaError>(())
//! ```

pub mod conference;
pub mod config;
pub mod engine;
pub mod error;
pub mod mixer;
pub mod resample;
pub mod ring;
pub mod scheduler;
pub mod session;
pub mod types;

pub use conference::{
    ConferenceChannel, ConferenceEvent, ConferenceEventKind, ConferenceRegistry, SessionEventBus,
    SessionEventSink,
};
pub use config::{ConferenceConfig, EngineConfig, MixerConfig, SchedulerConfig};
pub use engine::{init_logging, MediaEngine};
pub use error::{MediaError, Result};
pub use mixer::{MixedPacket, Mixer, MixerStats};
pub use scheduler::{MediaScheduler, WorkerStatsSnapshot};
pub use session::{AudioPort, ConferenceSession, MediaSession};
pub use types::{ChannelId, RoomId, SessionId, WALLCLOCK_RATE};

/// Version information for the media engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
