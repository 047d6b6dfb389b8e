//! Error handling for the media engine
//!
//! Only structural failures surface here (allocating a room, scheduling a
//! session, loading configuration). Failures on the per-packet hot path are
//! logged and absorbed where they happen.

use thiserror::Error;

use crate::types::{RoomId, SessionId};

/// Result type alias for media engine operations
pub type Result<T> = std::result::Result<T, MediaError>;

/// Error type for media engine operations
#[derive(Error, Debug)]
pub enum MediaError {
    /// A sample rate of zero or otherwise unusable
    #[error("Invalid sample rate: {rate}Hz")]
    InvalidSampleRate { rate: u32 },

    /// Configuration values that cannot work together
    #[error("Invalid configuration: {details}")]
    InvalidConfig { details: String },

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] infra_common::Error),

    /// The room already holds its maximum number of participants
    #[error("Room {room_id} is full ({max} participants)")]
    RoomFull { room_id: RoomId, max: usize },

    /// Channel id not known to the mixer
    #[error("Channel {channel_id} not found")]
    ChannelNotFound { channel_id: u32 },

    /// The session is already attached to a media worker
    #[error("Session {session_id} is already scheduled")]
    SessionAlreadyScheduled { session_id: SessionId },

    /// The session is not attached to any media worker
    #[error("Session {session_id} is not scheduled")]
    SessionNotScheduled { session_id: SessionId },

    /// The target media worker cannot take more sessions
    #[error("Media worker {worker} is at capacity ({max} sessions)")]
    CapacityExhausted { worker: usize, max: usize },

    /// The scheduler has been shut down
    #[error("Media scheduler is shut down")]
    SchedulerShutdown,

    /// A media worker thread could not be started
    #[error("Failed to spawn media worker {worker}: {reason}")]
    ThreadSpawn { worker: usize, reason: String },

    /// Transport read/write failure reported by a session's audio port
    #[error("Transport error: {reason}")]
    Transport { reason: String },
}

impl MediaError {
    /// Create a new invalid configuration error
    pub fn invalid_config(details: impl Into<String>) -> Self {
        Self::InvalidConfig {
            details: details.into(),
        }
    }

    /// Create a new transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }
}
