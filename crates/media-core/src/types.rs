//! Shared identifiers and time-base helpers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wall-clock ticks per second used for every absolute timestamp.
///
/// 48 kHz keeps 10 ms boundaries integral at 8, 16, 32, 44.1 and 48 kHz.
pub const WALLCLOCK_RATE: u32 = 48_000;

/// Largest magnitude a mixed output sample may take.
pub const MAX_LINEAR_SAMPLE: i32 = i16::MAX as i32;

/// One participant's slot within a mixer
pub type ChannelId = u32;

/// Session ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Conference room identifier
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RoomId(pub String);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RoomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Convert a wall-clock timestamp to a sample index at `sample_rate`.
pub fn wallclock_to_samples(ts: u64, sample_rate: u32) -> u64 {
    ts * sample_rate as u64 / WALLCLOCK_RATE as u64
}

/// Wall-clock duration covered by `count` samples at `sample_rate`.
pub fn samples_to_wallclock(count: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    count as u64 * WALLCLOCK_RATE as u64 / sample_rate as u64
}

/// Wall-clock ticks in `ms` milliseconds.
pub fn ms_to_wallclock(ms: u64) -> u64 {
    ms * WALLCLOCK_RATE as u64 / 1000
}

/// Number of samples at `sample_rate` covering `ms` milliseconds.
pub fn samples_per_ms(ms: u64, sample_rate: u32) -> usize {
    (ms * sample_rate as u64 / 1000) as usize
}

/// Rescale a sample count between two rates, rounding to nearest.
pub fn rescale_count(count: usize, from_rate: u32, to_rate: u32) -> usize {
    if from_rate == to_rate || from_rate == 0 {
        return count;
    }
    ((count as u64 * to_rate as u64 + from_rate as u64 / 2) / from_rate as u64) as usize
}
