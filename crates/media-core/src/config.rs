//! Engine configuration
//!
//! Every section deserializes with defaults, so a config file only needs the
//! keys it wants to change:
//!
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [scheduler]
//! worker_count = 4
//! tick_interval_ms = 10
//!
//! [mixer]
//! mixer_delay_ms = 20
//! ```

use serde::Deserialize;
use std::path::Path;

use infra_common::{ErrorContext, ErrorExt, LoggingConfig};

use crate::error::{MediaError, Result};

/// Prefix for environment overrides (`CONFMIX_MIXER__BUFFER_MS=2000`)
pub const ENV_PREFIX: &str = "CONFMIX";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub scheduler: SchedulerConfig,
    pub mixer: MixerConfig,
    pub conference: ConferenceConfig,
}

impl EngineConfig {
    /// Load from a TOML file with `CONFMIX_*` environment overrides, then
    /// validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let context = ErrorContext::new("engine", "load_config").with_details(path.display().to_string());
        let config: EngineConfig = infra_common::config::load_config(path, ENV_PREFIX).context(context)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from an in-memory TOML document, then validate.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: EngineConfig =
            infra_common::config::parse_config(source, ENV_PREFIX).with_context("engine", "parse_config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.mixer.validate(self.scheduler.tick_interval_ms)?;
        self.conference.validate()?;
        Ok(())
    }
}

/// Media scheduler settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of media worker threads
    pub worker_count: usize,
    /// Tick period of every worker
    pub tick_interval_ms: u64,
    /// Hard cap on sessions per worker (`None` = unbounded)
    pub max_sessions_per_worker: Option<usize>,
    /// Consecutive read/write failures before a session is cleared
    pub error_threshold: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get().max(1),
            tick_interval_ms: 10,
            max_sessions_per_worker: None,
            error_threshold: 1,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(MediaError::invalid_config("scheduler.worker_count must be at least 1"));
        }
        if self.tick_interval_ms == 0 {
            return Err(MediaError::invalid_config("scheduler.tick_interval_ms must be at least 1"));
        }
        if self.error_threshold == 0 {
            return Err(MediaError::invalid_config("scheduler.error_threshold must be at least 1"));
        }
        if self.max_sessions_per_worker == Some(0) {
            return Err(MediaError::invalid_config("scheduler.max_sessions_per_worker must be at least 1"));
        }
        Ok(())
    }
}

/// Mixer settings, shared by every room's mixer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Fixed delay between a put and the read that consumes it
    pub mixer_delay_ms: u64,
    /// Ring capacity per channel, in milliseconds of audio
    pub buffer_ms: u64,
    /// Gain a fresh mixer starts with, in 1/64 steps
    pub initial_scaling: i32,
    /// Gain ceiling in 1/64 steps (64 = unity)
    pub max_scaling: i32,
    /// Rate reported while no channel is active
    pub default_sample_rate: u32,
    /// Upper bound on live per-rate snapshots
    pub max_snapshots: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            mixer_delay_ms: 20,
            buffer_ms: 1000,
            initial_scaling: 16,
            max_scaling: 64,
            default_sample_rate: 8000,
            max_snapshots: 8,
        }
    }
}

impl MixerConfig {
    /// Validate against the scheduler tick: a reader may lag a writer by the
    /// mixer delay plus one tick, and the ring has to cover that.
    pub fn validate(&self, tick_interval_ms: u64) -> Result<()> {
        if self.buffer_ms <= self.mixer_delay_ms + tick_interval_ms {
            return Err(MediaError::invalid_config(format!(
                "mixer.buffer_ms ({}) must exceed mixer_delay_ms + tick ({} ms)",
                self.buffer_ms,
                self.mixer_delay_ms + tick_interval_ms
            )));
        }
        if self.max_scaling < 1 || self.initial_scaling < 1 || self.initial_scaling > self.max_scaling {
            return Err(MediaError::invalid_config(format!(
                "mixer scaling must satisfy 1 <= initial_scaling ({}) <= max_scaling ({})",
                self.initial_scaling, self.max_scaling
            )));
        }
        if self.default_sample_rate == 0 {
            return Err(MediaError::InvalidSampleRate { rate: 0 });
        }
        if self.max_snapshots == 0 {
            return Err(MediaError::invalid_config("mixer.max_snapshots must be at least 1"));
        }
        Ok(())
    }

    /// Ring capacity in samples at `sample_rate`
    pub fn ring_capacity(&self, sample_rate: u32) -> usize {
        (self.buffer_ms * sample_rate as u64 / 1000).max(1) as usize
    }
}

/// Conference registry settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConferenceConfig {
    /// Participants allowed per room (`None` = unbounded)
    pub max_participants: Option<usize>,
}

impl ConferenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_participants == Some(0) {
            return Err(MediaError::invalid_config("conference.max_participants must be at least 1"));
        }
        Ok(())
    }
}
