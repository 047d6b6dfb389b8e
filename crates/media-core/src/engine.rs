//! Process-wide media state with explicit start and shutdown

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, Level};

use infra_common::logging::{with_context, LogContext};

use crate::conference::{ConferenceRegistry, SessionEventBus, SessionEventSink};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::scheduler::MediaScheduler;

/// The conference registry and media scheduler, built together and torn
/// down together.
///
/// Construct one at startup and hand [`registry`](Self::registry) and
/// [`scheduler`](Self::scheduler) to whatever needs them.
pub struct MediaEngine {
    config: EngineConfig,
    registry: Arc<ConferenceRegistry>,
    scheduler: Arc<MediaScheduler>,
    events: Option<Arc<SessionEventBus>>,
    stopped: AtomicBool,
}

impl MediaEngine {
    /// Start with a [`SessionEventBus`] delivering conference events.
    pub fn start(config: EngineConfig) -> Result<Self> {
        let bus = Arc::new(SessionEventBus::new());
        let mut engine = Self::start_with_sink(config, bus.clone())?;
        engine.events = Some(bus);
        Ok(engine)
    }

    /// Start with a caller-provided event sink.
    pub fn start_with_sink(config: EngineConfig, sink: Arc<dyn SessionEventSink>) -> Result<Self> {
        config.validate()?;

        let log_context = LogContext::with_operation("engine", "start")
            .with_field("workers", config.scheduler.worker_count.to_string())
            .with_field("tick_ms", config.scheduler.tick_interval_ms.to_string());
        let (scheduler, registry) = with_context(&log_context, Level::INFO, || -> Result<_> {
            let scheduler = Arc::new(MediaScheduler::new(config.scheduler.clone())?);
            let registry = Arc::new(ConferenceRegistry::new(
                sink,
                config.mixer.clone(),
                config.conference.clone(),
            ));
            info!(mixer_delay_ms = config.mixer.mixer_delay_ms, "Media engine started");
            Ok((scheduler, registry))
        })?;

        Ok(Self {
            config,
            registry,
            scheduler,
            events: None,
            stopped: AtomicBool::new(false),
        })
    }

    /// Load configuration from a TOML file (with `CONFMIX_*` environment
    /// overrides) and start.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::start(EngineConfig::load(path)?)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConferenceRegistry> {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<MediaScheduler> {
        &self.scheduler
    }

    /// The built-in event bus, when started with [`start`](Self::start).
    pub fn events(&self) -> Option<&Arc<SessionEventBus>> {
        self.events.as_ref()
    }

    /// Stop all workers, then free every room.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.scheduler.shutdown();
        self.registry.shutdown();
        info!("Media engine stopped");
    }
}

/// Install the `tracing` subscriber described by `config.logging`.
pub fn init_logging(config: &EngineConfig) -> Result<()> {
    infra_common::setup_logging(&config.logging)?;
    infra_common::logging::log_welcome(&config.logging.app_name, env!("CARGO_PKG_VERSION"));
    Ok(())
}

impl Drop for MediaEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MediaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaEngine")
            .field("scheduler", &self.scheduler)
            .field("registry", &self.registry)
            .finish()
    }
}
