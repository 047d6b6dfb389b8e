//! Media scheduler
//!
//! A fixed pool of worker threads drives every active [`MediaSession`] on a
//! periodic tick. Sessions sharing a callgroup (typically the members of one
//! conference room) are pinned to the same worker; new callgroups go to the
//! least-loaded worker.
//!
//! Every entry point only updates bookkeeping under the group lock and posts
//! a control event to the owning worker; nothing here waits on a tick. A
//! session that is detached and inserted again is only admitted by its new
//! worker after the old one has applied the detach.

mod events;
mod groups;
mod handoff;
mod worker;

pub use groups::Assignment;
pub use worker::{WorkerStats, WorkerStatsSnapshot};

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{MediaError, Result};
use crate::session::MediaSession;
use crate::types::SessionId;
use events::SchedulerEvent;
use groups::GroupBook;
use handoff::Release;
use worker::{spawn_worker, WorkerContext};

struct WorkerHandle {
    sender: mpsc::UnboundedSender<SchedulerEvent>,
    stats: Arc<WorkerStats>,
}

/// Pool of media worker threads
pub struct MediaScheduler {
    config: SchedulerConfig,
    workers: Vec<WorkerHandle>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    groups: Arc<Mutex<GroupBook>>,
    shut_down: AtomicBool,
}

impl MediaScheduler {
    /// Validate `config` and start its worker threads.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        let origin = Instant::now();
        let groups = Arc::new(Mutex::new(GroupBook::new(
            config.worker_count,
            config.max_sessions_per_worker,
        )));
        let mut scheduler = Self {
            workers: Vec::with_capacity(config.worker_count),
            threads: Mutex::new(Vec::with_capacity(config.worker_count)),
            groups: groups.clone(),
            shut_down: AtomicBool::new(false),
            config,
        };

        for index in 0..scheduler.config.worker_count {
            let (sender, events) = mpsc::unbounded_channel();
            let stats = Arc::new(WorkerStats::default());
            let context = WorkerContext {
                index,
                tick_interval_ms: scheduler.config.tick_interval_ms,
                error_threshold: scheduler.config.error_threshold,
                origin,
                events,
                self_sender: sender.downgrade(),
                groups: groups.clone(),
                stats: stats.clone(),
            };
            match spawn_worker(context) {
                Ok(handle) => {
                    scheduler.threads.lock().push(handle);
                    scheduler.workers.push(WorkerHandle { sender, stats });
                }
                Err(e) => {
                    scheduler.shutdown();
                    return Err(e);
                }
            }
        }

        info!(
            workers = scheduler.config.worker_count,
            tick_ms = scheduler.config.tick_interval_ms,
            "Media scheduler started"
        );
        Ok(scheduler)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Start processing `session` on the worker owning `callgroup`.
    ///
    /// Returns the worker index.
    pub fn add_session(&self, session: Arc<dyn MediaSession>, callgroup: &str) -> Result<usize> {
        self.ensure_running()?;
        let mut groups = self.groups.lock();
        self.insert_locked(&mut groups, session, callgroup)
    }

    /// Stop processing a session and let it tear down its media.
    pub fn remove_session(&self, session_id: &SessionId) -> Result<()> {
        self.detach(session_id, |session_id, release| SchedulerEvent::RemoveSession {
            session_id,
            release,
        })
    }

    /// Stop processing a session after an error, clearing its audio.
    pub fn clear_session(&self, session_id: &SessionId) -> Result<()> {
        self.detach(session_id, |session_id, release| SchedulerEvent::ClearSession {
            session_id,
            epoch: None,
            release: Some(release),
        })
    }

    /// Stop processing a session without touching its audio objects.
    pub fn soft_remove_session(&self, session_id: &SessionId) -> Result<()> {
        self.detach(session_id, |session_id, release| SchedulerEvent::SoftRemoveSession {
            session_id,
            release,
        })
    }

    /// Move a session to another callgroup (soft remove, then add).
    ///
    /// The new worker picks the session up only after the old one has let go
    /// of it. Returns the new worker index.
    pub fn change_callgroup(&self, session: Arc<dyn MediaSession>, callgroup: &str) -> Result<usize> {
        self.ensure_running()?;
        let session_id = session.session_id().clone();
        let mut groups = self.groups.lock();
        let (previous, release) = groups
            .detach(&session_id)
            .ok_or_else(|| MediaError::SessionNotScheduled {
                session_id: session_id.clone(),
            })?;
        self.post(
            previous.worker,
            SchedulerEvent::SoftRemoveSession {
                session_id: session_id.clone(),
                release,
            },
        );

        let worker = self.insert_locked(&mut groups, session, callgroup)?;
        debug!(
            session_id = %session_id,
            from = %previous.callgroup,
            to = callgroup,
            worker,
            "Callgroup changed"
        );
        Ok(worker)
    }

    /// Worker currently processing `session_id`.
    pub fn thread_of(&self, session_id: &SessionId) -> Option<usize> {
        self.groups.lock().assignment(session_id).map(|a| a.worker)
    }

    pub fn assignment(&self, session_id: &SessionId) -> Option<Assignment> {
        self.groups.lock().assignment(session_id).cloned()
    }

    /// Worker a callgroup is pinned to, while it has members.
    pub fn callgroup_thread(&self, callgroup: &str) -> Option<usize> {
        self.groups.lock().callgroup_worker(callgroup)
    }

    pub fn session_count(&self) -> usize {
        self.groups.lock().session_count()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Sessions assigned per worker.
    pub fn worker_loads(&self) -> Vec<usize> {
        self.groups.lock().loads().to_vec()
    }

    pub fn worker_stats(&self) -> Vec<WorkerStatsSnapshot> {
        self.workers.iter().map(|w| w.stats.snapshot()).collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Stop every worker and wait for it to exit. Sessions still scheduled
    /// are told their processing has terminated.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for worker in &self.workers {
            let _ = worker.sender.send(SchedulerEvent::Shutdown);
        }
        let threads = std::mem::take(&mut *self.threads.lock());
        let count = threads.len();
        for handle in threads {
            if handle.join().is_err() {
                warn!("Media worker panicked");
            }
        }
        info!(workers = count, "Media scheduler stopped");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(MediaError::SchedulerShutdown);
        }
        Ok(())
    }

    fn insert_locked(
        &self,
        groups: &mut GroupBook,
        session: Arc<dyn MediaSession>,
        callgroup: &str,
    ) -> Result<usize> {
        let session_id = session.session_id().clone();
        let assignment = groups.assign(&session_id, callgroup)?;
        let event = SchedulerEvent::InsertSession {
            session,
            epoch: assignment.epoch,
            after: groups.waiting_on(&session_id),
        };
        if !self.post(assignment.worker, event) {
            groups.unassign(&session_id);
            return Err(MediaError::SchedulerShutdown);
        }
        debug!(
            session_id = %session_id,
            callgroup,
            worker = assignment.worker,
            "Session scheduled"
        );
        Ok(assignment.worker)
    }

    fn detach(
        &self,
        session_id: &SessionId,
        make_event: impl FnOnce(SessionId, Release) -> SchedulerEvent,
    ) -> Result<()> {
        let mut groups = self.groups.lock();
        let (assignment, release) = groups
            .detach(session_id)
            .ok_or_else(|| MediaError::SessionNotScheduled {
                session_id: session_id.clone(),
            })?;
        let event = make_event(session_id.clone(), release);
        debug!(session_id = %session_id, event = event.name(), worker = assignment.worker, "Session detaching");
        self.post(assignment.worker, event);
        Ok(())
    }

    fn post(&self, worker: usize, event: SchedulerEvent) -> bool {
        match self.workers.get(worker) {
            Some(handle) => handle.sender.send(event).is_ok(),
            None => false,
        }
    }
}

impl Drop for MediaScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MediaScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaScheduler")
            .field("workers", &self.workers.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
