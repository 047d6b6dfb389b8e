//! Media worker thread
//!
//! Each worker owns a set of sessions and runs a fixed-period tick: read
//! every session, write every session, deliver DTMF, then apply queued
//! control events. Structural changes only ever happen in that last step, so
//! the session set is never modified while it is being walked.
//!
//! An insertion whose hand-off is still open waits in a side list and is
//! admitted at the end of a later drain.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::{debug, info, info_span, trace, warn};

use super::events::SchedulerEvent;
use super::groups::GroupBook;
use super::handoff::Handoff;
use crate::error::{MediaError, Result};
use crate::session::MediaSession;
use crate::types::{ms_to_wallclock, SessionId};

/// Live counters for one worker
#[derive(Debug, Default)]
pub struct WorkerStats {
    ticks: AtomicU64,
    resyncs: AtomicU64,
    last_tick_micros: AtomicU64,
    max_tick_micros: AtomicU64,
    active_sessions: AtomicUsize,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            resyncs: self.resyncs.load(Ordering::Relaxed),
            last_tick_micros: self.last_tick_micros.load(Ordering::Relaxed),
            max_tick_micros: self.max_tick_micros.load(Ordering::Relaxed),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`WorkerStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStatsSnapshot {
    pub ticks: u64,
    /// Times the clock snapped forward after falling a full tick behind
    pub resyncs: u64,
    pub last_tick_micros: u64,
    pub max_tick_micros: u64,
    pub active_sessions: usize,
}

pub(crate) struct WorkerContext {
    pub index: usize,
    pub tick_interval_ms: u64,
    pub error_threshold: u32,
    /// Common time origin so every worker reports the same wall clock
    pub origin: Instant,
    pub events: mpsc::UnboundedReceiver<SchedulerEvent>,
    pub self_sender: mpsc::WeakUnboundedSender<SchedulerEvent>,
    pub groups: Arc<Mutex<GroupBook>>,
    pub stats: Arc<WorkerStats>,
}

pub(crate) fn spawn_worker(context: WorkerContext) -> Result<thread::JoinHandle<()>> {
    let index = context.index;
    thread::Builder::new()
        .name(format!("media-worker-{index}"))
        .spawn(move || MediaSchedulerThread::new(context).run())
        .map_err(|e| MediaError::ThreadSpawn {
            worker: index,
            reason: e.to_string(),
        })
}

struct ActiveSession {
    session: Arc<dyn MediaSession>,
    epoch: u64,
    failures: u32,
    clear_pending: bool,
}

struct WaitingInsert {
    session: Arc<dyn MediaSession>,
    epoch: u64,
    after: Arc<Handoff>,
}

/// The loop behind one media worker thread
pub(crate) struct MediaSchedulerThread {
    index: usize,
    period: Duration,
    tick_wallclock: u64,
    error_threshold: u32,
    origin: Instant,
    events: mpsc::UnboundedReceiver<SchedulerEvent>,
    self_sender: mpsc::WeakUnboundedSender<SchedulerEvent>,
    groups: Arc<Mutex<GroupBook>>,
    stats: Arc<WorkerStats>,
    sessions: IndexMap<SessionId, ActiveSession>,
    waiting: IndexMap<SessionId, WaitingInsert>,
}

impl MediaSchedulerThread {
    fn new(context: WorkerContext) -> Self {
        Self {
            index: context.index,
            period: Duration::from_millis(context.tick_interval_ms),
            tick_wallclock: ms_to_wallclock(context.tick_interval_ms),
            error_threshold: context.error_threshold,
            origin: context.origin,
            events: context.events,
            self_sender: context.self_sender,
            groups: context.groups,
            stats: context.stats,
            sessions: IndexMap::new(),
            waiting: IndexMap::new(),
        }
    }

    fn run(mut self) {
        let span = info_span!("media_worker", worker = self.index);
        let _enter = span.enter();
        info!("Media worker started");

        let mut deadline = Instant::now();
        let mut ts = self.aligned_wallclock(deadline);
        loop {
            deadline += self.period;
            let now = Instant::now();
            if now < deadline {
                thread::sleep(deadline - now);
                ts += self.tick_wallclock;
            } else if now - deadline >= self.period {
                // Fell a whole tick behind: snap to now instead of replaying
                // the missed ticks back to back.
                let behind = now - deadline;
                deadline = now;
                ts = (ts + self.tick_wallclock).max(self.aligned_wallclock(now));
                self.stats.resyncs.fetch_add(1, Ordering::Relaxed);
                debug!(behind_ms = behind.as_millis() as u64, ts, "Media clock resynced");
            } else {
                ts += self.tick_wallclock;
            }

            let tick_start = Instant::now();
            self.process_tick(ts);
            let keep_running = self.drain_events();
            self.record_tick(tick_start.elapsed());
            if !keep_running {
                break;
            }
        }

        self.terminate_all();
        info!("Media worker stopped");
    }

    fn aligned_wallclock(&self, now: Instant) -> u64 {
        let period_micros = self.period.as_micros().max(1);
        let ticks = now.saturating_duration_since(self.origin).as_micros() / period_micros;
        ticks as u64 * self.tick_wallclock
    }

    fn process_tick(&mut self, ts: u64) {
        let threshold = self.error_threshold;
        let sender = &self.self_sender;

        for (session_id, active) in self.sessions.iter_mut() {
            if active.clear_pending {
                continue;
            }
            let result = active.session.read_streams(ts);
            track_result(session_id, active, result, "read", threshold, sender);
        }
        for (session_id, active) in self.sessions.iter_mut() {
            if active.clear_pending {
                continue;
            }
            let result = active.session.write_streams(ts);
            track_result(session_id, active, result, "write", threshold, sender);
        }
        for active in self.sessions.values() {
            if !active.clear_pending {
                active.session.process_dtmf_events();
            }
        }
    }

    /// Apply queued control events; false once the worker should stop.
    fn drain_events(&mut self) -> bool {
        loop {
            match self.events.try_recv() {
                Ok(SchedulerEvent::Shutdown) => return false,
                Ok(event) => self.apply(event),
                Err(TryRecvError::Empty) => {
                    self.admit_ready();
                    return true;
                }
                Err(TryRecvError::Disconnected) => {
                    debug!("Scheduler gone, stopping worker");
                    return false;
                }
            }
        }
    }

    fn apply(&mut self, event: SchedulerEvent) {
        trace!(event = event.name(), "Applying scheduler event");
        match event {
            SchedulerEvent::InsertSession { session, epoch, after } => match after {
                Some(after) if !after.is_complete() => {
                    let session_id = session.session_id().clone();
                    debug!(session_id = %session_id, epoch, "Session waiting for previous worker");
                    self.waiting
                        .insert(session_id, WaitingInsert { session, epoch, after });
                }
                _ => self.admit(session, epoch),
            },
            SchedulerEvent::RemoveSession { session_id, release } => {
                if let Some(active) = self.sessions.shift_remove(&session_id) {
                    active.session.on_media_processing_terminated();
                    debug!(session_id = %session_id, "Session removed");
                } else {
                    self.withdraw(&session_id);
                }
                drop(release);
            }
            SchedulerEvent::SoftRemoveSession { session_id, release } => {
                if self.sessions.shift_remove(&session_id).is_some() {
                    debug!(session_id = %session_id, "Session detached");
                } else {
                    self.withdraw(&session_id);
                }
                drop(release);
            }
            SchedulerEvent::ClearSession {
                session_id,
                epoch,
                release,
            } => {
                let matches = match (self.sessions.get(&session_id), epoch) {
                    (None, _) => false,
                    (Some(active), Some(epoch)) => active.epoch == epoch,
                    (Some(_), None) => true,
                };
                if matches {
                    if let Some(active) = self.sessions.shift_remove(&session_id) {
                        active.session.clear_audio();
                        active.session.on_media_processing_terminated();
                        if let Some(epoch) = epoch {
                            self.groups.lock().forget(&session_id, epoch);
                        }
                        info!(session_id = %session_id, "Session cleared");
                    }
                } else if epoch.is_none() {
                    self.withdraw(&session_id);
                } else {
                    debug!(session_id = %session_id, ?epoch, "Ignoring clear for a stale insertion");
                }
                drop(release);
            }
            SchedulerEvent::Shutdown => {}
        }
    }

    fn admit(&mut self, session: Arc<dyn MediaSession>, epoch: u64) {
        let session_id = session.session_id().clone();
        session.set_processing_media(true);
        session.clear_rtp_timeout();
        let previous = self.sessions.insert(
            session_id.clone(),
            ActiveSession {
                session,
                epoch,
                failures: 0,
                clear_pending: false,
            },
        );
        if previous.is_some() {
            warn!(session_id = %session_id, "Session inserted twice, replaced");
        }
        debug!(session_id = %session_id, epoch, "Session inserted");
    }

    /// Drop an insertion that was detached again before it was admitted.
    fn withdraw(&mut self, session_id: &SessionId) {
        if self.waiting.shift_remove(session_id).is_some() {
            debug!(session_id = %session_id, "Waiting insertion withdrawn");
        }
    }

    fn admit_ready(&mut self) {
        if self.waiting.is_empty() {
            return;
        }
        let ready: Vec<SessionId> = self
            .waiting
            .iter()
            .filter(|(_, waiting)| waiting.after.is_complete())
            .map(|(session_id, _)| session_id.clone())
            .collect();
        for session_id in ready {
            if let Some(waiting) = self.waiting.shift_remove(&session_id) {
                self.admit(waiting.session, waiting.epoch);
            }
        }
    }

    fn record_tick(&self, elapsed: Duration) {
        let micros = elapsed.as_micros() as u64;
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        self.stats.last_tick_micros.store(micros, Ordering::Relaxed);
        self.stats.max_tick_micros.fetch_max(micros, Ordering::Relaxed);
        self.stats.active_sessions.store(self.sessions.len(), Ordering::Relaxed);
        if elapsed > self.period {
            warn!(tick_ms = elapsed.as_millis() as u64, "Media tick overran its period");
        }
    }

    fn terminate_all(&mut self) {
        self.waiting.clear();
        for (_, active) in self.sessions.drain(..) {
            active.session.on_media_processing_terminated();
        }
        self.stats.active_sessions.store(0, Ordering::Relaxed);
    }
}

/// Count consecutive failures; on reaching the threshold queue exactly one
/// clear for this insertion.
fn track_result(
    session_id: &SessionId,
    active: &mut ActiveSession,
    result: Result<()>,
    phase: &'static str,
    threshold: u32,
    sender: &mpsc::WeakUnboundedSender<SchedulerEvent>,
) {
    let error = match result {
        Ok(()) => {
            active.failures = 0;
            return;
        }
        Err(error) => error,
    };

    active.failures += 1;
    warn!(session_id = %session_id, phase, failures = active.failures, error = %error, "Media I/O failed");
    if active.failures < threshold {
        return;
    }

    active.clear_pending = true;
    let event = SchedulerEvent::ClearSession {
        session_id: session_id.clone(),
        epoch: Some(active.epoch),
        release: None,
    };
    if let Some(sender) = sender.upgrade() {
        let _ = sender.send(event);
    }
}
