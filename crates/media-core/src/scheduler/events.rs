//! Control events posted to media workers

use std::fmt;
use std::sync::Arc;

use super::handoff::{Handoff, Release};
use crate::session::MediaSession;
use crate::types::SessionId;

/// Structural change for a worker to apply between ticks
pub(crate) enum SchedulerEvent {
    /// Start processing a session once `after` (the previous detach, possibly
    /// on another worker) has completed
    InsertSession {
        session: Arc<dyn MediaSession>,
        epoch: u64,
        after: Option<Arc<Handoff>>,
    },
    /// Stop processing and tear the session's media down
    RemoveSession { session_id: SessionId, release: Release },
    /// Stop processing, leaving the session's audio objects alone
    SoftRemoveSession { session_id: SessionId, release: Release },
    /// Stop processing and force-clear audio state.
    ///
    /// `epoch` is set when the worker raised this itself after I/O failures;
    /// it is then applied only to the insertion that failed.
    ClearSession {
        session_id: SessionId,
        epoch: Option<u64>,
        release: Option<Release>,
    },
    Shutdown,
}

impl SchedulerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::InsertSession { .. } => "insert",
            Self::RemoveSession { .. } => "remove",
            Self::SoftRemoveSession { .. } => "soft_remove",
            Self::ClearSession { .. } => "clear",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Debug for SchedulerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsertSession { session, epoch, after } => f
                .debug_struct("InsertSession")
                .field("session_id", session.session_id())
                .field("epoch", epoch)
                .field("waiting", &after.is_some())
                .finish(),
            Self::RemoveSession { session_id, .. } => f.debug_tuple("RemoveSession").field(session_id).finish(),
            Self::SoftRemoveSession { session_id, .. } => {
                f.debug_tuple("SoftRemoveSession").field(session_id).finish()
            }
            Self::ClearSession { session_id, epoch, .. } => f
                .debug_struct("ClearSession")
                .field("session_id", session_id)
                .field("epoch", epoch)
                .finish(),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}
