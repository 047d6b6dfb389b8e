//! Conference notifications and their delivery to sessions

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::types::{RoomId, SessionId};

/// What happened in a room
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConferenceEventKind {
    /// Sent to a session that just opened an empty room
    FirstParticipant,
    /// Sent to existing members when someone joins
    NewParticipant,
    /// Sent to remaining members when someone leaves
    ParticipantLeft,
    /// Application-defined payload fanned out to every member
    Broadcast(String),
}

/// Notification delivered to a member session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConferenceEvent {
    pub kind: ConferenceEventKind,
    pub room_id: RoomId,
    /// Session whose action triggered the event
    pub session_id: SessionId,
    /// Members in the room after the change
    pub participant_count: usize,
}

impl ConferenceEvent {
    pub fn new(kind: ConferenceEventKind, room_id: RoomId, session_id: SessionId, participant_count: usize) -> Self {
        Self {
            kind,
            room_id,
            session_id,
            participant_count,
        }
    }
}

/// Delivers conference events to sessions by id.
///
/// Delivery is best effort: the return value only says whether the target
/// was reachable at the time of posting.
pub trait SessionEventSink: Send + Sync {
    fn post_event(&self, session_id: &SessionId, event: ConferenceEvent) -> bool;
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl SessionEventSink for NullEventSink {
    fn post_event(&self, _session_id: &SessionId, _event: ConferenceEvent) -> bool {
        false
    }
}

/// Per-session unbounded event queues
#[derive(Debug, Default)]
pub struct SessionEventBus {
    senders: DashMap<SessionId, mpsc::UnboundedSender<ConferenceEvent>>,
}

impl SessionEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start delivering events for `session_id`. Registering again replaces
    /// the previous receiver.
    pub fn register(&self, session_id: SessionId) -> mpsc::UnboundedReceiver<ConferenceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.senders.insert(session_id.clone(), tx).is_some() {
            debug!(session_id = %session_id, "Replaced event receiver");
        }
        rx
    }

    pub fn unregister(&self, session_id: &SessionId) -> bool {
        self.senders.remove(session_id).is_some()
    }

    pub fn is_registered(&self, session_id: &SessionId) -> bool {
        self.senders.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl SessionEventSink for SessionEventBus {
    fn post_event(&self, session_id: &SessionId, event: ConferenceEvent) -> bool {
        let Some(sender) = self.senders.get(session_id) else {
            trace!(session_id = %session_id, "No receiver for conference event");
            return false;
        };
        if sender.send(event).is_ok() {
            return true;
        }
        drop(sender);
        // Receiver was dropped; stop holding its sender.
        self.senders.remove(session_id);
        debug!(session_id = %session_id, "Event receiver closed, unregistered");
        false
    }
}
