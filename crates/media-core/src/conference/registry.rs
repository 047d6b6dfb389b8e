//! Room registry
//!
//! Rooms are created on first join and destroyed on last leave. The registry
//! map is guarded by one lock and each room's membership by its own lock,
//! always taken in that order (registry, then room). A join locks its room
//! before letting go of the registry, and a leave that empties a room erases
//! it while still holding both, so a join can never land in a room that is
//! being torn down.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::channel::ConferenceChannel;
use super::events::{ConferenceEvent, ConferenceEventKind, SessionEventSink};
use crate::config::{ConferenceConfig, MixerConfig};
use crate::error::{MediaError, Result};
use crate::mixer::Mixer;
use crate::types::{ChannelId, RoomId, SessionId};

struct Room {
    mixer: Arc<Mixer>,
    members: Mutex<IndexMap<SessionId, ChannelId>>,
}

/// All live conference rooms
pub struct ConferenceRegistry {
    rooms: Mutex<HashMap<RoomId, Arc<Room>>>,
    events: Arc<dyn SessionEventSink>,
    mixer_config: MixerConfig,
    config: ConferenceConfig,
    closed: AtomicBool,
}

impl ConferenceRegistry {
    pub fn new(events: Arc<dyn SessionEventSink>, mixer_config: MixerConfig, config: ConferenceConfig) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            events,
            mixer_config,
            config,
            closed: AtomicBool::new(false),
        }
    }

    /// Join `session_id` to `room_id`, creating the room if needed.
    ///
    /// A session that is already a member gets a non-owning channel onto its
    /// existing slot. Otherwise a new slot is allocated and the other members
    /// are told about the newcomer; the very first member is instead told it
    /// is first.
    pub fn get_or_create_channel(
        self: &Arc<Self>,
        room_id: impl Into<RoomId>,
        session_id: impl Into<SessionId>,
        native_rate: u32,
    ) -> Result<ConferenceChannel> {
        let room_id = room_id.into();
        let session_id = session_id.into();
        if native_rate == 0 {
            return Err(MediaError::InvalidSampleRate { rate: native_rate });
        }

        let mut rooms = self.rooms.lock();
        let room = rooms
            .entry(room_id.clone())
            .or_insert_with(|| {
                info!(room_id = %room_id, "Conference room created");
                Arc::new(Room {
                    mixer: Arc::new(Mixer::new(room_id.as_str(), self.mixer_config.clone())),
                    members: Mutex::new(IndexMap::new()),
                })
            })
            .clone();
        let mut members = room.members.lock();
        drop(rooms);

        if let Some(&channel_id) = members.get(&session_id) {
            debug!(room_id = %room_id, session_id = %session_id, channel_id, "Session already in room");
            return Ok(ConferenceChannel::attached(
                Arc::downgrade(self),
                room_id,
                session_id,
                channel_id,
                room.mixer.clone(),
                false,
            ));
        }

        if let Some(max) = self.config.max_participants {
            if members.len() >= max {
                return Err(MediaError::RoomFull { room_id, max });
            }
        }

        let channel_id = room.mixer.add_channel(native_rate)?;
        members.insert(session_id.clone(), channel_id);
        let count = members.len();
        let recipients: Vec<SessionId> = if count == 1 {
            vec![session_id.clone()]
        } else {
            members.keys().filter(|s| **s != session_id).cloned().collect()
        };
        drop(members);

        info!(
            room_id = %room_id,
            session_id = %session_id,
            channel_id,
            native_rate,
            participants = count,
            "Participant joined"
        );

        let kind = if count == 1 {
            ConferenceEventKind::FirstParticipant
        } else {
            ConferenceEventKind::NewParticipant
        };
        let event = ConferenceEvent::new(kind, room_id.clone(), session_id.clone(), count);
        self.deliver(&recipients, &event);

        Ok(ConferenceChannel::attached(
            Arc::downgrade(self),
            room_id,
            session_id,
            channel_id,
            room.mixer.clone(),
            true,
        ))
    }

    /// Give a channel back. The last one out destroys the room; otherwise
    /// the remaining members are told someone left. Releasing something
    /// already gone is a logged no-op.
    pub fn release_channel(&self, room_id: &RoomId, channel_id: ChannelId) {
        let mut rooms = self.rooms.lock();
        let Some(room) = rooms.get(room_id).cloned() else {
            if self.closed.load(Ordering::Acquire) {
                debug!(room_id = %room_id, channel_id, "Release after registry shutdown");
            } else {
                warn!(room_id = %room_id, channel_id, "Release for unknown room");
            }
            return;
        };

        let mut members = room.members.lock();
        let Some(session_id) = members
            .iter()
            .find(|(_, c)| **c == channel_id)
            .map(|(s, _)| s.clone())
        else {
            warn!(room_id = %room_id, channel_id, "Release for channel not in room");
            return;
        };
        members.shift_remove(&session_id);
        room.mixer.remove_channel(channel_id);

        if members.is_empty() {
            rooms.remove(room_id);
            info!(room_id = %room_id, session_id = %session_id, "Conference room destroyed");
            return;
        }

        let count = members.len();
        let recipients: Vec<SessionId> = members.keys().cloned().collect();
        drop(members);
        drop(rooms);

        info!(room_id = %room_id, session_id = %session_id, participants = count, "Participant left");
        let event = ConferenceEvent::new(
            ConferenceEventKind::ParticipantLeft,
            room_id.clone(),
            session_id,
            count,
        );
        self.deliver(&recipients, &event);
    }

    /// Post `event` to every member of `room_id` except `except`.
    ///
    /// Returns how many members were reachable.
    pub fn post_event(&self, room_id: &RoomId, event: &ConferenceEvent, except: Option<&SessionId>) -> usize {
        let Some(recipients) = self.members(room_id) else {
            debug!(room_id = %room_id, "Event for unknown room dropped");
            return 0;
        };
        let recipients: Vec<SessionId> = recipients
            .into_iter()
            .filter(|s| Some(s) != except)
            .collect();
        self.deliver(&recipients, event)
    }

    /// Post `event` to every member of `room_id`.
    pub fn broadcast(&self, room_id: &RoomId, event: &ConferenceEvent) -> usize {
        self.post_event(room_id, event, None)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    pub fn room_exists(&self, room_id: &RoomId) -> bool {
        self.rooms.lock().contains_key(room_id)
    }

    /// Members of `room_id` in join order.
    pub fn members(&self, room_id: &RoomId) -> Option<Vec<SessionId>> {
        let room = self.rooms.lock().get(room_id).cloned()?;
        let members = room.members.lock();
        Some(members.keys().cloned().collect())
    }

    pub fn participant_count(&self, room_id: &RoomId) -> usize {
        self.members(room_id).map_or(0, |m| m.len())
    }

    /// Mixer of a live room.
    pub fn mixer(&self, room_id: &RoomId) -> Option<Arc<Mixer>> {
        self.rooms.lock().get(room_id).map(|room| room.mixer.clone())
    }

    /// Drop every room. Channels still held elsewhere keep their mixer alive
    /// until they are dropped; their releases become no-ops.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let rooms = std::mem::take(&mut *self.rooms.lock());
        info!(rooms = rooms.len(), "Conference registry shut down");
    }

    fn deliver(&self, recipients: &[SessionId], event: &ConferenceEvent) -> usize {
        recipients
            .iter()
            .filter(|session_id| self.events.post_event(session_id, event.clone()))
            .count()
    }
}

impl std::fmt::Debug for ConferenceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConferenceRegistry")
            .field("rooms", &self.room_count())
            .finish_non_exhaustive()
    }
}
