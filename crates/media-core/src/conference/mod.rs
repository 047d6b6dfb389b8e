//! Conference rooms
//!
//! [`ConferenceRegistry`] owns every live room and its mixer;
//! [`ConferenceChannel`] is a participant's handle onto one mixer slot; and
//! join/leave notifications reach sessions through a [`SessionEventSink`].

mod channel;
pub mod events;
mod registry;

pub use channel::ConferenceChannel;
pub use events::{ConferenceEvent, ConferenceEventKind, NullEventSink, SessionEventBus, SessionEventSink};
pub use registry::ConferenceRegistry;
