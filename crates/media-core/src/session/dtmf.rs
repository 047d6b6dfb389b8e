//! DTMF events queued for a session's media worker

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// DTMF tone definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DtmfTone {
    Digit0,
    Digit1,
    Digit2,
    Digit3,
    Digit4,
    Digit5,
    Digit6,
    Digit7,
    Digit8,
    Digit9,
    Star,
    Pound,
    A,
    B,
    C,
    D,
}

impl DtmfTone {
    pub fn to_char(self) -> char {
        match self {
            Self::Digit0 => '0',
            Self::Digit1 => '1',
            Self::Digit2 => '2',
            Self::Digit3 => '3',
            Self::Digit4 => '4',
            Self::Digit5 => '5',
            Self::Digit6 => '6',
            Self::Digit7 => '7',
            Self::Digit8 => '8',
            Self::Digit9 => '9',
            Self::Star => '*',
            Self::Pound => '#',
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Self::Digit0),
            '1' => Some(Self::Digit1),
            '2' => Some(Self::Digit2),
            '3' => Some(Self::Digit3),
            '4' => Some(Self::Digit4),
            '5' => Some(Self::Digit5),
            '6' => Some(Self::Digit6),
            '7' => Some(Self::Digit7),
            '8' => Some(Self::Digit8),
            '9' => Some(Self::Digit9),
            '*' => Some(Self::Star),
            '#' => Some(Self::Pound),
            'A' | 'a' => Some(Self::A),
            'B' | 'b' => Some(Self::B),
            'C' | 'c' => Some(Self::C),
            'D' | 'd' => Some(Self::D),
            _ => None,
        }
    }

    /// RFC 4733 event code
    pub fn event_code(self) -> u8 {
        match self {
            Self::Digit0 => 0,
            Self::Digit1 => 1,
            Self::Digit2 => 2,
            Self::Digit3 => 3,
            Self::Digit4 => 4,
            Self::Digit5 => 5,
            Self::Digit6 => 6,
            Self::Digit7 => 7,
            Self::Digit8 => 8,
            Self::Digit9 => 9,
            Self::Star => 10,
            Self::Pound => 11,
            Self::A => 12,
            Self::B => 13,
            Self::C => 14,
            Self::D => 15,
        }
    }
}

impl fmt::Display for DtmfTone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_char())
    }
}

/// A detected or injected key press
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtmfEvent {
    pub tone: DtmfTone,
    pub duration_ms: u32,
}

impl DtmfEvent {
    pub fn new(tone: DtmfTone, duration_ms: u32) -> Self {
        Self { tone, duration_ms }
    }
}

/// Pending DTMF events for one session.
///
/// Any thread may post; the owning worker drains once per tick.
#[derive(Debug, Default)]
pub struct DtmfQueue {
    events: Mutex<VecDeque<DtmfEvent>>,
}

impl DtmfQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, event: DtmfEvent) {
        self.events.lock().push_back(event);
    }

    /// Queue every recognised key of `digits`; returns how many were queued.
    pub fn post_digits(&self, digits: &str, duration_ms: u32) -> usize {
        let mut events = self.events.lock();
        let before = events.len();
        events.extend(
            digits
                .chars()
                .filter_map(DtmfTone::from_char)
                .map(|tone| DtmfEvent::new(tone, duration_ms)),
        );
        events.len() - before
    }

    /// Take everything queued so far.
    pub fn drain(&self) -> Vec<DtmfEvent> {
        let mut events = self.events.lock();
        events.drain(..).collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}
