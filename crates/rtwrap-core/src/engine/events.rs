//! Time-stamped event sequences
//!
//! An [`EventSequence`] is a fixed-capacity byte arena that the driver fills
//! before every cycle (transport, UI, control surface and hardware MIDI) and
//! that the unit fills with its own output events. The same byte layout is
//! shipped to the UI thread as one ring frame, so the UI decodes it with
//! [`EventIter::new`] without any copying into intermediate types.
//!
//! # Layout
//!
//! ```text
//!   ┌──────────┬──────────┬──────────┬──────────┬─────────────────┬─────┐
//!   │ offset   │ type     │ size     │ reserved │ body (size)     │ pad │  ... next event
//!   │ u32 LE   │ Urid LE  │ u32 LE   │ 0        │                 │ →8  │
//!   └──────────┴──────────┴──────────┴──────────┴─────────────────┴─────┘
//! ```
//!
//! Offsets are frames from the start of the cycle and never decrease.

use crate::urid::{Urid, Urids};

/// Bytes in front of every event body
pub const EVENT_HEADER_LEN: usize = 16;

/// Encoded size of a [`TransportPosition`] body
pub const POSITION_BODY_LEN: usize = 40;

#[inline]
const fn padded(len: usize) -> usize {
    (len + 7) & !7
}

/// Bytes one event with a `body_len` byte body occupies
#[inline]
pub const fn event_len(body_len: usize) -> usize {
    padded(EVENT_HEADER_LEN + body_len)
}

/// Append-only event arena, cleared every cycle
pub struct EventSequence {
    data: Vec<u8>,
    len: usize,
    last_offset: u32,
}

impl EventSequence {
    /// Allocate a sequence holding up to `capacity` bytes of events
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
            last_offset: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes used by the events written so far
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.len = 0;
        self.last_offset = 0;
    }

    /// Append an event
    ///
    /// Returns `false` (leaving the sequence unchanged) when the event doesn't
    /// fit. An offset earlier than the previous event is moved up to it so the
    /// sequence stays ordered.
    pub fn append(&mut self, offset: u32, kind: Urid, body: &[u8]) -> bool {
        let total = event_len(body.len());
        if self.len + total > self.data.len() {
            return false;
        }
        let offset = offset.max(self.last_offset);
        let Ok(size) = u32::try_from(body.len()) else {
            return false;
        };

        let event = &mut self.data[self.len..self.len + total];
        event[0..4].copy_from_slice(&offset.to_le_bytes());
        event[4..8].copy_from_slice(&kind.to_le_bytes());
        event[8..12].copy_from_slice(&size.to_le_bytes());
        event[12..16].fill(0);
        event[EVENT_HEADER_LEN..EVENT_HEADER_LEN + body.len()].copy_from_slice(body);
        event[EVENT_HEADER_LEN + body.len()..].fill(0);

        self.len += total;
        self.last_offset = offset;
        true
    }

    /// Append a transport position record
    pub fn append_position(&mut self, offset: u32, urids: &Urids, position: &TransportPosition) -> bool {
        self.append(offset, urids.time_position, &position.encode())
    }

    /// Serialized events (what gets shipped to the UI)
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn iter(&self) -> EventIter<'_> {
        EventIter::new(self.as_bytes())
    }
}

/// One decoded event, borrowing its body from the sequence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event<'a> {
    pub offset: u32,
    pub kind: Urid,
    pub body: &'a [u8],
}

/// Typed view of an [`Event`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventKind<'a> {
    Midi(&'a [u8]),
    Position(TransportPosition),
    Other { kind: Urid, body: &'a [u8] },
}

impl<'a> Event<'a> {
    pub fn decode(&self, urids: &Urids) -> EventKind<'a> {
        if self.kind == urids.midi_event {
            return EventKind::Midi(self.body);
        }
        if self.kind == urids.time_position {
            if let Some(position) = TransportPosition::decode(self.body) {
                return EventKind::Position(position);
            }
        }
        EventKind::Other {
            kind: self.kind,
            body: self.body,
        }
    }
}

/// Iterator over serialized events
///
/// Stops at the first truncated header or body.
pub struct EventIter<'a> {
    bytes: &'a [u8],
}

impl<'a> EventIter<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

impl<'a> Iterator for EventIter<'a> {
    type Item = Event<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.bytes.len() < EVENT_HEADER_LEN {
            return None;
        }
        let offset = read_u32(self.bytes, 0);
        let kind = read_u32(self.bytes, 4);
        let size = read_u32(self.bytes, 8) as usize;
        if self.bytes.len() < EVENT_HEADER_LEN + size {
            self.bytes = &[];
            return None;
        }
        let body = &self.bytes[EVENT_HEADER_LEN..EVENT_HEADER_LEN + size];
        let advance = event_len(size).min(self.bytes.len());
        self.bytes = &self.bytes[advance..];
        Some(Event { offset, kind, body })
    }
}

/// Bar/beat/tempo part of a transport position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarBeat {
    /// Bar number, starting at 0
    pub bar: i64,
    /// Beat within the bar including the fractional tick part, starting at 0.0
    pub bar_beat: f32,
    pub beat_unit: u32,
    pub beats_per_bar: f32,
    pub bpm: f32,
}

/// Transport position record delivered to units that ask for time info
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportPosition {
    pub frame: u64,
    /// 1.0 when rolling, 0.0 when stopped
    pub speed: f32,
    pub bar_beat: Option<BarBeat>,
}

const FLAG_BAR_BEAT: u32 = 1;

impl TransportPosition {
    pub fn encode(&self) -> [u8; POSITION_BODY_LEN] {
        let mut out = [0u8; POSITION_BODY_LEN];
        out[0..8].copy_from_slice(&self.frame.to_le_bytes());
        out[8..12].copy_from_slice(&self.speed.to_le_bytes());
        if let Some(bb) = &self.bar_beat {
            out[12..16].copy_from_slice(&FLAG_BAR_BEAT.to_le_bytes());
            out[16..24].copy_from_slice(&bb.bar.to_le_bytes());
            out[24..28].copy_from_slice(&bb.bar_beat.to_le_bytes());
            out[28..32].copy_from_slice(&bb.beat_unit.to_le_bytes());
            out[32..36].copy_from_slice(&bb.beats_per_bar.to_le_bytes());
            out[36..40].copy_from_slice(&bb.bpm.to_le_bytes());
        }
        out
    }

    pub fn decode(body: &[u8]) -> Option<Self> {
        if body.len() < POSITION_BODY_LEN {
            return None;
        }
        let f32_at = |at: usize| f32::from_bits(read_u32(body, at));
        let mut frame = [0u8; 8];
        frame.copy_from_slice(&body[0..8]);
        let mut bar = [0u8; 8];
        bar.copy_from_slice(&body[16..24]);

        let bar_beat = (read_u32(body, 12) & FLAG_BAR_BEAT != 0).then(|| BarBeat {
            bar: i64::from_le_bytes(bar),
            bar_beat: f32_at(24),
            beat_unit: read_u32(body, 28),
            beats_per_bar: f32_at(32),
            bpm: f32_at(36),
        });
        Some(Self {
            frame: u64::from_le_bytes(frame),
            speed: f32_at(8),
            bar_beat,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urid::UriMap;

    fn urids() -> Urids {
        Urids::new(&mut UriMap::new())
    }

    #[test]
    fn test_events_are_aligned_and_ordered() {
        let urids = urids();
        let mut seq = EventSequence::with_capacity(256);
        assert!(seq.append(0, urids.midi_event, &[0x90, 60, 100]));
        assert!(seq.append(10, urids.midi_event, &[0x80, 60, 0]));
        assert_eq!(seq.len() % 8, 0);
        assert_eq!(seq.len(), 2 * event_len(3));

        let events: Vec<_> = seq.iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].offset, 0);
        assert_eq!(events[1].offset, 10);
        assert_eq!(events[1].decode(&urids), EventKind::Midi(&[0x80, 60, 0]));
    }

    #[test]
    fn test_earlier_offset_is_clamped() {
        let urids = urids();
        let mut seq = EventSequence::with_capacity(256);
        seq.append(20, urids.midi_event, &[0xB0, 1, 2]);
        seq.append(5, urids.midi_event, &[0xB0, 1, 3]);
        let offsets: Vec<_> = seq.iter().map(|e| e.offset).collect();
        assert_eq!(offsets, vec![20, 20]);
    }

    #[test]
    fn test_overflow_is_dropped() {
        let urids = urids();
        let mut seq = EventSequence::with_capacity(event_len(3) + 4);
        assert!(seq.append(0, urids.midi_event, &[1, 2, 3]));
        let used = seq.len();
        assert!(!seq.append(1, urids.midi_event, &[4, 5, 6]));
        assert_eq!(seq.len(), used);
        assert_eq!(seq.iter().count(), 1);

        seq.clear();
        assert!(seq.is_empty());
        assert!(seq.append(0, urids.midi_event, &[4, 5, 6]));
    }

    #[test]
    fn test_position_body() {
        let urids = urids();
        let position = TransportPosition {
            frame: 48_000,
            speed: 1.0,
            bar_beat: Some(BarBeat {
                bar: 3,
                bar_beat: 1.5,
                beat_unit: 4,
                beats_per_bar: 4.0,
                bpm: 128.0,
            }),
        };
        let mut seq = EventSequence::with_capacity(128);
        assert!(seq.append_position(0, &urids, &position));
        let event = seq.iter().next().unwrap();
        assert_eq!(event.body.len(), POSITION_BODY_LEN);
        assert_eq!(event.decode(&urids), EventKind::Position(position));

        let stopped = TransportPosition {
            frame: 7,
            speed: 0.0,
            bar_beat: None,
        };
        assert_eq!(TransportPosition::decode(&stopped.encode()), Some(stopped));
        assert_eq!(TransportPosition::decode(&[0u8; 8]), None);
    }

    #[test]
    fn test_truncated_bytes_stop_iteration() {
        let urids = urids();
        let mut seq = EventSequence::with_capacity(128);
        seq.append(0, urids.midi_event, &[1, 2, 3]);
        seq.append(0, urids.midi_event, &[4, 5, 6]);
        let bytes = seq.as_bytes();
        let truncated = &bytes[..bytes.len() - 6];
        assert_eq!(EventIter::new(truncated).count(), 1);
    }
}
