//! URI ↔ URID registry
//!
//! Event types are identified by small integers interned from URIs. The map is
//! built once at startup (before the audio thread exists) and handed around by
//! reference; the audio path only ever compares the pre-mapped [`Urids`].

use std::collections::HashMap;

/// Interned URI identifier (0 is never assigned)
pub type Urid = u32;

pub const MIDI_EVENT_URI: &str = "http://lv2plug.in/ns/ext/midi#MidiEvent";
pub const TIME_POSITION_URI: &str = "http://lv2plug.in/ns/ext/time#Position";

/// Bidirectional URI table
#[derive(Debug, Default)]
pub struct UriMap {
    ids: HashMap<String, Urid>,
    uris: Vec<String>,
}

impl UriMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the id for `uri`, assigning the next free one if it is unknown
    pub fn map(&mut self, uri: &str) -> Urid {
        if let Some(&id) = self.ids.get(uri) {
            return id;
        }
        self.uris.push(uri.to_owned());
        let id = self.uris.len() as Urid;
        self.ids.insert(uri.to_owned(), id);
        log::trace!("[URID] {} -> {}", uri, id);
        id
    }

    /// Look up the id of an already mapped URI
    pub fn id(&self, uri: &str) -> Option<Urid> {
        self.ids.get(uri).copied()
    }

    /// Reverse lookup
    pub fn unmap(&self, id: Urid) -> Option<&str> {
        let index = (id as usize).checked_sub(1)?;
        self.uris.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }
}

/// Ids the host itself needs, mapped once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Urids {
    pub midi_event: Urid,
    pub time_position: Urid,
}

impl Urids {
    pub fn new(map: &mut UriMap) -> Self {
        Self {
            midi_event: map.map(MIDI_EVENT_URI),
            time_position: map.map(TIME_POSITION_URI),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_is_stable() {
        let mut map = UriMap::new();
        let a = map.map("urn:a");
        let b = map.map("urn:b");
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(map.map("urn:a"), a);
        assert_eq!(map.len(), 2);
        assert_eq!(map.unmap(b), Some("urn:b"));
        assert_eq!(map.unmap(0), None);
        assert_eq!(map.id("urn:c"), None);
    }

    #[test]
    fn test_host_urids_are_distinct() {
        let mut map = UriMap::new();
        let urids = Urids::new(&mut map);
        assert_ne!(urids.midi_event, urids.time_position);
        assert_eq!(map.id(MIDI_EVENT_URI), Some(urids.midi_event));
        assert_eq!(Urids::new(&mut map), urids);
    }
}
