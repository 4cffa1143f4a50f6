//! Built-in processing units
//!
//! The host runs exactly one unit, picked from this catalog by index or by a
//! case-insensitive substring of its URI or name.

pub mod monitor;
pub mod shaper;

use crate::plugin::{HostError, HostResult, ProcessingUnit};
use crate::urid::Urids;

/// Catalog entry
pub struct UnitInfo {
    pub uri: &'static str,
    pub name: &'static str,
    create: fn(&Urids) -> Box<dyn ProcessingUnit>,
}

impl UnitInfo {
    /// Create a fresh, inactive instance
    pub fn instantiate(&self, urids: &Urids) -> Box<dyn ProcessingUnit> {
        (self.create)(urids)
    }
}

fn new_shaper(urids: &Urids) -> Box<dyn ProcessingUnit> {
    Box::new(shaper::Shaper::new(urids))
}

fn new_monitor(urids: &Urids) -> Box<dyn ProcessingUnit> {
    Box::new(monitor::Monitor::new(urids))
}

static CATALOG: &[UnitInfo] = &[
    UnitInfo {
        uri: shaper::URI,
        name: "Shaper",
        create: new_shaper,
    },
    UnitInfo {
        uri: monitor::URI,
        name: "Monitor",
        create: new_monitor,
    },
];

/// All built-in units, in listing order
pub fn catalog() -> &'static [UnitInfo] {
    CATALOG
}

/// Resolve a unit by index or by URI/name substring; `None` picks the first
pub fn find(query: Option<&str>) -> HostResult<&'static UnitInfo> {
    let Some(query) = query else {
        return CATALOG.first().ok_or_else(|| HostError::UnitNotFound {
            query: String::new(),
        });
    };

    if let Ok(index) = query.parse::<usize>() {
        return CATALOG.get(index).ok_or(HostError::UnitIndexOutOfBounds {
            index,
            count: CATALOG.len(),
        });
    }

    let needle = query.to_lowercase();
    CATALOG
        .iter()
        .find(|info| {
            info.uri.to_lowercase().contains(&needle) || info.name.to_lowercase().contains(&needle)
        })
        .ok_or_else(|| HostError::UnitNotFound {
            query: query.to_string(),
        })
}
