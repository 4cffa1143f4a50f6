//! Transport state as reported by the audio driver, and change detection
//!
//! The driver only forwards a position record to the unit when something
//! unexpected happened: start/stop, a relocate, or a tempo change. A rolling
//! transport that advanced by exactly one period is not a change.

use super::events::{BarBeat, TransportPosition};

/// Bar/beat/tick information, in the driver's 1-based convention
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbt {
    /// Bar, starting at 1
    pub bar: i32,
    /// Beat within the bar, starting at 1
    pub beat: i32,
    pub tick: i32,
    pub ticks_per_beat: f64,
    pub beats_per_bar: f32,
    pub beat_type: f32,
    pub bpm: f64,
}

/// Snapshot of the driver transport for one cycle
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TransportState {
    pub rolling: bool,
    pub frame: u64,
    /// Present only when the timebase master provides valid BBT
    pub bbt: Option<Bbt>,
}

impl TransportState {
    pub fn stopped_at(frame: u64) -> Self {
        Self {
            rolling: false,
            frame,
            bbt: None,
        }
    }

    pub fn rolling_at(frame: u64) -> Self {
        Self {
            rolling: true,
            frame,
            bbt: None,
        }
    }

    /// Position record in the unit's 0-based convention
    pub fn to_position(&self) -> TransportPosition {
        TransportPosition {
            frame: self.frame,
            speed: if self.rolling { 1.0 } else { 0.0 },
            bar_beat: self.bbt.map(|bbt| BarBeat {
                bar: i64::from(bbt.bar) - 1,
                bar_beat: (f64::from(bbt.beat - 1)
                    + if bbt.ticks_per_beat > 0.0 {
                        f64::from(bbt.tick) / bbt.ticks_per_beat
                    } else {
                        0.0
                    }) as f32,
                beat_unit: bbt.beat_type.max(0.0) as u32,
                beats_per_bar: bbt.beats_per_bar,
                bpm: bbt.bpm as f32,
            }),
        }
    }
}

/// Remembers what the transport should look like in the next cycle
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportTracker {
    rolling: bool,
    expected_frame: u64,
    bpm: f64,
}

impl TransportTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare `now` with the expectation and update it for a cycle of `n_frames`
    ///
    /// Returns `true` when the unit should be told about the new position.
    pub fn update(&mut self, now: &TransportState, n_frames: u32) -> bool {
        let bpm_changed = now.bbt.is_some_and(|bbt| bbt.bpm != self.bpm);
        let changed = now.rolling != self.rolling || now.frame != self.expected_frame || bpm_changed;

        self.expected_frame = if now.rolling {
            now.frame + u64::from(n_frames)
        } else {
            now.frame
        };
        self.bpm = now.bbt.map(|bbt| bbt.bpm).unwrap_or(self.bpm);
        self.rolling = now.rolling;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbt(bpm: f64) -> Bbt {
        Bbt {
            bar: 2,
            beat: 3,
            tick: 960,
            ticks_per_beat: 1920.0,
            beats_per_bar: 4.0,
            beat_type: 4.0,
            bpm,
        }
    }

    #[test]
    fn test_stationary_then_rolling() {
        let mut tracker = TransportTracker::new();
        let n = 256;
        for _ in 0..3 {
            assert!(!tracker.update(&TransportState::stopped_at(0), n));
        }
        assert!(tracker.update(&TransportState::rolling_at(0), n));
        assert!(!tracker.update(&TransportState::rolling_at(256), n));
        assert!(!tracker.update(&TransportState::rolling_at(512), n));
    }

    #[test]
    fn test_relocate_and_stop_are_changes() {
        let mut tracker = TransportTracker::new();
        tracker.update(&TransportState::rolling_at(0), 128);
        assert!(tracker.update(&TransportState::rolling_at(10_000), 128));
        assert!(tracker.update(&TransportState::stopped_at(10_128), 128));
        assert!(!tracker.update(&TransportState::stopped_at(10_128), 128));
    }

    #[test]
    fn test_tempo_change_only_with_bbt() {
        let mut tracker = TransportTracker::new();
        let mut state = TransportState::stopped_at(0);
        tracker.update(&state, 64);

        state.bbt = Some(bbt(120.0));
        assert!(tracker.update(&state, 64));
        assert!(!tracker.update(&state, 64));
        state.bbt = Some(bbt(121.0));
        assert!(tracker.update(&state, 64));
        state.bbt = None;
        assert!(!tracker.update(&state, 64));
    }

    #[test]
    fn test_position_conversion() {
        let state = TransportState {
            rolling: true,
            frame: 1000,
            bbt: Some(bbt(140.0)),
        };
        let position = state.to_position();
        assert_eq!(position.speed, 1.0);
        let bb = position.bar_beat.unwrap();
        assert_eq!(bb.bar, 1);
        assert_eq!(bb.bar_beat, 2.5);
        assert_eq!(bb.beat_unit, 4);
        assert_eq!(bb.bpm, 140.0);
    }
}
