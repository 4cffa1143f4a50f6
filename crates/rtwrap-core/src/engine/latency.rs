//! Capture-latency alignment across audio inputs
//!
//! The audio driver reports a capture latency for every input. The slowest one
//! (the worst case) becomes the common target: every other input is delayed by
//! the difference so all channels reach the unit sample-aligned. The graph also
//! tells the driver how late our own outputs are, which is the aligned capture
//! latency plus whatever the unit itself reports.
//!
//! # Threads
//!
//! ```text
//!   control thread                          audio thread
//!   ──────────────                          ────────────
//!   LatencyGraph::on_graph_changed ──store──► LatencyShared.wanted[i] ──load──► DelayLine
//!   LatencyGraph::sync_unit_latency ◄─swap── LatencyShared.pending ◄──report── latency port
//! ```
//!
//! Only relaxed atomics cross the boundary; announcements to the driver are
//! made from the control thread (or the driver's own notification thread),
//! never from inside the audio cycle.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::audio::LatencyPorts;
use crate::types::{Frames, LatencyRange, MAX_DELAY};

/// Which direction the driver wants latencies for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyMode {
    /// How long ago the data on a port was captured
    Capture,
    /// How long until the data on a port reaches a speaker
    Playback,
}

/// Latency values shared between the control and audio threads
pub struct LatencyShared {
    wanted: Box<[AtomicU32]>,
    unit_latency: AtomicU32,
    recompute_pending: AtomicBool,
}

impl LatencyShared {
    pub fn new(n_inputs: usize) -> Self {
        Self {
            wanted: (0..n_inputs).map(|_| AtomicU32::new(0)).collect(),
            unit_latency: AtomicU32::new(0),
            recompute_pending: AtomicBool::new(false),
        }
    }

    pub fn n_inputs(&self) -> usize {
        self.wanted.len()
    }

    /// Delay the audio thread should apply to `input`
    #[inline]
    pub fn wanted_delay(&self, input: usize) -> Frames {
        self.wanted
            .get(input)
            .map(|w| w.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn set_wanted_delay(&self, input: usize, frames: Frames) {
        if let Some(w) = self.wanted.get(input) {
            w.store(frames, Ordering::Relaxed);
        }
    }

    /// Latency the unit reported most recently
    pub fn unit_latency(&self) -> Frames {
        self.unit_latency.load(Ordering::Relaxed)
    }

    /// Audio thread: record the unit's latency port value
    ///
    /// Raises the pending flag only when the value actually changed.
    #[inline]
    pub fn report_unit_latency(&self, frames: Frames) {
        if self.unit_latency.swap(frames, Ordering::Relaxed) != frames {
            self.recompute_pending.store(true, Ordering::Release);
        }
    }

    /// Consume the pending flag
    pub fn take_recompute_pending(&self) -> bool {
        self.recompute_pending.swap(false, Ordering::AcqRel)
    }
}

/// Control-side latency bookkeeping
pub struct LatencyGraph {
    shared: Arc<LatencyShared>,
    n_outputs: usize,
    capture: Vec<LatencyRange>,
    worst_capture: Frames,
    unit_latency: Frames,
    /// Largest delay the driver's delay lines can apply
    max_delay: Frames,
    /// Inputs whose alignment delay is currently clamped (warned once each)
    clamped: Vec<bool>,
}

impl LatencyGraph {
    pub fn new(n_inputs: usize, n_outputs: usize) -> Self {
        Self {
            shared: Arc::new(LatencyShared::new(n_inputs)),
            n_outputs,
            capture: vec![LatencyRange::default(); n_inputs],
            worst_capture: 0,
            unit_latency: 0,
            max_delay: (MAX_DELAY - 1) as Frames,
            clamped: vec![false; n_inputs],
        }
    }

    /// Limit alignment delays to what a delay line of `frames` slots can hold
    pub fn with_max_delay(mut self, frames: usize) -> Self {
        self.max_delay = frames.saturating_sub(1) as Frames;
        self
    }

    /// Handle for the audio thread
    pub fn shared(&self) -> Arc<LatencyShared> {
        Arc::clone(&self.shared)
    }

    pub fn worst_capture(&self) -> Frames {
        self.worst_capture
    }

    pub fn unit_latency(&self) -> Frames {
        self.unit_latency
    }

    /// Compensation delay added to `input` (0 for unknown inputs)
    ///
    /// Never more than the delay lines can apply.
    pub fn port_delay(&self, input: usize) -> Frames {
        self.capture
            .get(input)
            .map(|r| (self.worst_capture - r.max).min(self.max_delay))
            .unwrap_or(0)
    }

    /// Re-read every input's capture latency and republish the wanted delays
    pub fn on_graph_changed(&mut self, ports: &dyn LatencyPorts) {
        for (input, range) in self.capture.iter_mut().enumerate() {
            *range = ports.capture_latency(input);
        }
        let old_worst = self.worst_capture;
        self.worst_capture = self.capture.iter().map(|r| r.max).max().unwrap_or(0);

        for input in 0..self.capture.len() {
            let wanted = self.worst_capture - self.capture[input].max;
            let clamped = wanted > self.max_delay;
            if clamped && !self.clamped[input] {
                log::warn!(
                    "[LATENCY] Input {} needs {} frames of alignment, clamping to {}",
                    input,
                    wanted,
                    self.max_delay
                );
            }
            self.clamped[input] = clamped;
            self.shared.set_wanted_delay(input, self.port_delay(input));
        }

        if old_worst != self.worst_capture {
            log::info!(
                "[LATENCY] Worst capture latency changed: {} -> {} frames",
                old_worst,
                self.worst_capture
            );
        }
        log::debug!(
            "[LATENCY] Input alignment delays: {:?}",
            (0..self.capture.len())
                .map(|i| self.port_delay(i))
                .collect::<Vec<_>>()
        );
    }

    /// Announce our ports' latencies for `mode`
    ///
    /// Capture: output `i` is as late as input `i` after alignment plus the
    /// unit latency. Playback: input `i` is as early as output `i` plus the
    /// alignment delay plus the unit latency.
    pub fn on_recompute_output_latency(&mut self, mode: LatencyMode, ports: &mut dyn LatencyPorts) {
        self.on_graph_changed(ports);
        let n_inputs = self.capture.len();

        match mode {
            LatencyMode::Capture => {
                for output in 0..self.n_outputs {
                    let range = if output < n_inputs {
                        ports
                            .capture_latency(output)
                            .offset(self.port_delay(output))
                    } else {
                        LatencyRange::default()
                    };
                    ports.announce_capture(output, range.offset(self.unit_latency));
                }
            }
            LatencyMode::Playback => {
                for input in 0..n_inputs {
                    let range = if input < self.n_outputs {
                        ports.playback_latency(input)
                    } else {
                        LatencyRange::default()
                    };
                    ports.announce_playback(
                        input,
                        range.offset(self.port_delay(input) + self.unit_latency),
                    );
                }
            }
        }
    }

    /// Pick up a latency change reported by the audio thread
    ///
    /// Returns `true` when the caller should ask the driver to recompute
    /// (the driver then calls [`Self::on_recompute_output_latency`] for both modes).
    pub fn sync_unit_latency(&mut self) -> bool {
        if !self.shared.take_recompute_pending() {
            return false;
        }
        let reported = self.shared.unit_latency();
        if reported != self.unit_latency {
            log::info!(
                "[LATENCY] Unit latency changed: {} -> {} frames",
                self.unit_latency,
                reported
            );
            self.unit_latency = reported;
        }
        true
    }

    /// Re-announce both directions (used after [`Self::sync_unit_latency`])
    pub fn recompute_all(&mut self, ports: &mut dyn LatencyPorts) {
        self.on_recompute_output_latency(LatencyMode::Capture, ports);
        self.on_recompute_output_latency(LatencyMode::Playback, ports);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePorts {
        capture: Vec<LatencyRange>,
        playback: Vec<LatencyRange>,
        announced_capture: Vec<Option<LatencyRange>>,
        announced_playback: Vec<Option<LatencyRange>>,
    }

    impl FakePorts {
        fn new(capture: &[Frames], playback: &[Frames]) -> Self {
            Self {
                capture: capture.iter().map(|&c| LatencyRange::exact(c)).collect(),
                playback: playback.iter().map(|&p| LatencyRange::exact(p)).collect(),
                announced_capture: vec![None; playback.len()],
                announced_playback: vec![None; capture.len()],
            }
        }
    }

    impl LatencyPorts for FakePorts {
        fn capture_latency(&self, input: usize) -> LatencyRange {
            self.capture[input]
        }

        fn playback_latency(&self, output: usize) -> LatencyRange {
            self.playback[output]
        }

        fn announce_capture(&mut self, output: usize, range: LatencyRange) {
            self.announced_capture[output] = Some(range);
        }

        fn announce_playback(&mut self, input: usize, range: LatencyRange) {
            self.announced_playback[input] = Some(range);
        }
    }

    #[test]
    fn test_wanted_delays_align_to_worst_case() {
        let ports = FakePorts::new(&[20, 50, 10], &[0, 0, 0]);
        let mut graph = LatencyGraph::new(3, 3);
        let shared = graph.shared();
        graph.on_graph_changed(&ports);

        assert_eq!(graph.worst_capture(), 50);
        assert_eq!(shared.wanted_delay(0), 30);
        assert_eq!(shared.wanted_delay(1), 0);
        assert_eq!(shared.wanted_delay(2), 40);
        assert_eq!(shared.wanted_delay(7), 0, "unknown input has no delay");
    }

    #[test]
    fn test_alignment_is_clamped_to_delay_line() {
        let ports = FakePorts::new(&[0, 500_000], &[0, 0]);
        let mut graph = LatencyGraph::new(2, 2).with_max_delay(1000);
        let shared = graph.shared();
        for _ in 0..3 {
            graph.on_graph_changed(&ports);
            assert_eq!(shared.wanted_delay(0), 999);
            assert_eq!(shared.wanted_delay(1), 0);
        }
        assert_eq!(graph.port_delay(0), 999);
        assert_eq!(graph.worst_capture(), 500_000);
    }

    #[test]
    fn test_capture_announcement() {
        let mut ports = FakePorts::new(&[20, 50], &[5, 5, 5]);
        let mut graph = LatencyGraph::new(2, 3);
        graph.shared().report_unit_latency(64);
        assert!(graph.sync_unit_latency());

        graph.on_recompute_output_latency(LatencyMode::Capture, &mut ports);
        // capture(i) + port_delay(i) == worst for aligned inputs
        assert_eq!(ports.announced_capture[0], Some(LatencyRange::exact(50 + 64)));
        assert_eq!(ports.announced_capture[1], Some(LatencyRange::exact(50 + 64)));
        // No matching input: unit latency only
        assert_eq!(ports.announced_capture[2], Some(LatencyRange::exact(64)));
    }

    #[test]
    fn test_playback_announcement() {
        let mut ports = FakePorts::new(&[20, 50, 10], &[100, 200]);
        let mut graph = LatencyGraph::new(3, 2);
        graph.shared().report_unit_latency(8);
        graph.sync_unit_latency();

        graph.on_recompute_output_latency(LatencyMode::Playback, &mut ports);
        assert_eq!(ports.announced_playback[0], Some(LatencyRange::exact(100 + 30 + 8)));
        assert_eq!(ports.announced_playback[1], Some(LatencyRange::exact(200 + 8)));
        // No matching output: alignment delay plus unit latency
        assert_eq!(ports.announced_playback[2], Some(LatencyRange::exact(40 + 8)));
    }

    #[test]
    fn test_unit_latency_change_raises_pending_once() {
        let graph_shared = LatencyShared::new(1);
        graph_shared.report_unit_latency(0);
        assert!(!graph_shared.take_recompute_pending(), "unchanged value");
        graph_shared.report_unit_latency(32);
        graph_shared.report_unit_latency(32);
        assert!(graph_shared.take_recompute_pending());
        assert!(!graph_shared.take_recompute_pending());
    }

    #[test]
    fn test_sync_without_report_is_noop() {
        let mut graph = LatencyGraph::new(1, 1);
        assert!(!graph.sync_unit_latency());
        graph.shared().report_unit_latency(0);
        assert!(!graph.sync_unit_latency(), "unchanged latency");
        graph.shared().report_unit_latency(16);
        assert!(graph.sync_unit_latency());
        assert_eq!(graph.unit_latency(), 16);
    }
}
