//! Audio backend seams and backend selection
//!
//! A backend implements [`CycleIo`] for the duration of one hardware callback
//! and [`LatencyPorts`] for latency queries/announcements on the control side.
//! Everything the driver does goes through these two traits, so the same
//! driver runs under JACK, the dummy clock and the offline renderer.
//!
//! Starting is two-phase because the unit must be activated with the
//! backend's sample rate before the first cycle:
//!
//! ```ignore
//! let backend = AudioBackend::open(&config)?;
//! let host = HostBuilder::new(unit, urids).build(backend.sample_rate())?;
//! let handle = backend.start(host.driver, host.latency, stop.clone())?;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::config::{AudioConfig, BackendKind};
use super::dummy::{DummyBackend, DummyHandle};
use super::error::{AudioError, AudioResult};
use crate::engine::{AudioCycleDriver, LatencyGraph, TransportState};
use crate::types::{Frames, LatencyRange, Sample};

/// Per-cycle view of the hardware
pub trait CycleIo {
    /// Frames in this cycle
    fn n_frames(&self) -> usize;

    fn audio_in_count(&self) -> usize;

    fn audio_out_count(&self) -> usize;

    /// Hardware input `channel` (exactly `n_frames` samples)
    fn audio_in(&self, channel: usize) -> &[Sample];

    /// Hardware output `channel` (exactly `n_frames` samples)
    fn audio_out(&mut self, channel: usize) -> &mut [Sample];

    /// Transport as seen at the start of this cycle
    fn transport(&self) -> TransportState;

    /// Visit every incoming MIDI event as `(frame offset, bytes)`, in time order
    fn for_each_midi_in(&self, visit: &mut dyn FnMut(u32, &[u8]));

    /// Send a MIDI event; `false` if the backend had no room
    fn midi_out(&mut self, time: u32, bytes: &[u8]) -> bool;

    /// Drop any MIDI already written this cycle
    fn clear_midi_out(&mut self);

    /// Offline rendering: no deadline, blocking is allowed
    fn freewheeling(&self) -> bool {
        false
    }
}

/// Latency queries and announcements for our own ports
pub trait LatencyPorts {
    /// Capture latency of audio input `input`
    fn capture_latency(&self, input: usize) -> LatencyRange;

    /// Playback latency of audio output `output`
    fn playback_latency(&self, output: usize) -> LatencyRange;

    /// Announce the capture latency of audio output `output`
    fn announce_capture(&mut self, output: usize, range: LatencyRange);

    /// Announce the playback latency of audio input `input`
    fn announce_playback(&mut self, input: usize, range: LatencyRange);
}

/// Process-wide shutdown request
///
/// Cloned into every long-running loop; setting it is async-signal-safe.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Latency graph plus the ports it talks to, shared by the control thread and
/// the backend's notification thread
pub struct LatencyControl {
    pub graph: LatencyGraph,
    pub ports: Box<dyn LatencyPorts + Send>,
}

/// Snapshot of the latency state for display
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatencyReport {
    pub worst_capture: Frames,
    pub unit_latency: Frames,
    /// Alignment delay per audio input
    pub input_delays: Vec<Frames>,
}

impl LatencyControl {
    pub fn new(graph: LatencyGraph, ports: Box<dyn LatencyPorts + Send>) -> Self {
        Self { graph, ports }
    }

    /// Initial query and announcement, before the first cycle
    pub fn prime(&mut self) {
        self.graph.on_graph_changed(self.ports.as_ref());
        self.graph.recompute_all(self.ports.as_mut());
    }

    /// Pick up a unit latency change without announcing anything
    ///
    /// For servers that announce from their own latency callback.
    pub fn refresh(&mut self) -> bool {
        self.graph.sync_unit_latency()
    }

    /// Control tick: re-announce when the unit's latency changed
    pub fn sync(&mut self) -> bool {
        if !self.refresh() {
            return false;
        }
        self.graph.recompute_all(self.ports.as_mut());
        true
    }

    pub fn report(&self) -> LatencyReport {
        let shared = self.graph.shared();
        LatencyReport {
            worst_capture: self.graph.worst_capture(),
            unit_latency: self.graph.unit_latency(),
            input_delays: (0..shared.n_inputs()).map(|i| self.graph.port_delay(i)).collect(),
        }
    }
}

/// Shared handle to the latency control
pub type SharedLatency = Arc<Mutex<LatencyControl>>;

pub(crate) fn lock_latency(latency: &SharedLatency) -> std::sync::MutexGuard<'_, LatencyControl> {
    latency.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An opened (not yet running) backend
pub enum AudioBackend {
    Dummy(DummyBackend),

    /// Native JACK (Linux with jack-backend feature)
    #[cfg(all(target_os = "linux", feature = "jack-backend"))]
    Jack(super::jack_backend::JackBackend),
}

impl AudioBackend {
    /// Open the backend named in `config`
    pub fn open(config: &AudioConfig) -> AudioResult<Self> {
        match config.backend {
            BackendKind::Dummy => Ok(AudioBackend::Dummy(DummyBackend::open(config))),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            BackendKind::Jack => Ok(AudioBackend::Jack(super::jack_backend::JackBackend::open(
                config,
            )?)),
            #[cfg(not(all(target_os = "linux", feature = "jack-backend")))]
            BackendKind::Jack => Err(AudioError::BackendUnavailable("jack".to_string())),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            AudioBackend::Dummy(b) => b.sample_rate(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            AudioBackend::Jack(b) => b.sample_rate(),
        }
    }

    pub fn buffer_size(&self) -> u32 {
        match self {
            AudioBackend::Dummy(b) => b.buffer_size(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            AudioBackend::Jack(b) => b.buffer_size(),
        }
    }

    /// Register ports for `driver` and start calling it every cycle
    pub fn start(
        self,
        driver: AudioCycleDriver,
        graph: LatencyGraph,
        stop: StopFlag,
    ) -> AudioResult<AudioHandle> {
        if driver.max_period() < self.buffer_size() as usize {
            log::warn!(
                "Buffer size {} exceeds the maximum period {}, cycles will be silent",
                self.buffer_size(),
                driver.max_period()
            );
        }
        match self {
            AudioBackend::Dummy(b) => Ok(AudioHandle::Dummy(b.start(driver, graph, stop)?)),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            AudioBackend::Jack(b) => Ok(AudioHandle::Jack(b.start(driver, graph, stop)?)),
        }
    }
}

/// Handle to the running audio system
///
/// Keeps the backend alive; call [`AudioHandle::stop`] to get the driver back.
pub enum AudioHandle {
    Dummy(DummyHandle),

    #[cfg(all(target_os = "linux", feature = "jack-backend"))]
    Jack(super::jack_backend::JackAudioHandle),
}

impl AudioHandle {
    /// Name registered with the server
    pub fn client_name(&self) -> &str {
        match self {
            AudioHandle::Dummy(h) => h.client_name(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            AudioHandle::Jack(h) => h.client_name(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        match self {
            AudioHandle::Dummy(h) => h.sample_rate(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            AudioHandle::Jack(h) => h.sample_rate(),
        }
    }

    pub fn buffer_size(&self) -> u32 {
        match self {
            AudioHandle::Dummy(h) => h.buffer_size(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            AudioHandle::Jack(h) => h.buffer_size(),
        }
    }

    /// Get the period latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size() as f32 / self.sample_rate().max(1) as f32) * 1000.0
    }

    fn latency(&self) -> &SharedLatency {
        match self {
            AudioHandle::Dummy(h) => h.latency(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            AudioHandle::Jack(h) => h.latency(),
        }
    }

    /// Control tick: pick up a unit latency change and re-announce
    pub fn sync_latency(&self) -> bool {
        match self {
            AudioHandle::Dummy(h) => lock_latency(h.latency()).sync(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            AudioHandle::Jack(h) => h.sync_latency(),
        }
    }

    pub fn latency_report(&self) -> LatencyReport {
        lock_latency(self.latency()).report()
    }

    /// Stop processing and return the driver (with its unit still inside)
    pub fn stop(self) -> Option<AudioCycleDriver> {
        match self {
            AudioHandle::Dummy(h) => h.stop(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            AudioHandle::Jack(h) => h.stop(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_stop_flag_is_shared() {
        let flag = StopFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_stopped());
        flag.stop();
        assert!(clone.is_stopped());
    }

    /// Counts announcements, every port at zero latency
    struct CountingPorts(Arc<AtomicUsize>);

    impl LatencyPorts for CountingPorts {
        fn capture_latency(&self, _input: usize) -> LatencyRange {
            LatencyRange::default()
        }

        fn playback_latency(&self, _output: usize) -> LatencyRange {
            LatencyRange::default()
        }

        fn announce_capture(&mut self, _output: usize, _range: LatencyRange) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }

        fn announce_playback(&mut self, _input: usize, _range: LatencyRange) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_refresh_leaves_announcing_to_the_server() {
        let announced = Arc::new(AtomicUsize::new(0));
        let graph = LatencyGraph::new(1, 1);
        let shared = graph.shared();
        let mut control = LatencyControl::new(graph, Box::new(CountingPorts(Arc::clone(&announced))));
        control.prime();
        let primed = announced.load(Ordering::Relaxed);
        assert_eq!(primed, 2);

        shared.report_unit_latency(32);
        assert!(control.refresh());
        assert_eq!(control.report().unit_latency, 32);
        assert_eq!(announced.load(Ordering::Relaxed), primed);
        assert!(!control.sync());

        shared.report_unit_latency(64);
        assert!(control.sync());
        assert_eq!(announced.load(Ordering::Relaxed), primed + 2);
    }

    #[cfg(not(all(target_os = "linux", feature = "jack-backend")))]
    #[test]
    fn test_jack_unavailable_without_feature() {
        let config = AudioConfig::default().with_backend(BackendKind::Jack);
        assert!(matches!(
            AudioBackend::open(&config),
            Err(AudioError::BackendUnavailable(_))
        ));
    }
}
