//! Dummy backend - a clock thread driving the cycle without an audio server
//!
//! Inputs are silent and outputs are discarded. Useful for running a unit
//! headless (UI, worker, latency reporting all behave as under JACK) and as the
//! cycle source in tests. [`BufferCycle`] is also what the offline renderer
//! feeds through the driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::backend::{CycleIo, LatencyControl, LatencyPorts, SharedLatency, StopFlag};
use super::config::AudioConfig;
use super::error::{AudioError, AudioResult};
use crate::engine::{event_len, AudioCycleDriver, EventSequence, LatencyGraph, TransportState};
use crate::types::{LatencyRange, Sample};

/// MIDI buffered per direction in a [`BufferCycle`] (3-byte messages)
const MIDI_EVENTS_PER_CYCLE: usize = 512;

/// Owned hardware buffers implementing [`CycleIo`]
pub struct BufferCycle {
    n_frames: usize,
    inputs: Vec<Vec<Sample>>,
    outputs: Vec<Vec<Sample>>,
    transport: TransportState,
    midi_in: EventSequence,
    midi_out: EventSequence,
    freewheel: bool,
}

impl BufferCycle {
    /// Buffers for `n_in`/`n_out` channels of up to `max_frames` frames
    pub fn new(n_in: usize, n_out: usize, max_frames: usize) -> Self {
        let midi_capacity = MIDI_EVENTS_PER_CYCLE * event_len(3);
        Self {
            n_frames: max_frames,
            inputs: vec![vec![0.0; max_frames]; n_in],
            outputs: vec![vec![0.0; max_frames]; n_out],
            transport: TransportState::default(),
            midi_in: EventSequence::with_capacity(midi_capacity),
            midi_out: EventSequence::with_capacity(midi_capacity),
            freewheel: false,
        }
    }

    /// Change the size of the next cycle (grows the buffers if needed)
    pub fn set_n_frames(&mut self, n_frames: usize) {
        for buf in self.inputs.iter_mut().chain(self.outputs.iter_mut()) {
            if buf.len() < n_frames {
                buf.resize(n_frames, 0.0);
            }
        }
        self.n_frames = n_frames;
    }

    /// Hardware input `channel` for the next cycle
    pub fn input_mut(&mut self, channel: usize) -> &mut [Sample] {
        &mut self.inputs[channel][..self.n_frames]
    }

    /// What the driver wrote to output `channel` in the last cycle
    pub fn output(&self, channel: usize) -> &[Sample] {
        &self.outputs[channel][..self.n_frames]
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport
    }

    pub fn set_transport(&mut self, transport: TransportState) {
        self.transport = transport;
    }

    /// Move a rolling transport forward by the current cycle size
    pub fn advance_transport(&mut self) {
        if self.transport.rolling {
            self.transport.frame += self.n_frames as u64;
        }
    }

    /// Queue hardware MIDI for the next cycle
    pub fn push_midi_in(&mut self, time: u32, bytes: &[u8]) -> bool {
        self.midi_in.append(time, 0, bytes)
    }

    /// MIDI the driver sent in the last cycle as `(time, bytes)`
    pub fn midi_out_events(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.midi_out.iter().map(|event| (event.offset, event.body))
    }

    pub fn set_freewheel(&mut self, freewheel: bool) {
        self.freewheel = freewheel;
    }
}

impl CycleIo for BufferCycle {
    fn n_frames(&self) -> usize {
        self.n_frames
    }

    fn audio_in_count(&self) -> usize {
        self.inputs.len()
    }

    fn audio_out_count(&self) -> usize {
        self.outputs.len()
    }

    fn audio_in(&self, channel: usize) -> &[Sample] {
        &self.inputs[channel][..self.n_frames]
    }

    fn audio_out(&mut self, channel: usize) -> &mut [Sample] {
        &mut self.outputs[channel][..self.n_frames]
    }

    fn transport(&self) -> TransportState {
        self.transport
    }

    fn for_each_midi_in(&self, visit: &mut dyn FnMut(u32, &[u8])) {
        for event in self.midi_in.iter() {
            visit(event.offset, event.body);
        }
    }

    fn midi_out(&mut self, time: u32, bytes: &[u8]) -> bool {
        self.midi_out.append(time, 0, bytes)
    }

    fn clear_midi_out(&mut self) {
        self.midi_out.clear();
    }

    fn freewheeling(&self) -> bool {
        self.freewheel
    }
}

/// Fixed port latencies taken from the config
pub struct DummyLatencyPorts {
    capture: Vec<LatencyRange>,
    playback: LatencyRange,
    announced_capture: Vec<LatencyRange>,
    announced_playback: Vec<LatencyRange>,
}

impl DummyLatencyPorts {
    pub fn new(n_in: usize, n_out: usize, capture: &[u32], playback: u32) -> Self {
        Self {
            capture: (0..n_in)
                .map(|i| LatencyRange::exact(capture.get(i).copied().unwrap_or(0)))
                .collect(),
            playback: LatencyRange::exact(playback),
            announced_capture: vec![LatencyRange::default(); n_out],
            announced_playback: vec![LatencyRange::default(); n_in],
        }
    }

    /// Capture latency last announced for output `output`
    pub fn announced_capture(&self, output: usize) -> Option<LatencyRange> {
        self.announced_capture.get(output).copied()
    }

    /// Playback latency last announced for input `input`
    pub fn announced_playback(&self, input: usize) -> Option<LatencyRange> {
        self.announced_playback.get(input).copied()
    }
}

impl LatencyPorts for DummyLatencyPorts {
    fn capture_latency(&self, input: usize) -> LatencyRange {
        self.capture.get(input).copied().unwrap_or_default()
    }

    fn playback_latency(&self, output: usize) -> LatencyRange {
        if output < self.announced_capture.len() {
            self.playback
        } else {
            LatencyRange::default()
        }
    }

    fn announce_capture(&mut self, output: usize, range: LatencyRange) {
        if let Some(slot) = self.announced_capture.get_mut(output) {
            *slot = range;
        }
        log::debug!("[LATENCY] out {} capture {:?}", output, range);
    }

    fn announce_playback(&mut self, input: usize, range: LatencyRange) {
        if let Some(slot) = self.announced_playback.get_mut(input) {
            *slot = range;
        }
        log::debug!("[LATENCY] in {} playback {:?}", input, range);
    }
}

/// Opened dummy backend
pub struct DummyBackend {
    config: AudioConfig,
}

impl DummyBackend {
    pub fn open(config: &AudioConfig) -> Self {
        log::info!(
            "Dummy backend: {}Hz, {} frames per period ({:.1}ms)",
            config.sample_rate,
            config.period,
            config.period_ms()
        );
        Self {
            config: config.clone(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.config.period
    }

    /// Spawn the clock thread
    pub fn start(
        self,
        mut driver: AudioCycleDriver,
        graph: LatencyGraph,
        stop: StopFlag,
    ) -> AudioResult<DummyHandle> {
        if self.config.sample_rate == 0 || self.config.period == 0 {
            return Err(AudioError::ConfigError(
                "dummy sample rate and period must be non-zero".to_string(),
            ));
        }

        let n_in = driver.audio_in_count();
        let n_out = driver.audio_out_count();
        let ports = DummyLatencyPorts::new(
            n_in,
            n_out,
            &self.config.capture_latency,
            self.config.playback_latency,
        );
        let mut control = LatencyControl::new(graph, Box::new(ports));
        control.prime();
        let latency: SharedLatency = Arc::new(Mutex::new(control));

        let period = self.config.period as usize;
        let interval = Duration::from_secs_f64(period as f64 / self.config.sample_rate as f64);
        let running = Arc::new(AtomicBool::new(true));
        let running_thread = Arc::clone(&running);
        let rolling = self.config.transport_rolling;

        let thread = thread::Builder::new()
            .name("rtwrap-dummy-clock".to_string())
            .spawn(move || {
                let mut io = BufferCycle::new(n_in, n_out, period);
                io.set_transport(if rolling {
                    TransportState::rolling_at(0)
                } else {
                    TransportState::stopped_at(0)
                });

                let mut deadline = Instant::now();
                while running_thread.load(Ordering::Acquire) && !stop.is_stopped() {
                    driver.process(&mut io);
                    io.advance_transport();

                    deadline += interval;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else if now - deadline > interval {
                        log::debug!("Dummy clock fell behind, resetting deadline");
                        deadline = now;
                    }
                }
                log::debug!("Dummy clock stopped after {} cycles", driver.cycles());
                driver
            })
            .map_err(|e| AudioError::StartFailed(e.to_string()))?;

        log::info!("Dummy backend started as '{}'", self.config.client_name);
        Ok(DummyHandle {
            client_name: self.config.client_name,
            sample_rate: self.config.sample_rate,
            buffer_size: self.config.period,
            latency,
            running,
            thread: Some(thread),
        })
    }
}

/// Running dummy backend
pub struct DummyHandle {
    client_name: String,
    sample_rate: u32,
    buffer_size: u32,
    latency: SharedLatency,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<AudioCycleDriver>>,
}

impl DummyHandle {
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    pub(crate) fn latency(&self) -> &SharedLatency {
        &self.latency
    }

    /// Stop the clock and return the driver
    pub fn stop(mut self) -> Option<AudioCycleDriver> {
        self.running.store(false, Ordering::Release);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(driver) => Some(driver),
            Err(_) => {
                log::error!("Dummy clock thread panicked");
                None
            }
        }
    }
}

impl Drop for DummyHandle {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_cycle_grows_and_slices() {
        let mut io = BufferCycle::new(1, 2, 64);
        io.set_n_frames(128);
        assert_eq!(io.n_frames(), 128);
        assert_eq!(io.audio_in(0).len(), 128);
        assert_eq!(io.audio_out(1).len(), 128);
        io.set_n_frames(32);
        assert_eq!(io.output(0).len(), 32);
    }

    #[test]
    fn test_buffer_cycle_midi() {
        let mut io = BufferCycle::new(0, 0, 16);
        assert!(io.push_midi_in(3, &[0x90, 60, 100]));
        let mut seen = Vec::new();
        io.for_each_midi_in(&mut |time, bytes| seen.push((time, bytes.to_vec())));
        assert_eq!(seen, vec![(3, vec![0x90, 60, 100])]);

        io.midi_out(5, &[0x80, 60, 0]);
        assert_eq!(io.midi_out_events().count(), 1);
        io.clear_midi_out();
        assert_eq!(io.midi_out_events().count(), 0);
    }

    #[test]
    fn test_advance_only_when_rolling() {
        let mut io = BufferCycle::new(0, 0, 100);
        io.set_transport(TransportState::stopped_at(10));
        io.advance_transport();
        assert_eq!(io.transport_state().frame, 10);
        io.set_transport(TransportState::rolling_at(10));
        io.advance_transport();
        assert_eq!(io.transport_state().frame, 110);
    }

    #[test]
    fn test_dummy_latency_ports() {
        let mut ports = DummyLatencyPorts::new(3, 2, &[20, 50], 7);
        assert_eq!(ports.capture_latency(1), LatencyRange::exact(50));
        assert_eq!(ports.capture_latency(2), LatencyRange::exact(0));
        assert_eq!(ports.playback_latency(1), LatencyRange::exact(7));
        assert_eq!(ports.playback_latency(2), LatencyRange::default());

        let mut graph = LatencyGraph::new(3, 2);
        graph.on_graph_changed(&ports);
        graph.recompute_all(&mut ports);
        assert_eq!(ports.announced_capture(0), Some(LatencyRange::exact(50)));
        assert_eq!(ports.announced_playback(2), Some(LatencyRange::exact(50)));
    }
}
