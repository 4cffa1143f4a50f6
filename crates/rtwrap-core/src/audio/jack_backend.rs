//! Native JACK audio backend for Linux
//!
//! Registers one JACK port per unit port (audio in/out, first MIDI in/out)
//! and runs [`AudioCycleDriver::process`] inside the JACK process callback.
//!
//! # Threads
//!
//! ```text
//! ┌──────────────────┐  LatencyShared (atomics)   ┌─────────────────────┐
//! │  Control thread  │◄──────────────────────────►│   JACK RT thread    │
//! │ sync_latency()   │                            │ (owns the driver)   │
//! └────────┬─────────┘                            └─────────────────────┘
//!          │ Mutex<LatencyControl>
//!          ▼
//! ┌──────────────────┐
//! │ JACK notification│  graph_reorder / latency callbacks
//! │     thread       │
//! └──────────────────┘
//! ```
//!
//! Latency is only ever announced from the latency callback. When the unit's
//! latency changes, `sync_latency` updates the graph and asks the server to
//! recompute, which calls back into the notification thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use jack::{
    AudioIn, AudioOut, Client, ClientOptions, ClientStatus, Control, LatencyType, MidiIn, MidiOut,
    MidiWriter, Port, PortFlags, ProcessScope, RawMidi, Unowned,
};

use super::backend::{lock_latency, CycleIo, LatencyControl, LatencyPorts, SharedLatency, StopFlag};
use super::config::{AudioConfig, AutoConnect};
use super::error::{AudioError, AudioResult};
use crate::engine::{check_channel_counts, AudioCycleDriver, Bbt, LatencyGraph, LatencyMode, TransportState};
use crate::plugin::PortKind;
use crate::types::{LatencyRange, Sample};

const AUDIO_TYPE: &str = "32 bit float mono audio";
const MIDI_TYPE: &str = "8 bit raw midi";

/// JACK client opened but not yet activated
pub struct JackBackend {
    client: Client,
    autoconnect: AutoConnect,
}

impl JackBackend {
    /// Connect to a running server (never starts one)
    pub fn open(config: &AudioConfig) -> AudioResult<Self> {
        let (client, _status) = Client::new(&config.client_name, ClientOptions::NO_START_SERVER)
            .map_err(|e| AudioError::ServerUnavailable(e.to_string()))?;

        log::info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames)",
            client.name(),
            client.sample_rate(),
            client.buffer_size()
        );

        Ok(Self {
            client,
            autoconnect: config.autoconnect,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.client.sample_rate() as u32
    }

    pub fn buffer_size(&self) -> u32 {
        self.client.buffer_size()
    }

    /// Register ports, prime latencies, activate and autoconnect
    pub fn start(
        self,
        driver: AudioCycleDriver,
        graph: LatencyGraph,
        stop: StopFlag,
    ) -> AudioResult<JackAudioHandle> {
        let client = self.client;
        let descriptor = driver.descriptor().clone();

        let register_err = |port: &str, e: jack::Error| AudioError::PortRegistration {
            port: port.to_string(),
            reason: e.to_string(),
        };

        let mut audio_in = Vec::new();
        for (_, port) in descriptor.ports_of(PortKind::AudioIn) {
            audio_in.push(
                client
                    .register_port(&port.name, AudioIn::default())
                    .map_err(|e| register_err(&port.name, e))?,
            );
        }
        let mut audio_out = Vec::new();
        for (_, port) in descriptor.ports_of(PortKind::AudioOut) {
            audio_out.push(
                client
                    .register_port(&port.name, AudioOut::default())
                    .map_err(|e| register_err(&port.name, e))?,
            );
        }
        check_channel_counts(&driver, audio_in.len(), audio_out.len())?;

        let midi_in = match descriptor.ports_of(PortKind::EventIn).next() {
            Some((_, port)) => Some(
                client
                    .register_port(&port.name, MidiIn::default())
                    .map_err(|e| register_err(&port.name, e))?,
            ),
            None => None,
        };
        let midi_out = match descriptor.ports_of(PortKind::EventOut).next() {
            Some((_, port)) => Some(
                client
                    .register_port(&port.name, MidiOut::default())
                    .map_err(|e| register_err(&port.name, e))?,
            ),
            None => None,
        };

        let latency_ports = JackLatencyPorts {
            inputs: audio_in.iter().map(|p| p.clone_unowned()).collect(),
            outputs: audio_out.iter().map(|p| p.clone_unowned()).collect(),
        };
        let own_inputs: Vec<String> = latency_ports.inputs.iter().filter_map(|p| p.name().ok()).collect();
        let own_outputs: Vec<String> = latency_ports.outputs.iter().filter_map(|p| p.name().ok()).collect();
        let own_midi_in = midi_in.as_ref().and_then(|p| p.name().ok());

        let mut control = LatencyControl::new(graph, Box::new(latency_ports));
        control.prime();
        let latency: SharedLatency = Arc::new(Mutex::new(control));

        let freewheel = Arc::new(AtomicBool::new(false));
        let processor = JackProcessor {
            driver,
            audio_in,
            audio_out,
            midi_in,
            midi_out,
            freewheel: Arc::clone(&freewheel),
        };
        let notifications = JackNotifications {
            latency: Arc::clone(&latency),
            freewheel,
            stop,
        };

        let client_name = client.name().to_string();
        let sample_rate = client.sample_rate() as u32;
        let buffer_size = client.buffer_size();

        let async_client = client
            .activate_async(notifications, processor)
            .map_err(|e| AudioError::StartFailed(e.to_string()))?;
        log::info!("JACK client '{}' activated", client_name);

        if self.autoconnect.any() {
            autoconnect(
                async_client.as_client(),
                self.autoconnect,
                &own_inputs,
                &own_outputs,
                own_midi_in.as_deref(),
            );
        }

        Ok(JackAudioHandle {
            async_client: Some(async_client),
            client_name,
            sample_rate,
            buffer_size,
            latency,
        })
    }
}

/// Connect our ports to the physical ports, pairwise in registration order
fn autoconnect(
    client: &Client,
    mask: AutoConnect,
    inputs: &[String],
    outputs: &[String],
    midi_in: Option<&str>,
) {
    let connect = |src: &str, dst: &str| match client.connect_ports_by_name(src, dst) {
        Ok(()) => log::info!("Connected {} -> {}", src, dst),
        Err(e) => log::warn!("Could not connect {} -> {}: {}", src, dst, e),
    };

    if mask.audio_in {
        let capture = client.ports(None, Some(AUDIO_TYPE), PortFlags::IS_PHYSICAL | PortFlags::IS_OUTPUT);
        for (src, dst) in capture.iter().zip(inputs) {
            connect(src, dst);
        }
    }
    if mask.audio_out {
        let playback = client.ports(None, Some(AUDIO_TYPE), PortFlags::IS_PHYSICAL | PortFlags::IS_INPUT);
        for (src, dst) in outputs.iter().zip(&playback) {
            connect(src, dst);
        }
    }
    if let (true, Some(dst)) = (mask.midi_in, midi_in) {
        let sources = client.ports(None, Some(MIDI_TYPE), PortFlags::IS_PHYSICAL | PortFlags::IS_OUTPUT);
        for src in &sources {
            connect(src, dst);
        }
    }
}

/// Running JACK client
///
/// Drop (or [`JackAudioHandle::stop`]) to leave the graph.
pub struct JackAudioHandle {
    async_client: Option<jack::AsyncClient<JackNotifications, JackProcessor>>,
    client_name: String,
    sample_rate: u32,
    buffer_size: u32,
    latency: SharedLatency,
}

impl JackAudioHandle {
    /// Name the server actually gave us (may be uniquified)
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

    /// Control tick: pick up a unit latency change and have the server
    /// re-run the latency callbacks
    pub fn sync_latency(&self) -> bool {
        // The lock must be released before recomputing: the server calls our
        // latency callback, which takes it again
        let changed = lock_latency(&self.latency).refresh();
        if !changed {
            return false;
        }
        if let Some(async_client) = &self.async_client {
            let raw = async_client.as_client().raw();
            // SAFETY: `raw` belongs to a client that stays open while we hold it
            let ret = unsafe { jack::jack_sys::jack_recompute_total_latencies(raw) };
            if ret != 0 {
                log::warn!("JACK refused to recompute latencies ({})", ret);
            }
        }
        true
    }

    /// Deactivate the client and return the driver
    pub fn stop(mut self) -> Option<AudioCycleDriver> {
        let async_client = self.async_client.take()?;
        match async_client.deactivate() {
            Ok((_client, _notifications, processor)) => {
                log::info!("JACK client '{}' deactivated", self.client_name);
                Some(processor.driver)
            }
            Err(e) => {
                log::error!("Failed to deactivate JACK client: {}", e);
                None
            }
        }
    }
}

/// JACK process handler, owns the driver
pub struct JackProcessor {
    driver: AudioCycleDriver,
    audio_in: Vec<Port<AudioIn>>,
    audio_out: Vec<Port<AudioOut>>,
    midi_in: Option<Port<MidiIn>>,
    midi_out: Option<Port<MidiOut>>,
    freewheel: Arc<AtomicBool>,
}

impl jack::ProcessHandler for JackProcessor {
    fn process(&mut self, client: &Client, ps: &ProcessScope) -> Control {
        let mut cycle = JackCycle {
            ps,
            n_frames: ps.n_frames() as usize,
            audio_in: &self.audio_in,
            audio_out: &mut self.audio_out,
            midi_in: self.midi_in.as_ref(),
            midi_out: self.midi_out.as_mut().map(|port| port.writer(ps)),
            transport: query_transport(client),
            freewheel: self.freewheel.load(Ordering::Relaxed),
        };
        self.driver.process(&mut cycle);
        Control::Continue
    }

    fn buffer_size(&mut self, _client: &Client, size: jack::Frames) -> Control {
        if size as usize > self.driver.max_period() {
            log::warn!(
                "JACK buffer size {} exceeds the maximum period {}, cycles will be silent",
                size,
                self.driver.max_period()
            );
        } else {
            log::info!("JACK buffer size changed to {}", size);
        }
        Control::Continue
    }
}

fn query_transport(client: &Client) -> TransportState {
    let Ok(status) = client.transport().query() else {
        return TransportState::default();
    };
    let bbt = status.pos.bbt().map(|bbt| Bbt {
        bar: bbt.bar as i32,
        beat: bbt.beat as i32,
        tick: bbt.tick as i32,
        ticks_per_beat: bbt.ticks_per_beat,
        beats_per_bar: bbt.sig_num,
        beat_type: bbt.sig_denom,
        bpm: bbt.bpm,
    });
    TransportState {
        rolling: matches!(status.state, jack::TransportState::Rolling),
        frame: u64::from(status.pos.frame()),
        bbt,
    }
}

/// One JACK callback seen through [`CycleIo`]
struct JackCycle<'a> {
    ps: &'a ProcessScope,
    n_frames: usize,
    audio_in: &'a [Port<AudioIn>],
    audio_out: &'a mut [Port<AudioOut>],
    midi_in: Option<&'a Port<MidiIn>>,
    /// Created per cycle; creating the writer clears the port buffer
    midi_out: Option<MidiWriter<'a>>,
    transport: TransportState,
    freewheel: bool,
}

impl CycleIo for JackCycle<'_> {
    fn n_frames(&self) -> usize {
        self.n_frames
    }

    fn audio_in_count(&self) -> usize {
        self.audio_in.len()
    }

    fn audio_out_count(&self) -> usize {
        self.audio_out.len()
    }

    fn audio_in(&self, channel: usize) -> &[Sample] {
        self.audio_in[channel].as_slice(self.ps)
    }

    fn audio_out(&mut self, channel: usize) -> &mut [Sample] {
        self.audio_out[channel].as_mut_slice(self.ps)
    }

    fn transport(&self) -> TransportState {
        self.transport
    }

    fn for_each_midi_in(&self, visit: &mut dyn FnMut(u32, &[u8])) {
        if let Some(port) = self.midi_in {
            for raw in port.iter(self.ps) {
                visit(raw.time, raw.bytes);
            }
        }
    }

    fn midi_out(&mut self, time: u32, bytes: &[u8]) -> bool {
        match self.midi_out.as_mut() {
            Some(writer) => writer.write(&RawMidi { time, bytes }).is_ok(),
            None => false,
        }
    }

    fn clear_midi_out(&mut self) {
        // The writer already cleared the port buffer this cycle
    }

    fn freewheeling(&self) -> bool {
        self.freewheel
    }
}

/// Latency queries/announcements on our own (unowned copies of) ports
struct JackLatencyPorts {
    inputs: Vec<Port<Unowned>>,
    outputs: Vec<Port<Unowned>>,
}

fn to_range((min, max): (jack::Frames, jack::Frames)) -> LatencyRange {
    LatencyRange::new(min, max)
}

impl LatencyPorts for JackLatencyPorts {
    fn capture_latency(&self, input: usize) -> LatencyRange {
        self.inputs
            .get(input)
            .map(|p| to_range(p.get_latency_range(LatencyType::Capture)))
            .unwrap_or_default()
    }

    fn playback_latency(&self, output: usize) -> LatencyRange {
        self.outputs
            .get(output)
            .map(|p| to_range(p.get_latency_range(LatencyType::Playback)))
            .unwrap_or_default()
    }

    fn announce_capture(&mut self, output: usize, range: LatencyRange) {
        if let Some(port) = self.outputs.get(output) {
            port.set_latency_range(LatencyType::Capture, (range.min, range.max));
        }
    }

    fn announce_playback(&mut self, input: usize, range: LatencyRange) {
        if let Some(port) = self.inputs.get(input) {
            port.set_latency_range(LatencyType::Playback, (range.min, range.max));
        }
    }
}

/// JACK notification handler
pub struct JackNotifications {
    latency: SharedLatency,
    freewheel: Arc<AtomicBool>,
    stop: StopFlag,
}

impl jack::NotificationHandler for JackNotifications {
    unsafe fn shutdown(&mut self, status: ClientStatus, reason: &str) {
        log::error!("JACK server shut down ({:?}): {}", status, reason);
        self.stop.stop();
    }

    fn freewheel(&mut self, _client: &Client, is_freewheel_enabled: bool) {
        log::info!("JACK freewheel {}", if is_freewheel_enabled { "on" } else { "off" });
        self.freewheel.store(is_freewheel_enabled, Ordering::Relaxed);
    }

    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        log::info!("JACK sample rate changed to: {}", srate);
        Control::Continue
    }

    fn graph_reorder(&mut self, _client: &Client) -> Control {
        let mut control = lock_latency(&self.latency);
        let LatencyControl { graph, ports } = &mut *control;
        graph.on_graph_changed(ports.as_ref());
        Control::Continue
    }

    fn latency(&mut self, _client: &Client, mode: LatencyType) {
        let mode = match mode {
            LatencyType::Capture => LatencyMode::Capture,
            LatencyType::Playback => LatencyMode::Playback,
        };
        let mut control = lock_latency(&self.latency);
        let LatencyControl { graph, ports } = &mut *control;
        graph.on_recompute_output_latency(mode, ports.as_mut());
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        log::warn!("JACK xrun detected");
        Control::Continue
    }
}
