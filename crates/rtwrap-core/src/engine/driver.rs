//! The per-cycle audio driver
//!
//! [`AudioCycleDriver::process`] is called once per hardware callback. It owns
//! every buffer it touches (allocated once in [`HostBuilder::build`]) and only
//! talks to other threads through rings and relaxed atomics.
//!
//! # Cycle
//!
//! ```text
//!   ┌─ block too large / no unit ─► silence + clear MIDI out, warn once
//!   │
//!   1. UI control changes ─────────────► control values
//!      surface parameters ─────────────► control values (+ echo to UI)
//!   2. transport changed? ─────────────► position event @0   (if the unit wants time)
//!   3. UI events @0, surface MIDI @0, hardware MIDI @offset ─► event input
//!   4. snapshot controls; inputs ──DelayLine(wanted)──► unit.run()
//!   5. worker responses ───────────────► unit.work_response() (may amend outputs)
//!      rendered audio ─────────────────► hardware outputs
//!   6. changed control outputs ────────► UI ring (latency port ► LatencyShared)
//!   7. MIDI in event output ───────────► hardware MIDI out; sequence ► UI ring
//!   8. unit.end_run(); wake UI if anything is waiting
//! ```

use std::sync::Arc;

use super::channel::{
    channel, surface_channel, AudioChannel, ChannelSizes, ControlChange, SurfaceMessage,
    SurfaceReceiver, SurfaceSender, UiChannel,
};
use super::delay::DelayLine;
use super::events::{event_len, EventSequence};
use super::latency::{LatencyGraph, LatencyShared};
use super::transport::TransportTracker;
use super::worker::{WorkScheduler, Worker};
use crate::audio::CycleIo;
use crate::plugin::{HostError, HostResult, PortBuffers, PortKind, ProcessingUnit, UnitDescriptor};
use crate::types::{Sample, MAX_DELAY, MAX_PERIOD, SURFACE_QUEUE_SIZE, UPDATE_FREQ_RATIO};
use crate::urid::Urids;

/// Everything produced by [`HostBuilder::build`]
pub struct Host {
    /// Goes to the audio thread
    pub driver: AudioCycleDriver,
    /// Goes to the UI/control thread
    pub ui: UiChannel,
    /// Control-side latency bookkeeping
    pub latency: LatencyGraph,
    /// Keeps the worker thread alive (if the unit has a work handler)
    pub worker: Option<Worker>,
    /// Writing end of the control-surface ring, if requested
    pub surface: Option<SurfaceSender>,
}

/// Assembles a unit with its driver, channel, latency graph and worker
pub struct HostBuilder {
    unit: Box<dyn ProcessingUnit>,
    urids: Urids,
    max_period: usize,
    max_delay: usize,
    update_ratio: usize,
    surface: bool,
    initial_controls: Vec<(usize, f32)>,
}

impl HostBuilder {
    pub fn new(unit: Box<dyn ProcessingUnit>, urids: Urids) -> Self {
        Self {
            unit,
            urids,
            max_period: MAX_PERIOD,
            max_delay: MAX_DELAY,
            update_ratio: UPDATE_FREQ_RATIO,
            surface: false,
            initial_controls: Vec::new(),
        }
    }

    /// Largest block processed; larger blocks are answered with silence
    pub fn with_max_period(mut self, frames: usize) -> Self {
        self.max_period = frames.max(1);
        self
    }

    /// Delay line length per input
    pub fn with_max_delay(mut self, frames: usize) -> Self {
        self.max_delay = frames.max(1);
        self
    }

    /// Cycles of UI-bound data buffered before updates are dropped
    pub fn with_update_ratio(mut self, ratio: usize) -> Self {
        self.update_ratio = ratio.max(1);
        self
    }

    /// Create a control-surface ring
    pub fn with_surface(mut self) -> Self {
        self.surface = true;
        self
    }

    /// Override a control input's starting value (validated in `build`)
    pub fn with_control(mut self, port: usize, value: f32) -> Self {
        self.initial_controls.push((port, value));
        self
    }

    /// Validate, spawn the worker, activate the unit and allocate all buffers
    pub fn build(mut self, sample_rate: u32) -> HostResult<Host> {
        let descriptor = self.unit.descriptor().clone();
        descriptor.validate()?;
        for &(port, value) in &self.initial_controls {
            descriptor.check_control_value(port, value)?;
        }

        let (worker, work) = match self.unit.take_work_handler() {
            Some(handler) => {
                let (worker, scheduler) = Worker::spawn(handler)?;
                (Some(worker), Some(scheduler))
            }
            None => (None, None),
        };

        self.unit.activate(sample_rate)?;
        log::info!(
            "Activated '{}' at {}Hz ({} audio in, {} audio out, {} controls)",
            descriptor.name,
            sample_rate,
            descriptor.count(PortKind::AudioIn),
            descriptor.count(PortKind::AudioOut),
            descriptor.control_count()
        );

        let n_in = descriptor.count(PortKind::AudioIn);
        let n_out = descriptor.count(PortKind::AudioOut);
        let latency = LatencyGraph::new(n_in, n_out).with_max_delay(self.max_delay);
        let sizes = ChannelSizes::new(descriptor.control_count(), descriptor.min_event_buffer)
            .with_update_ratio(self.update_ratio);
        let (audio_channel, ui) = channel(sizes);
        let (surface_tx, surface_rx) = if self.surface {
            let (tx, rx) = surface_channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let mut controls: Vec<f32> = descriptor.ports.iter().map(|p| p.default).collect();
        for &(port, value) in &self.initial_controls {
            controls[port] = value;
        }

        let has_event_in = descriptor.count(PortKind::EventIn) > 0;
        let has_event_out = descriptor.count(PortKind::EventOut) > 0;
        let event_buffer = descriptor.min_event_buffer;

        let driver = AudioCycleDriver {
            control_in_ports: descriptor.ports_of(PortKind::ControlIn).map(|(i, _)| i).collect(),
            control_out_ports: descriptor.ports_of(PortKind::ControlOut).map(|(i, _)| i).collect(),
            latency_port: descriptor.latency_port,
            send_time_info: descriptor.send_time_info,
            descriptor,
            unit: Some(self.unit),
            urids: self.urids,
            max_period: self.max_period,
            delay_lines: (0..n_in).map(|_| DelayLine::new(self.max_delay)).collect(),
            audio_in: vec![vec![0.0; self.max_period]; n_in],
            audio_out: vec![vec![0.0; self.max_period]; n_out],
            controls_prev: controls.clone(),
            controls,
            events_in: has_event_in.then(|| EventSequence::with_capacity(event_buffer)),
            events_out: has_event_out.then(|| EventSequence::with_capacity(event_buffer)),
            surface_midi: EventSequence::with_capacity(SURFACE_QUEUE_SIZE * event_len(3)),
            latency: latency.shared(),
            channel: audio_channel,
            surface: surface_rx,
            work,
            transport: TransportTracker::new(),
            warned_oversize: false,
            warned_no_unit: false,
            cycles: 0,
        };

        Ok(Host {
            driver,
            ui,
            latency,
            worker,
            surface: surface_tx,
        })
    }
}

/// Runs one unit per audio cycle
pub struct AudioCycleDriver {
    unit: Option<Box<dyn ProcessingUnit>>,
    descriptor: UnitDescriptor,
    urids: Urids,
    max_period: usize,
    control_in_ports: Vec<usize>,
    control_out_ports: Vec<usize>,
    latency_port: Option<usize>,
    send_time_info: bool,
    delay_lines: Vec<DelayLine>,
    /// Delay-aligned inputs, one per audio input port
    audio_in: Vec<Vec<Sample>>,
    /// Unit output, copied to the hardware after `run`
    audio_out: Vec<Vec<Sample>>,
    /// Control values indexed by port index
    controls: Vec<f32>,
    /// Snapshot taken just before `run`
    controls_prev: Vec<f32>,
    events_in: Option<EventSequence>,
    events_out: Option<EventSequence>,
    surface_midi: EventSequence,
    latency: Arc<LatencyShared>,
    channel: AudioChannel,
    surface: Option<SurfaceReceiver>,
    work: Option<WorkScheduler>,
    transport: TransportTracker,
    warned_oversize: bool,
    warned_no_unit: bool,
    cycles: u64,
}

impl AudioCycleDriver {
    pub fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    pub fn audio_in_count(&self) -> usize {
        self.audio_in.len()
    }

    pub fn audio_out_count(&self) -> usize {
        self.audio_out.len()
    }

    pub fn has_midi_in(&self) -> bool {
        self.events_in.is_some()
    }

    pub fn has_midi_out(&self) -> bool {
        self.events_out.is_some()
    }

    pub fn max_period(&self) -> usize {
        self.max_period
    }

    /// Cycles processed so far (including silenced ones)
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Current value of a control port as seen by the audio thread
    pub fn control(&self, port: usize) -> Option<f32> {
        self.controls.get(port).copied()
    }

    /// Deactivate and hand back the unit; later cycles produce silence
    pub fn take_unit(&mut self) -> Option<Box<dyn ProcessingUnit>> {
        let mut unit = self.unit.take()?;
        unit.deactivate();
        log::info!("Deactivated '{}'", self.descriptor.name);
        Some(unit)
    }

    /// Process one cycle
    pub fn process(&mut self, io: &mut dyn CycleIo) {
        self.cycles += 1;
        let n = io.n_frames();

        if n > self.max_period {
            if !self.warned_oversize {
                self.warned_oversize = true;
                log::warn!(
                    "Period size {} exceeds maximum {}, outputting silence",
                    n,
                    self.max_period
                );
            }
            Self::silence(io);
            return;
        }
        let Some(unit) = self.unit.as_mut() else {
            if !self.warned_no_unit {
                self.warned_no_unit = true;
                log::warn!("No active unit, outputting silence");
            }
            Self::silence(io);
            return;
        };

        if let Some(work) = self.work.as_mut() {
            work.set_freewheel(io.freewheeling());
        }

        // 1. Control changes from the UI, then from the control surface
        while let Some(change) = self.channel.pop_control() {
            let port = change.port as usize;
            if self.control_in_ports.contains(&port) {
                self.controls[port] = change.value;
            }
        }
        self.surface_midi.clear();
        if let Some(surface) = self.surface.as_mut() {
            while let Some(msg) = surface.pop() {
                match msg {
                    SurfaceMessage::Param(change) => {
                        let port = change.port as usize;
                        if self.control_in_ports.contains(&port) {
                            self.controls[port] = change.value;
                            self.channel.push_control(change);
                        }
                    }
                    SurfaceMessage::Midi { len, bytes } => {
                        self.surface_midi.append(0, self.urids.midi_event, &bytes[..len as usize]);
                    }
                }
            }
        }

        // 2. Transport
        let now = io.transport();
        let transport_changed = self.transport.update(&now, n as u32);

        // 3. Event input
        if let Some(seq) = self.events_in.as_mut() {
            seq.clear();
            if transport_changed && self.send_time_info {
                seq.append_position(0, &self.urids, &now.to_position());
            }
            self.channel.drain_events_into(seq);
            for event in self.surface_midi.iter() {
                seq.append(0, event.kind, event.body);
            }
            let midi = self.urids.midi_event;
            io.for_each_midi_in(&mut |time, bytes| {
                seq.append(time, midi, bytes);
            });
        } else {
            // Keep the UI ring from filling up with events nobody consumes
            let mut sink = EventSequence::with_capacity(0);
            self.channel.drain_events_into(&mut sink);
        }
        if let Some(seq) = self.events_out.as_mut() {
            seq.clear();
        }

        // 4. Align inputs and run
        self.controls_prev.copy_from_slice(&self.controls);
        let hw_inputs = io.audio_in_count();
        for (i, (line, aligned)) in self
            .delay_lines
            .iter_mut()
            .zip(self.audio_in.iter_mut())
            .enumerate()
        {
            let aligned = &mut aligned[..n];
            let wanted = self.latency.wanted_delay(i) as usize;
            if i < hw_inputs {
                line.push_and_pull(io.audio_in(i), aligned, wanted);
            } else {
                aligned.fill(0.0);
            }
        }

        {
            let mut ports = PortBuffers::new(n, &self.audio_in, &mut self.audio_out, &mut self.controls)
                .with_events(self.events_in.as_ref(), self.events_out.as_mut())
                .with_work_scheduler(self.work.as_mut());
            unit.run(&mut ports);
        }

        // 5. Worker responses, then hand the outputs to the hardware
        if let Some(work) = self.work.as_mut() {
            let mut ports = PortBuffers::new(n, &self.audio_in, &mut self.audio_out, &mut self.controls)
                .with_events(self.events_in.as_ref(), self.events_out.as_mut());
            work.drain_responses(|body| unit.work_response(body, &mut ports));
        }

        let hw_outputs = io.audio_out_count();
        for (o, rendered) in self.audio_out.iter().enumerate().take(hw_outputs) {
            let out = io.audio_out(o);
            // Only the overlapping prefix of a mis-sized hardware buffer
            let len = out.len().min(n);
            out[..len].copy_from_slice(&rendered[..len]);
            out[len..].fill(0.0);
        }
        for o in self.audio_out.len()..hw_outputs {
            io.audio_out(o).fill(0.0);
        }

        // 6. Control outputs
        for &port in &self.control_out_ports {
            let value = self.controls[port];
            if value == self.controls_prev[port] {
                continue;
            }
            if self.latency_port == Some(port) {
                self.latency.report_unit_latency(value.max(0.0).round() as u32);
            }
            self.channel.push_control(ControlChange::new(port as u32, value));
        }

        // 7. Event output
        io.clear_midi_out();
        if let Some(seq) = self.events_out.as_ref() {
            for event in seq.iter() {
                if event.kind == self.urids.midi_event {
                    io.midi_out(event.offset, event.body);
                }
            }
            self.channel.publish_events(seq);
        }

        // 8. Done
        unit.end_run();
        self.channel.wake_ui();
    }

    fn silence(io: &mut dyn CycleIo) {
        io.clear_midi_out();
        for o in 0..io.audio_out_count() {
            io.audio_out(o).fill(0.0);
        }
    }
}

/// Verify a backend provides one hardware channel per audio port
pub fn check_channel_counts(driver: &AudioCycleDriver, inputs: usize, outputs: usize) -> HostResult<()> {
    if driver.audio_in_count() != inputs {
        return Err(HostError::PortCountMismatch {
            what: "audio inputs",
            unit: driver.audio_in_count(),
            driver: inputs,
        });
    }
    if driver.audio_out_count() != outputs {
        return Err(HostError::PortCountMismatch {
            what: "audio outputs",
            unit: driver.audio_out_count(),
            driver: outputs,
        });
    }
    Ok(())
}
