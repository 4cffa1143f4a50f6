//! Control loop - the "UI" side of the host
//!
//! Runs on the main thread at the configured rate. Between ticks it sleeps on
//! the channel's wake signal, so control output changes are picked up as soon
//! as the audio thread publishes them, but never more often than `fps`.

use std::time::{Duration, Instant};

use rtwrap_core::audio::{AudioHandle, StopFlag};
use rtwrap_core::engine::{ControlChange, EventIter, UiChannel};
use rtwrap_core::plugin::{PortKind, UnitDescriptor};
use rtwrap_core::urid::Urids;

/// Last known value of every control port
pub struct PortMonitor {
    names: Vec<String>,
    values: Vec<Option<f32>>,
    /// Print control output changes to stdout
    print: bool,
}

impl PortMonitor {
    pub fn new(descriptor: &UnitDescriptor, print: bool) -> Self {
        Self {
            names: descriptor.ports.iter().map(|p| p.name.clone()).collect(),
            values: descriptor
                .ports
                .iter()
                .map(|p| (p.kind == PortKind::ControlIn).then_some(p.default))
                .collect(),
            print,
        }
    }

    /// Record a change; returns `true` when the value is new
    pub fn apply(&mut self, change: ControlChange) -> bool {
        let Some(slot) = self.values.get_mut(change.port as usize) else {
            return false;
        };
        if *slot == Some(change.value) {
            return false;
        }
        *slot = Some(change.value);
        if self.print {
            println!("{} = {}", self.names[change.port as usize], change.value);
        }
        true
    }

    pub fn value(&self, port: usize) -> Option<f32> {
        self.values.get(port).copied().flatten()
    }
}

/// Drain everything the audio thread published
pub fn drain(ui: &mut UiChannel, monitor: &mut PortMonitor, urids: &Urids) -> usize {
    let changed = ui.drain_controls(|change| {
        monitor.apply(change);
    });
    ui.drain_events(|bytes| {
        for event in EventIter::new(bytes) {
            if event.kind == urids.midi_event {
                log::debug!("[UI] MIDI out @{}: {:02x?}", event.offset, event.body);
            }
        }
    });
    changed
}

/// Run until `stop` is set
pub fn run(
    handle: &AudioHandle,
    ui: &mut UiChannel,
    monitor: &mut PortMonitor,
    urids: &Urids,
    fps: u32,
    stop: &StopFlag,
) {
    let frame = Duration::from_secs_f64(1.0 / f64::from(fps.max(1)));
    let mut next_tick = Instant::now();

    while !stop.is_stopped() {
        let now = Instant::now();
        if now < next_tick {
            ui.wait(next_tick - now);
            continue;
        }
        next_tick = now + frame;

        drain(ui, monitor, urids);
        if handle.sync_latency() {
            let report = handle.latency_report();
            log::info!(
                "[LATENCY] Unit latency {} frames, worst capture {} frames, input delays {:?}",
                report.unit_latency,
                report.worst_capture,
                report.input_delays
            );
        }
    }
}
