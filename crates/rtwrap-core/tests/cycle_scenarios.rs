//! End-to-end cycle scenarios: driver, units, channels and latency together

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rtwrap_core::audio::{
    AudioBackend, AudioConfig, BufferCycle, CycleIo, DummyLatencyPorts, LatencyControl, StopFlag,
};
use rtwrap_core::engine::{EventKind, HostBuilder, TransportState};
use rtwrap_core::plugin::{
    HostResult, PortBuffers, PortDescriptor, ProcessingUnit, UnitDescriptor, WorkHandler, WorkStatus,
};
use rtwrap_core::units::{monitor, shaper};
use rtwrap_core::urid::{UriMap, Urids};
use rtwrap_core::{LatencyRange, Sample};

const SR: u32 = 48000;

fn urids() -> Urids {
    // RUST_LOG=debug shows the driver's warnings for a failing scenario
    let _ = env_logger::builder().is_test(true).try_init();
    Urids::new(&mut UriMap::new())
}

/// Records the offsets of position events seen in every cycle
struct PositionRecorder {
    descriptor: UnitDescriptor,
    urids: Urids,
    seen: Arc<Mutex<Vec<Vec<u32>>>>,
}

impl ProcessingUnit for PositionRecorder {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn activate(&mut self, _sample_rate: u32) -> HostResult<()> {
        Ok(())
    }

    fn run(&mut self, ports: &mut PortBuffers<'_>) {
        let mut offsets = Vec::new();
        if let Some(events) = ports.events_in() {
            for event in events.iter() {
                if let EventKind::Position(_) = event.decode(&self.urids) {
                    offsets.push(event.offset);
                }
            }
        }
        self.seen.lock().unwrap().push(offsets);
    }
}

#[test]
fn test_transport_start_sends_one_position_event() {
    let urids = urids();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let unit = PositionRecorder {
        descriptor: UnitDescriptor::new("urn:test:recorder", "recorder")
            .with_port(PortDescriptor::event_in("events"))
            .with_time_info(),
        urids,
        seen: Arc::clone(&seen),
    };
    let mut host = HostBuilder::new(Box::new(unit), urids).build(SR).unwrap();

    let n = 256;
    let mut io = BufferCycle::new(0, 0, n);
    io.set_transport(TransportState::stopped_at(0));
    for _ in 0..3 {
        host.driver.process(&mut io);
    }
    io.set_transport(TransportState::rolling_at(0));
    for _ in 0..3 {
        host.driver.process(&mut io);
        io.advance_transport();
    }

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 6);
    assert!(seen[..3].iter().all(|cycle| cycle.is_empty()));
    assert_eq!(seen[3], vec![0]);
    assert!(seen[4..].iter().all(|cycle| cycle.is_empty()));
}

#[test]
fn test_oversized_block_outputs_silence() {
    let urids = urids();
    let mut host = HostBuilder::new(Box::new(monitor::Monitor::new(&urids)), urids)
        .with_max_period(64)
        .build(SR)
        .unwrap();

    let mut io = BufferCycle::new(2, 2, 128);
    io.input_mut(0).fill(1.0);
    io.audio_out(0).fill(1.0);
    io.audio_out(1).fill(1.0);
    io.midi_out(0, &[0x90, 1, 1]);

    host.driver.process(&mut io);
    assert!(io.output(0).iter().chain(io.output(1)).all(|&s| s == 0.0));
    assert_eq!(io.midi_out_events().count(), 0);

    // A fitting block is processed normally afterwards
    io.set_n_frames(64);
    io.input_mut(0).fill(0.5);
    host.driver.process(&mut io);
    assert!(io.output(0).iter().all(|&s| s == 0.5));
}

/// Asks its worker for a level each cycle and writes the answer to its output
struct Stamper {
    descriptor: UnitDescriptor,
    handler: Option<Box<dyn WorkHandler>>,
}

struct Echo;

impl WorkHandler for Echo {
    fn work(&mut self, request: &[u8], respond: &mut dyn FnMut(&[u8]) -> bool) -> WorkStatus {
        if respond(request) {
            WorkStatus::Success
        } else {
            WorkStatus::NoSpace
        }
    }
}

impl ProcessingUnit for Stamper {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn activate(&mut self, _sample_rate: u32) -> HostResult<()> {
        Ok(())
    }

    fn run(&mut self, ports: &mut PortBuffers<'_>) {
        ports.audio_out(0).fill(0.0);
        ports.schedule_work(&0.75f32.to_le_bytes());
    }

    fn work_response(&mut self, body: &[u8], ports: &mut PortBuffers<'_>) {
        if let Ok(bytes) = <[u8; 4]>::try_from(body) {
            ports.audio_out(0).fill(f32::from_le_bytes(bytes));
        }
    }

    fn take_work_handler(&mut self) -> Option<Box<dyn WorkHandler>> {
        self.handler.take()
    }
}

#[test]
fn test_work_response_amends_same_cycle_output() {
    let urids = urids();
    let unit = Stamper {
        descriptor: UnitDescriptor::new("urn:test:stamper", "stamper")
            .with_port(PortDescriptor::audio_out("out")),
        handler: Some(Box::new(Echo)),
    };
    let mut host = HostBuilder::new(Box::new(unit), urids).build(SR).unwrap();

    let mut io = BufferCycle::new(0, 1, 32);
    // Freewheeling runs the request inside `run`, so the response is
    // already waiting when the cycle drains responses
    io.set_freewheel(true);
    host.driver.process(&mut io);
    assert!(io.output(0).iter().all(|&s| s == 0.75));
}

/// Hardware that hands out shorter output buffers than the cycle length
struct ShortOutputs {
    n_frames: usize,
    input: Vec<Sample>,
    outputs: Vec<Vec<Sample>>,
}

impl CycleIo for ShortOutputs {
    fn n_frames(&self) -> usize {
        self.n_frames
    }

    fn audio_in_count(&self) -> usize {
        2
    }

    fn audio_out_count(&self) -> usize {
        self.outputs.len()
    }

    fn audio_in(&self, _channel: usize) -> &[Sample] {
        &self.input
    }

    fn audio_out(&mut self, channel: usize) -> &mut [Sample] {
        &mut self.outputs[channel]
    }

    fn transport(&self) -> TransportState {
        TransportState::stopped_at(0)
    }

    fn for_each_midi_in(&self, _visit: &mut dyn FnMut(u32, &[u8])) {}

    fn midi_out(&mut self, _time: u32, _bytes: &[u8]) -> bool {
        false
    }

    fn clear_midi_out(&mut self) {}
}

#[test]
fn test_short_output_buffers_get_matching_prefix() {
    let urids = urids();
    let mut host = HostBuilder::new(Box::new(monitor::Monitor::new(&urids)), urids)
        .build(SR)
        .unwrap();
    let mut io = ShortOutputs {
        n_frames: 64,
        input: vec![0.5; 64],
        outputs: vec![vec![1.0; 32], vec![1.0; 32]],
    };

    host.driver.process(&mut io);
    assert!(io.outputs.iter().flatten().all(|&s| s == 0.5));
}

#[test]
fn test_drive_change_goes_through_worker() {
    let urids = urids();
    let mut host = HostBuilder::new(Box::new(shaper::Shaper::new(&urids)), urids)
        .build(SR)
        .unwrap();
    assert!(host.worker.is_some());

    let n = 64;
    let mut io = BufferCycle::new(2, 2, n);
    io.input_mut(0).fill(0.5);
    io.input_mut(1).fill(0.5);

    host.driver.process(&mut io);
    let before = io.output(0)[n - 1];
    assert!((before - 0.5f32.tanh() / 1.0f32.tanh()).abs() < 1e-3);

    assert!(host.ui.send_control(shaper::DRIVE as u32, 5.0));
    let expected = 2.5f32.tanh() / 5.0f32.tanh();
    let mut cycles = 0;
    loop {
        host.driver.process(&mut io);
        cycles += 1;
        if (io.output(0)[n - 1] - expected).abs() < 1e-3 {
            break;
        }
        assert!(cycles < 500, "worker response never arrived");
        thread::sleep(Duration::from_millis(1));
    }
    // The table swap lands after the cycle that scheduled it
    assert!(cycles >= 2);
    assert_eq!(host.driver.control(shaper::DRIVE), Some(5.0));
}

#[test]
fn test_latency_port_reaches_ui_and_graph() {
    let urids = urids();
    let mut host = HostBuilder::new(Box::new(shaper::Shaper::new(&urids)), urids)
        .with_control(shaper::LOOKAHEAD, 1.0)
        .build(SR)
        .unwrap();

    let mut ports = DummyLatencyPorts::new(2, 2, &[10, 30], 5);
    host.latency.on_graph_changed(&ports);

    let mut io = BufferCycle::new(2, 2, 128);
    host.driver.process(&mut io);

    let mut changes = Vec::new();
    host.ui.drain_controls(|change| changes.push((change.port as usize, change.value)));
    assert!(changes.contains(&(shaper::LATENCY, 48.0)));

    assert!(host.latency.sync_unit_latency());
    assert_eq!(host.latency.unit_latency(), 48);
    host.latency.recompute_all(&mut ports);
    assert_eq!(ports.announced_capture(0), Some(LatencyRange::exact(30 + 48)));
    assert_eq!(ports.announced_playback(0), Some(LatencyRange::exact(5 + 20 + 48)));

    // Unchanged latency does not raise the flag again
    host.driver.process(&mut io);
    assert!(!host.latency.sync_unit_latency());
}

#[test]
fn test_inputs_are_aligned_to_worst_capture() {
    let urids = urids();
    let mut host = HostBuilder::new(Box::new(monitor::Monitor::new(&urids)), urids)
        .build(SR)
        .unwrap();
    let ports = DummyLatencyPorts::new(2, 2, &[0, 10], 0);
    let mut control = LatencyControl::new(host.latency, Box::new(ports));
    control.prime();
    assert_eq!(control.report().input_delays, vec![10, 0]);

    let n = 32;
    let mut io = BufferCycle::new(2, 2, n);
    // First cycle crossfades to the new delay
    host.driver.process(&mut io);

    io.input_mut(0)[0] = 1.0;
    io.input_mut(1)[0] = 1.0;
    host.driver.process(&mut io);

    let peak = |s: &[f32]| s.iter().position(|&v| v > 0.5);
    assert_eq!(peak(io.output(1)), Some(0));
    assert_eq!(peak(io.output(0)), Some(10));
}

#[test]
fn test_ui_surface_and_hardware_events() {
    let urids = urids();
    let mut host = HostBuilder::new(Box::new(shaper::Shaper::new(&urids)), urids)
        .with_surface()
        .build(SR)
        .unwrap();
    let mut surface = host.surface.take().unwrap();

    assert!(surface.send_param(shaper::GAIN as u32, 0.5));
    assert!(surface.send_midi(&[0xB0, 7, 64]));
    assert!(host.ui.send_event(urids.midi_event, &[0x90, 60, 90]));

    let mut io = BufferCycle::new(2, 2, 64);
    io.push_midi_in(12, &[0x80, 60, 0]);
    host.driver.process(&mut io);

    assert_eq!(host.driver.control(shaper::GAIN), Some(0.5));
    let mut echoed = Vec::new();
    host.ui.drain_controls(|change| echoed.push(change.port as usize));
    assert!(echoed.contains(&shaper::GAIN));

    // UI and surface MIDI at offset 0, hardware MIDI keeps its offset
    let out: Vec<(u32, Vec<u8>)> = io.midi_out_events().map(|(t, b)| (t, b.to_vec())).collect();
    assert_eq!(out.len(), 3);
    assert!(out.contains(&(0, vec![0x90, 60, 90])));
    assert!(out.contains(&(0, vec![0xB0, 7, 64])));
    assert!(out.contains(&(12, vec![0x80, 60, 0])));

    // The thru sequence is also published to the UI
    let mut frames = 0;
    host.ui.drain_events(|_| frames += 1);
    assert!(frames > 0);
}

#[test]
fn test_dummy_backend_runs_and_returns_driver() {
    let urids = urids();
    let config = AudioConfig::dummy().with_period(64).with_capture_latency(vec![0, 16]);
    let backend = AudioBackend::open(&config).unwrap();
    let host = HostBuilder::new(Box::new(shaper::Shaper::new(&urids)), urids)
        .with_control(shaper::LOOKAHEAD, 0.5)
        .build(backend.sample_rate())
        .unwrap();

    let handle = backend.start(host.driver, host.latency, StopFlag::new()).unwrap();
    assert_eq!(handle.client_name(), "rtwrap");
    assert_eq!(handle.latency_report().input_delays, vec![16, 0]);

    let mut synced = false;
    for _ in 0..200 {
        thread::sleep(Duration::from_millis(5));
        if handle.sync_latency() {
            synced = true;
            break;
        }
    }
    assert!(synced, "latency port change was never picked up");
    assert_eq!(handle.latency_report().unit_latency, 24);

    let mut driver = handle.stop().unwrap();
    assert!(driver.cycles() > 0);
    assert!(driver.take_unit().is_some());
}
