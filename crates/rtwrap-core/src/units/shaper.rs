//! Shaper - stereo tanh waveshaper with lookahead delay
//!
//! Parameters:
//! - drive: input drive (transfer curve steepness)
//! - gain: output gain
//! - lookahead: dry-signal delay in ms, reported as the unit latency
//!
//! The transfer table is rebuilt on the worker thread whenever `drive`
//! changes; the audio thread keeps using the previous table until the
//! response arrives. MIDI on the event input is passed through unchanged.

use crate::engine::EventSequence;
use crate::plugin::{
    HostError, HostResult, PortBuffers, PortDescriptor, ProcessingUnit, UnitDescriptor, WorkHandler,
    WorkStatus,
};
use crate::types::Sample;
use crate::urid::{Urid, Urids};

pub const URI: &str = "urn:rtwrap:shaper";

/// Points in the transfer table (covers input -1.0..=1.0)
pub const TABLE_SIZE: usize = 256;

/// Longest lookahead (ms)
pub const MAX_LOOKAHEAD_MS: f32 = 20.0;

const REQUEST_LEN: usize = 4;
const RESPONSE_LEN: usize = 4 + TABLE_SIZE * 4;

// Port indices
pub const IN_L: usize = 0;
pub const IN_R: usize = 1;
pub const OUT_L: usize = 2;
pub const OUT_R: usize = 3;
pub const MIDI_IN: usize = 4;
pub const MIDI_OUT: usize = 5;
pub const DRIVE: usize = 6;
pub const GAIN: usize = 7;
pub const LOOKAHEAD: usize = 8;
pub const LEVEL: usize = 9;
pub const LATENCY: usize = 10;

type Table = [f32; TABLE_SIZE];

/// Fill `table` with `tanh(drive * x) / tanh(drive)` over x in -1..=1
pub fn build_table(drive: f32, table: &mut Table) {
    let drive = drive.max(0.01);
    let norm = drive.tanh();
    for (i, slot) in table.iter_mut().enumerate() {
        let x = -1.0 + 2.0 * i as f32 / (TABLE_SIZE - 1) as f32;
        *slot = (drive * x).tanh() / norm;
    }
}

/// Linear interpolation into the table; input is clamped to -1..=1
#[inline]
fn shape(table: &Table, x: f32) -> f32 {
    let pos = (x.clamp(-1.0, 1.0) + 1.0) * 0.5 * (TABLE_SIZE - 1) as f32;
    let i = (pos as usize).min(TABLE_SIZE - 2);
    let frac = pos - i as f32;
    table[i] + (table[i + 1] - table[i]) * frac
}

pub fn descriptor() -> UnitDescriptor {
    UnitDescriptor::new(URI, "Shaper")
        .with_port(PortDescriptor::audio_in("in_l"))
        .with_port(PortDescriptor::audio_in("in_r"))
        .with_port(PortDescriptor::audio_out("out_l"))
        .with_port(PortDescriptor::audio_out("out_r"))
        .with_port(PortDescriptor::event_in("midi_in"))
        .with_port(PortDescriptor::event_out("midi_thru"))
        .with_port(
            PortDescriptor::control_in("drive", 1.0)
                .with_range(0.1, 10.0)
                .with_doc("Input drive"),
        )
        .with_port(
            PortDescriptor::control_in("gain", 1.0)
                .with_range(0.0, 2.0)
                .with_doc("Output gain"),
        )
        .with_port(
            PortDescriptor::control_in("lookahead", 0.0)
                .with_range(0.0, MAX_LOOKAHEAD_MS)
                .with_doc("Lookahead delay (ms)"),
        )
        .with_port(PortDescriptor::control_out("level").with_doc("Output peak"))
        .with_port(
            PortDescriptor::control_out("latency")
                .with_range(0.0, f32::MAX)
                .with_doc("Latency (frames)"),
        )
        .with_latency_port()
}

/// Builds transfer tables on the worker thread
struct TableBuilder;

impl WorkHandler for TableBuilder {
    fn work(&mut self, request: &[u8], respond: &mut dyn FnMut(&[u8]) -> bool) -> WorkStatus {
        let Ok(drive) = <[u8; REQUEST_LEN]>::try_from(request).map(f32::from_le_bytes) else {
            log::warn!("[WORKER] Shaper: malformed request ({} bytes)", request.len());
            return WorkStatus::Error;
        };
        let mut table = [0.0; TABLE_SIZE];
        build_table(drive, &mut table);

        let mut response = [0u8; RESPONSE_LEN];
        response[..4].copy_from_slice(&drive.to_le_bytes());
        for (chunk, value) in response[4..].chunks_exact_mut(4).zip(table.iter()) {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        log::debug!("[WORKER] Shaper: built table for drive {:.2}", drive);

        if respond(&response) {
            WorkStatus::Success
        } else {
            WorkStatus::NoSpace
        }
    }
}

/// Stereo waveshaper unit
pub struct Shaper {
    descriptor: UnitDescriptor,
    midi_event: Urid,
    sample_rate: u32,
    table: Box<Table>,
    /// Drive the current table was built for
    table_drive: f32,
    /// Drive of the last request sent to the worker
    requested_drive: f32,
    builder: Option<TableBuilder>,
    /// Lookahead delay per channel
    delay: [Vec<Sample>; 2],
    write_pos: usize,
}

impl Shaper {
    pub fn new(urids: &Urids) -> Self {
        let descriptor = descriptor();
        let drive = descriptor.ports[DRIVE].default;
        let mut table = Box::new([0.0; TABLE_SIZE]);
        build_table(drive, &mut table);
        Self {
            descriptor,
            midi_event: urids.midi_event,
            sample_rate: 0,
            table,
            table_drive: drive,
            requested_drive: drive,
            builder: Some(TableBuilder),
            delay: [Vec::new(), Vec::new()],
            write_pos: 0,
        }
    }

    /// Drive the active transfer table was built for
    pub fn table_drive(&self) -> f32 {
        self.table_drive
    }

    fn lookahead_frames(&self, ms: f32) -> usize {
        let max = self.delay[0].len().saturating_sub(1);
        ((ms.max(0.0) * self.sample_rate as f32 / 1000.0).round() as usize).min(max)
    }

    fn pass_midi(&self, input: Option<&EventSequence>, output: Option<&mut EventSequence>) {
        let (Some(input), Some(output)) = (input, output) else {
            return;
        };
        for event in input.iter().filter(|e| e.kind == self.midi_event) {
            output.append(event.offset, event.kind, event.body);
        }
    }
}

impl ProcessingUnit for Shaper {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn activate(&mut self, sample_rate: u32) -> HostResult<()> {
        if sample_rate == 0 {
            return Err(HostError::ActivationFailed {
                unit: self.descriptor.name.clone(),
                reason: "sample rate is zero".to_string(),
            });
        }
        self.sample_rate = sample_rate;
        let len = (MAX_LOOKAHEAD_MS * sample_rate as f32 / 1000.0).ceil() as usize + 1;
        self.delay = [vec![0.0; len], vec![0.0; len]];
        self.write_pos = 0;
        Ok(())
    }

    fn run(&mut self, ports: &mut PortBuffers<'_>) {
        let drive = ports.control(DRIVE);
        if drive != self.requested_drive && ports.schedule_work(&drive.to_le_bytes()) {
            self.requested_drive = drive;
        }

        let gain = ports.control(GAIN);
        let lookahead = self.lookahead_frames(ports.control(LOOKAHEAD));
        let len = self.delay[0].len();
        let n = ports.n_frames();
        let mut peak: f32 = 0.0;

        if len > 0 {
            for (channel, (input, output)) in [(IN_L, OUT_L), (IN_R, OUT_R)].into_iter().enumerate() {
                let (src, dst) = ports.audio_io(input - IN_L, output - OUT_L);
                let line = &mut self.delay[channel];
                let mut pos = self.write_pos;
                for (x, y) in src.iter().zip(dst.iter_mut()) {
                    line[pos] = *x;
                    let delayed = line[(pos + len - lookahead) % len];
                    *y = shape(&self.table, delayed) * gain;
                    peak = peak.max(y.abs());
                    pos = (pos + 1) % len;
                }
            }
            self.write_pos = (self.write_pos + n) % len;
        }

        ports.set_control(LEVEL, peak);
        ports.set_control(LATENCY, lookahead as f32);

        let (events_in, events_out) = ports.events_io();
        self.pass_midi(events_in, events_out);
    }

    fn deactivate(&mut self) {
        for line in &mut self.delay {
            line.fill(0.0);
        }
    }

    fn work_response(&mut self, body: &[u8], _ports: &mut PortBuffers<'_>) {
        if body.len() != RESPONSE_LEN {
            return;
        }
        let value_at = |at: usize| f32::from_le_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]]);
        for (i, slot) in self.table.iter_mut().enumerate() {
            *slot = value_at(4 + i * 4);
        }
        self.table_drive = value_at(0);
    }

    fn take_work_handler(&mut self) -> Option<Box<dyn WorkHandler>> {
        self.builder
            .take()
            .map(|builder| Box::new(builder) as Box<dyn WorkHandler>)
    }
}
