//! Monitor - stereo passthrough that shows transport and MIDI activity
//!
//! Asks the host for transport position events and reflects the last one on
//! its control outputs. Counts note-ons seen on the event input.

use crate::engine::EventKind;
use crate::plugin::{HostResult, PortBuffers, PortDescriptor, ProcessingUnit, UnitDescriptor};
use crate::urid::Urids;

pub const URI: &str = "urn:rtwrap:monitor";

pub const IN_L: usize = 0;
pub const IN_R: usize = 1;
pub const OUT_L: usize = 2;
pub const OUT_R: usize = 3;
pub const EVENTS: usize = 4;
pub const ROLLING: usize = 5;
pub const FRAME: usize = 6;
pub const BPM: usize = 7;
pub const BAR: usize = 8;
pub const NOTES: usize = 9;

pub fn descriptor() -> UnitDescriptor {
    UnitDescriptor::new(URI, "Monitor")
        .with_port(PortDescriptor::audio_in("in_l"))
        .with_port(PortDescriptor::audio_in("in_r"))
        .with_port(PortDescriptor::audio_out("out_l"))
        .with_port(PortDescriptor::audio_out("out_r"))
        .with_port(PortDescriptor::event_in("events"))
        .with_port(PortDescriptor::control_out("rolling"))
        .with_port(PortDescriptor::control_out("frame").with_range(0.0, f32::MAX))
        .with_port(PortDescriptor::control_out("bpm").with_range(0.0, 999.0))
        .with_port(PortDescriptor::control_out("bar").with_range(0.0, f32::MAX))
        .with_port(PortDescriptor::control_out("notes").with_range(0.0, f32::MAX))
        .with_time_info()
}

pub struct Monitor {
    descriptor: UnitDescriptor,
    urids: Urids,
    notes: u32,
}

impl Monitor {
    pub fn new(urids: &Urids) -> Self {
        Self {
            descriptor: descriptor(),
            urids: *urids,
            notes: 0,
        }
    }
}

impl ProcessingUnit for Monitor {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn activate(&mut self, _sample_rate: u32) -> HostResult<()> {
        self.notes = 0;
        Ok(())
    }

    fn run(&mut self, ports: &mut PortBuffers<'_>) {
        for ch in 0..2 {
            let (src, dst) = ports.audio_io(ch, ch);
            dst.copy_from_slice(src);
        }

        let mut position = None;
        if let Some(events) = ports.events_in() {
            for event in events.iter() {
                match event.decode(&self.urids) {
                    EventKind::Position(pos) => position = Some(pos),
                    EventKind::Midi(bytes) if bytes.len() == 3 && bytes[0] & 0xF0 == 0x90 && bytes[2] > 0 => {
                        self.notes += 1;
                    }
                    _ => {}
                }
            }
        }

        if let Some(pos) = position {
            ports.set_control(ROLLING, if pos.speed > 0.0 { 1.0 } else { 0.0 });
            ports.set_control(FRAME, pos.frame as f32);
            if let Some(bb) = pos.bar_beat {
                ports.set_control(BPM, bb.bpm);
                ports.set_control(BAR, bb.bar as f32);
            }
        }
        ports.set_control(NOTES, self.notes as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EventSequence, TransportState};
    use crate::urid::UriMap;

    #[test]
    fn test_reflects_position_and_notes() {
        let urids = Urids::new(&mut UriMap::new());
        let mut unit = Monitor::new(&urids);
        unit.activate(48000).unwrap();

        let mut events = EventSequence::with_capacity(512);
        events.append_position(0, &urids, &TransportState::rolling_at(4800).to_position());
        events.append(3, urids.midi_event, &[0x90, 60, 100]);
        events.append(4, urids.midi_event, &[0x90, 60, 0]);

        let inputs = vec![vec![0.25; 8], vec![0.5; 8]];
        let mut outputs = vec![vec![0.0; 8]; 2];
        let mut controls: Vec<f32> = unit.descriptor().ports.iter().map(|p| p.default).collect();
        let mut ports = PortBuffers::new(8, &inputs, &mut outputs, &mut controls)
            .with_events(Some(&events), None);
        unit.run(&mut ports);

        assert_eq!(outputs, inputs);
        assert_eq!(controls[ROLLING], 1.0);
        assert_eq!(controls[FRAME], 4800.0);
        assert_eq!(controls[NOTES], 1.0, "velocity 0 is a note-off");
    }
}
