//! Per-cycle view of the port buffers handed to [`super::ProcessingUnit::run`]

use crate::engine::{EventSequence, WorkScheduler};
use crate::types::Sample;

/// Buffers for every port of a unit, valid for one `run`
///
/// Audio ports are addressed by their ordinal among ports of the same kind
/// (first audio input is 0), control ports by their descriptor index.
pub struct PortBuffers<'a> {
    n_frames: usize,
    audio_in: &'a [Vec<Sample>],
    audio_out: &'a mut [Vec<Sample>],
    controls: &'a mut [f32],
    events_in: Option<&'a EventSequence>,
    events_out: Option<&'a mut EventSequence>,
    work: Option<&'a mut WorkScheduler>,
}

impl<'a> PortBuffers<'a> {
    /// Build a view over the driver's arenas
    pub fn new(
        n_frames: usize,
        audio_in: &'a [Vec<Sample>],
        audio_out: &'a mut [Vec<Sample>],
        controls: &'a mut [f32],
    ) -> Self {
        Self {
            n_frames,
            audio_in,
            audio_out,
            controls,
            events_in: None,
            events_out: None,
            work: None,
        }
    }

    pub fn with_events(
        mut self,
        events_in: Option<&'a EventSequence>,
        events_out: Option<&'a mut EventSequence>,
    ) -> Self {
        self.events_in = events_in;
        self.events_out = events_out;
        self
    }

    pub fn with_work_scheduler(mut self, work: Option<&'a mut WorkScheduler>) -> Self {
        self.work = work;
        self
    }

    /// Frames in this cycle
    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn audio_in_count(&self) -> usize {
        self.audio_in.len()
    }

    pub fn audio_out_count(&self) -> usize {
        self.audio_out.len()
    }

    /// Aligned input samples of audio input `ordinal`
    pub fn audio_in(&self, ordinal: usize) -> &[Sample] {
        &self.audio_in[ordinal][..self.n_frames]
    }

    pub fn audio_out(&mut self, ordinal: usize) -> &mut [Sample] {
        &mut self.audio_out[ordinal][..self.n_frames]
    }

    /// Borrow an input and an output at the same time
    pub fn audio_io(&mut self, input: usize, output: usize) -> (&[Sample], &mut [Sample]) {
        let n = self.n_frames;
        (&self.audio_in[input][..n], &mut self.audio_out[output][..n])
    }

    /// Current value of control port `index` (input or output)
    pub fn control(&self, index: usize) -> f32 {
        self.controls.get(index).copied().unwrap_or(0.0)
    }

    /// Write a control output
    pub fn set_control(&mut self, index: usize, value: f32) {
        if let Some(slot) = self.controls.get_mut(index) {
            *slot = value;
        }
    }

    pub fn events_in(&self) -> Option<&EventSequence> {
        self.events_in
    }

    pub fn events_out(&mut self) -> Option<&mut EventSequence> {
        self.events_out.as_deref_mut()
    }

    /// Borrow the event input and output at the same time
    pub fn events_io(&mut self) -> (Option<&EventSequence>, Option<&mut EventSequence>) {
        (self.events_in, self.events_out.as_deref_mut())
    }

    /// Queue background work; `false` if the unit has no worker or the ring is full
    pub fn schedule_work(&mut self, request: &[u8]) -> bool {
        match self.work.as_deref_mut() {
            Some(work) => work.schedule(request),
            None => false,
        }
    }
}
