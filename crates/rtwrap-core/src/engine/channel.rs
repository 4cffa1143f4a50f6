//! Lock-free exchange between the audio thread and the UI/control thread
//!
//! ```text
//!                    ctrl_from_ui  (ControlChange)
//!   ┌──────────┐ ─────────────────────────────────────► ┌──────────────┐
//!   │          │     events_from_ui (frames: urid+body)  │              │
//!   │ UiChannel│ ─────────────────────────────────────► │ AudioChannel │
//!   │ (UI/ctl  │     ctrl_to_ui    (ControlChange)       │ (audio       │
//!   │  thread) │ ◄───────────────────────────────────── │  thread)     │
//!   │          │     events_to_ui  (frames: sequences)   │              │
//!   │          │ ◄───────────────────────────────────── │              │
//!   └──────────┘            WakeSignal ◄── try_notify ── └──────────────┘
//!                                                               ▲
//!   SurfaceSender (console / control surface) ── surface ring ──┘
//! ```
//!
//! UI-bound rings hold [`UPDATE_FREQ_RATIO`] cycles worth of data, so a UI
//! that stalls for that many cycles starts losing updates instead of stalling
//! the audio thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::events::EventSequence;
use crate::ring::{Consumer, FrameRead, Producer, RingBuffer};
use crate::types::{SURFACE_QUEUE_SIZE, UPDATE_FREQ_RATIO};
use crate::urid::Urid;

/// A control port value travelling between threads
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ControlChange {
    /// Descriptor port index
    pub port: u32,
    pub value: f32,
}

impl ControlChange {
    pub fn new(port: u32, value: f32) -> Self {
        Self { port, value }
    }
}

/// Best-effort wake-up from the audio thread
///
/// The waiter polls with a timeout anyway; a notification only shortens the
/// wait. A notification that arrives while the waiter is busy is remembered
/// in a flag so the next wait returns immediately.
pub struct WakeSignal {
    lock: Mutex<()>,
    cond: Condvar,
    pending: AtomicBool,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            cond: Condvar::new(),
            pending: AtomicBool::new(false),
        }
    }

    /// Audio thread: wake the waiter if that doesn't require blocking
    pub fn try_notify(&self) -> bool {
        self.pending.store(true, Ordering::Release);
        match self.lock.try_lock() {
            Ok(_guard) => {
                self.cond.notify_one();
                true
            }
            Err(_) => false,
        }
    }

    /// Control thread: always wake the waiter (used for shutdown)
    pub fn notify(&self) {
        self.pending.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cond.notify_all();
    }

    /// Sleep until notified or `timeout` passed; `true` when notified
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if self.pending.swap(false, Ordering::AcqRel) {
            return true;
        }
        let _guard = match self.cond.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
        self.pending.swap(false, Ordering::AcqRel)
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Ring sizes for a channel pair
#[derive(Debug, Clone, Copy)]
pub struct ChannelSizes {
    pub n_controls: usize,
    pub event_buffer: usize,
    pub update_ratio: usize,
}

impl ChannelSizes {
    pub fn new(n_controls: usize, event_buffer: usize) -> Self {
        Self {
            n_controls,
            event_buffer,
            update_ratio: UPDATE_FREQ_RATIO,
        }
    }

    pub fn with_update_ratio(mut self, ratio: usize) -> Self {
        self.update_ratio = ratio.max(1);
        self
    }

    fn control_capacity(&self) -> usize {
        (self.update_ratio * self.n_controls).max(1)
    }

    fn event_capacity(&self) -> usize {
        (self.update_ratio * self.event_buffer).max(1)
    }
}

/// Create the connected audio and UI halves
pub fn channel(sizes: ChannelSizes) -> (AudioChannel, UiChannel) {
    let (ctrl_to_ui_tx, ctrl_to_ui_rx) = RingBuffer::new(sizes.control_capacity());
    let (ctrl_from_ui_tx, ctrl_from_ui_rx) = RingBuffer::new(sizes.control_capacity());
    let (events_to_ui_tx, events_to_ui_rx) = RingBuffer::new(sizes.event_capacity());
    let (events_from_ui_tx, events_from_ui_rx) = RingBuffer::new(sizes.event_capacity());
    let wake = Arc::new(WakeSignal::new());

    (
        AudioChannel {
            ctrl_to_ui: ctrl_to_ui_tx,
            ctrl_from_ui: ctrl_from_ui_rx,
            events_to_ui: events_to_ui_tx,
            events_from_ui: events_from_ui_rx,
            wake: Arc::clone(&wake),
            scratch: vec![0; sizes.event_buffer].into_boxed_slice(),
        },
        UiChannel {
            ctrl_to_ui: ctrl_to_ui_rx,
            ctrl_from_ui: ctrl_from_ui_tx,
            events_to_ui: events_to_ui_rx,
            events_from_ui: events_from_ui_tx,
            wake,
            scratch: vec![0; sizes.event_buffer],
        },
    )
}

/// Audio-thread half
pub struct AudioChannel {
    ctrl_to_ui: Producer<ControlChange>,
    ctrl_from_ui: Consumer<ControlChange>,
    events_to_ui: Producer<u8>,
    events_from_ui: Consumer<u8>,
    wake: Arc<WakeSignal>,
    scratch: Box<[u8]>,
}

impl AudioChannel {
    /// Next control change sent by the UI
    #[inline]
    pub fn pop_control(&mut self) -> Option<ControlChange> {
        self.ctrl_from_ui.read()
    }

    /// Report a control value to the UI; dropped when the ring is full
    #[inline]
    pub fn push_control(&mut self, change: ControlChange) -> bool {
        self.ctrl_to_ui.write(change)
    }

    /// Move every UI event into `seq` at offset 0; returns how many were appended
    pub fn drain_events_into(&mut self, seq: &mut EventSequence) -> usize {
        let mut appended = 0;
        loop {
            match self.events_from_ui.read_frame(&mut self.scratch) {
                FrameRead::Empty => return appended,
                FrameRead::Discarded(_) => {}
                FrameRead::Complete(len) if len >= 4 => {
                    let mut kind = [0u8; 4];
                    kind.copy_from_slice(&self.scratch[..4]);
                    if seq.append(0, Urid::from_le_bytes(kind), &self.scratch[4..len]) {
                        appended += 1;
                    }
                }
                FrameRead::Complete(_) => {}
            }
        }
    }

    /// Ship the unit's output sequence to the UI as one frame, if it fits
    pub fn publish_events(&mut self, seq: &EventSequence) -> bool {
        if seq.is_empty() {
            return false;
        }
        self.events_to_ui.write_frame(seq.as_bytes())
    }

    /// Does anything wait for the UI?
    pub fn has_ui_data(&self) -> bool {
        self.ctrl_to_ui.read_space() > 0 || self.events_to_ui.read_space() > 0
    }

    /// Best-effort UI wake when there is something to read
    pub fn wake_ui(&self) {
        if self.has_ui_data() {
            self.wake.try_notify();
        }
    }
}

/// UI/control-thread half
pub struct UiChannel {
    ctrl_to_ui: Consumer<ControlChange>,
    ctrl_from_ui: Producer<ControlChange>,
    events_to_ui: Consumer<u8>,
    events_from_ui: Producer<u8>,
    wake: Arc<WakeSignal>,
    scratch: Vec<u8>,
}

impl UiChannel {
    /// Set a control input; `false` if the ring is full
    pub fn send_control(&mut self, port: u32, value: f32) -> bool {
        self.ctrl_from_ui.write(ControlChange::new(port, value))
    }

    /// Send one event to the unit's event input (delivered at offset 0)
    pub fn send_event(&mut self, kind: Urid, body: &[u8]) -> bool {
        self.events_from_ui
            .write_parts(&[&((4 + body.len()) as u32).to_le_bytes(), &kind.to_le_bytes(), body])
    }

    /// Handle every control change reported by the audio thread
    pub fn drain_controls(&mut self, mut handle: impl FnMut(ControlChange)) -> usize {
        let mut count = 0;
        while let Some(change) = self.ctrl_to_ui.read() {
            handle(change);
            count += 1;
        }
        count
    }

    /// Handle every published output sequence (raw bytes, see `EventIter`)
    pub fn drain_events(&mut self, mut handle: impl FnMut(&[u8])) -> usize {
        let mut count = 0;
        loop {
            match self.events_to_ui.read_frame(&mut self.scratch) {
                FrameRead::Empty => return count,
                FrameRead::Discarded(len) => {
                    log::debug!("[UI] Dropping {} byte event frame", len);
                }
                FrameRead::Complete(len) => {
                    handle(&self.scratch[..len]);
                    count += 1;
                }
            }
        }
    }

    /// Wait for the audio thread to signal new data, at most `timeout`
    pub fn wait(&self, timeout: Duration) -> bool {
        self.wake.wait_timeout(timeout)
    }

    /// Handle that can interrupt [`Self::wait`] from another thread
    pub fn waker(&self) -> Arc<WakeSignal> {
        Arc::clone(&self.wake)
    }
}

/// Short message from a control surface
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SurfaceMessage {
    /// Up to three MIDI bytes
    Midi { len: u8, bytes: [u8; 3] },
    /// Parameter change, echoed to the UI once applied
    Param(ControlChange),
}

impl Default for SurfaceMessage {
    fn default() -> Self {
        SurfaceMessage::Param(ControlChange::default())
    }
}

/// Create the control-surface ring
pub fn surface_channel() -> (SurfaceSender, SurfaceReceiver) {
    let (tx, rx) = RingBuffer::new(SURFACE_QUEUE_SIZE);
    (SurfaceSender { tx }, SurfaceReceiver { rx })
}

/// Writing end, owned by the control-surface thread
pub struct SurfaceSender {
    tx: Producer<SurfaceMessage>,
}

impl SurfaceSender {
    /// Queue a MIDI message of 1-3 bytes
    pub fn send_midi(&mut self, bytes: &[u8]) -> bool {
        if bytes.is_empty() || bytes.len() > 3 {
            return false;
        }
        let mut msg = [0u8; 3];
        msg[..bytes.len()].copy_from_slice(bytes);
        self.tx.write(SurfaceMessage::Midi {
            len: bytes.len() as u8,
            bytes: msg,
        })
    }

    pub fn send_param(&mut self, port: u32, value: f32) -> bool {
        self.tx.write(SurfaceMessage::Param(ControlChange::new(port, value)))
    }
}

/// Reading end, owned by the audio driver
pub struct SurfaceReceiver {
    rx: Consumer<SurfaceMessage>,
}

impl SurfaceReceiver {
    #[inline]
    pub fn pop(&mut self) -> Option<SurfaceMessage> {
        self.rx.read()
    }
}
