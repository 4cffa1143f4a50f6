//! Common types and sizing constants for the host runtime
//!
//! Every buffer touched by the audio thread is sized from these constants at
//! startup, so nothing on the real-time path ever has to grow.

/// Audio sample type (32-bit float, as delivered by the audio driver)
pub type Sample = f32;

/// Frame count type used for latencies and cycle sizes
pub type Frames = u32;

/// Default sample rate when the backend doesn't dictate one (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Largest block the driver will process (frames per cycle)
///
/// Bigger periods are rejected per-cycle with silence.
pub const MAX_PERIOD: usize = 8192;

/// Size of each latency-compensation delay line (frames)
///
/// 4s at 48kHz plus one slot, so a wanted delay of 192000 is still representable.
pub const MAX_DELAY: usize = 192_001;

/// Crossfade length when a delay line is retuned (frames)
pub const FADE_LEN: usize = 16;

/// Maximum number of audio cycles per UI refresh
///
/// UI-bound rings are sized so a stalled UI can miss this many cycles
/// before updates start being dropped.
pub const UPDATE_FREQ_RATIO: usize = 60;

/// Default UI/control loop refresh rate (Hz)
pub const UI_UPDATE_FPS: u32 = 25;

/// Byte capacity of each worker ring (requests and responses)
pub const WORKER_RING_SIZE: usize = 4096;

/// Largest single worker request or response payload (bytes)
pub const WORKER_MAX_MESSAGE: usize = 4096;

/// Default event-sequence capacity when a unit doesn't ask for more (bytes)
pub const DEFAULT_EVENT_BUFFER: usize = 8192;

/// Capacity of the control-surface ring (messages)
pub const SURFACE_QUEUE_SIZE: usize = 256;

/// Inclusive latency range in frames, as reported by the audio driver
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyRange {
    pub min: Frames,
    pub max: Frames,
}

impl LatencyRange {
    /// Create a new range
    pub const fn new(min: Frames, max: Frames) -> Self {
        Self { min, max }
    }

    /// A range where min and max are the same value
    pub const fn exact(frames: Frames) -> Self {
        Self {
            min: frames,
            max: frames,
        }
    }

    /// Shift both ends of the range by `frames`
    #[inline]
    pub fn offset(self, frames: Frames) -> Self {
        Self {
            min: self.min.saturating_add(frames),
            max: self.max.saturating_add(frames),
        }
    }
}
