//! Host engine - delay lines, latency graph, worker, cycle driver
//!
//! This module contains the real-time side of the host:
//! - DelayLine: per-input alignment with click-free retuning
//! - LatencyGraph: worst-case capture alignment and latency announcements
//! - Worker: background execution of a unit's slow jobs
//! - AudioCycleDriver: the once-per-callback cycle tying everything together
//! - Channels: lock-free exchange with the UI and control surfaces

mod channel;
mod delay;
mod driver;
mod events;
mod latency;
mod transport;
mod worker;

pub use channel::*;
pub use delay::*;
pub use driver::*;
pub use events::*;
pub use latency::*;
pub use transport::*;
pub use worker::*;
