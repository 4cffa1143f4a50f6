//! Audio backends for the cycle driver
//!
//! - **Linux + `jack-backend`**: native JACK with per-port latency reporting
//! - **Everywhere**: a dummy clock backend (no server, silent inputs)
//!
//! # Example Usage
//!
//! ```ignore
//! use rtwrap_core::audio::{AudioBackend, AudioConfig, StopFlag};
//! use rtwrap_core::engine::HostBuilder;
//!
//! let backend = AudioBackend::open(&AudioConfig::dummy())?;
//! let host = HostBuilder::new(unit, urids).build(backend.sample_rate())?;
//! let handle = backend.start(host.driver, host.latency, StopFlag::new())?;
//!
//! // Control thread
//! handle.sync_latency();
//! let driver = handle.stop();
//! ```

mod backend;
mod config;
mod dummy;
mod error;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod jack_backend;

pub use backend::{
    AudioBackend, AudioHandle, CycleIo, LatencyControl, LatencyPorts, LatencyReport, SharedLatency,
    StopFlag,
};
pub use config::{AudioConfig, AutoConnect, BackendKind, DEFAULT_PERIOD};
pub use dummy::{BufferCycle, DummyBackend, DummyHandle, DummyLatencyPorts};
pub use error::{AudioError, AudioResult};

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use jack_backend::{JackAudioHandle, JackBackend};
