//! Audio backend configuration
//!
//! Selects the backend and carries the settings each backend needs. The
//! dummy backend has no hardware to ask, so its sample rate, period and port
//! latencies come from here as well.

use serde::{Deserialize, Serialize};

use crate::types::DEFAULT_SAMPLE_RATE;

/// Default period of the dummy backend (frames)
pub const DEFAULT_PERIOD: u32 = 256;

/// Which audio backend drives the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// JACK server (requires the `jack-backend` feature)
    Jack,
    /// Internal clock thread with silent inputs, no server needed
    Dummy,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(all(target_os = "linux", feature = "jack-backend")) {
            BackendKind::Jack
        } else {
            BackendKind::Dummy
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jack" => Ok(BackendKind::Jack),
            "dummy" => Ok(BackendKind::Dummy),
            other => Err(format!("unknown backend '{}' (expected jack or dummy)", other)),
        }
    }
}

/// Which physical ports to connect to after activation
///
/// Mirrors the classic bit mask: 1 = audio inputs, 2 = audio outputs, 4 = MIDI input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoConnect {
    pub audio_in: bool,
    pub audio_out: bool,
    pub midi_in: bool,
}

impl AutoConnect {
    pub fn from_mask(mask: u8) -> Self {
        Self {
            audio_in: mask & 1 != 0,
            audio_out: mask & 2 != 0,
            midi_in: mask & 4 != 0,
        }
    }

    pub fn any(&self) -> bool {
        self.audio_in || self.audio_out || self.midi_in
    }
}

/// Configuration for the audio backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Client name registered with the server (may be uniquified by JACK)
    pub client_name: String,

    pub backend: BackendKind,

    /// Dummy backend sample rate
    pub sample_rate: u32,

    /// Dummy backend period (frames per cycle)
    pub period: u32,

    /// Dummy backend capture latency per input (frames); missing entries are 0
    pub capture_latency: Vec<u32>,

    /// Dummy backend playback latency of every output (frames)
    pub playback_latency: u32,

    /// Dummy backend transport starts rolling
    pub transport_rolling: bool,

    pub autoconnect: AutoConnect,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            client_name: "rtwrap".to_string(),
            backend: BackendKind::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            period: DEFAULT_PERIOD,
            capture_latency: Vec::new(),
            playback_latency: 0,
            transport_rolling: false,
            autoconnect: AutoConnect::default(),
        }
    }
}

impl AudioConfig {
    /// Config for the dummy backend
    pub fn dummy() -> Self {
        Self {
            backend: BackendKind::Dummy,
            ..Default::default()
        }
    }

    /// Set the client name
    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the dummy sample rate
    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = rate;
        self
    }

    /// Set the dummy period in frames
    pub fn with_period(mut self, frames: u32) -> Self {
        self.period = frames;
        self
    }

    /// Set per-input capture latencies for the dummy backend
    pub fn with_capture_latency(mut self, frames: Vec<u32>) -> Self {
        self.capture_latency = frames;
        self
    }

    pub fn with_autoconnect(mut self, autoconnect: AutoConnect) -> Self {
        self.autoconnect = autoconnect;
        self
    }

    /// Duration of one dummy period in milliseconds
    pub fn period_ms(&self) -> f32 {
        (self.period as f32 / self.sample_rate.max(1) as f32) * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_from_str() {
        assert_eq!("JACK".parse::<BackendKind>(), Ok(BackendKind::Jack));
        assert_eq!("dummy".parse::<BackendKind>(), Ok(BackendKind::Dummy));
        assert!("alsa".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_autoconnect_mask() {
        let a = AutoConnect::from_mask(5);
        assert!(a.audio_in && !a.audio_out && a.midi_in);
        assert!(!AutoConnect::from_mask(0).any());
    }

    #[test]
    fn test_builder() {
        let config = AudioConfig::dummy()
            .with_sample_rate(44100)
            .with_period(441)
            .with_capture_latency(vec![10, 20]);
        assert_eq!(config.backend, BackendKind::Dummy);
        assert!((config.period_ms() - 10.0).abs() < 1e-3);
        assert_eq!(config.capture_latency, vec![10, 20]);
    }
}
