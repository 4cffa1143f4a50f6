//! Audio backend error types

use thiserror::Error;

use crate::plugin::HostError;

/// Errors that can occur while starting or running an audio backend
#[derive(Error, Debug)]
pub enum AudioError {
    /// Could not reach the audio server
    #[error("Failed to connect to audio server: {0}")]
    ServerUnavailable(String),

    /// Port registration failed
    #[error("Failed to register port '{port}': {reason}")]
    PortRegistration { port: String, reason: String },

    /// Backend configuration problem
    #[error("Audio configuration error: {0}")]
    ConfigError(String),

    /// The requested backend was not compiled in
    #[error("Audio backend '{0}' is not available in this build")]
    BackendUnavailable(String),

    /// Failed to activate/start processing
    #[error("Failed to start audio processing: {0}")]
    StartFailed(String),

    /// Host setup error surfaced while starting
    #[error(transparent)]
    Host(#[from] HostError),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AudioError::PortRegistration {
            port: "in_1".to_string(),
            reason: "name taken".to_string(),
        };
        assert!(err.to_string().contains("in_1"));

        let err: AudioError = HostError::UnitNotFound {
            query: "nope".to_string(),
        }
        .into();
        assert!(err.to_string().contains("nope"));
    }
}
