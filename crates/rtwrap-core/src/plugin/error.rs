//! Error types for hosting a processing unit
//!
//! Everything here is a startup/configuration error. The real-time path never
//! returns errors; it degrades (silence, dropped events) and logs instead.

use thiserror::Error;

/// Errors that can occur while setting up a unit and its host
#[derive(Debug, Error)]
pub enum HostError {
    /// No unit matches the requested index/URI/name
    #[error("No processing unit matches '{query}'")]
    UnitNotFound { query: String },

    /// Unit index out of bounds
    #[error("Unit index {index} out of bounds ({count} units available)")]
    UnitIndexOutOfBounds { index: usize, count: usize },

    /// A port index that does not exist, or has the wrong kind
    #[error("Invalid port {index} on '{unit}': {reason}")]
    InvalidPort {
        unit: String,
        index: usize,
        reason: String,
    },

    /// A control value outside its declared range
    #[error("Value {value} for port '{port}' is outside [{min}, {max}]")]
    ValueOutOfRange {
        port: String,
        value: f32,
        min: f32,
        max: f32,
    },

    /// More than one event port in one direction
    #[error("Unit '{unit}' declares {count} event {direction} ports (at most one supported)")]
    TooManyEventPorts {
        unit: String,
        direction: &'static str,
        count: usize,
    },

    /// The designated latency port is not a control output
    #[error("Latency port {index} of '{unit}' is not a control output")]
    BadLatencyPort { unit: String, index: usize },

    /// Driver channel counts don't match the unit's ports
    #[error("Port count mismatch for {what}: unit has {unit}, driver has {driver}")]
    PortCountMismatch {
        what: &'static str,
        unit: usize,
        driver: usize,
    },

    /// The unit failed to activate
    #[error("Failed to activate unit '{unit}': {reason}")]
    ActivationFailed { unit: String, reason: String },

    /// A helper thread could not be started
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for host setup operations
pub type HostResult<T> = Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HostError::ValueOutOfRange {
            port: "drive".to_string(),
            value: 12.0,
            min: 0.0,
            max: 10.0,
        };
        assert!(err.to_string().contains("drive"));
        assert!(err.to_string().contains("12"));

        let err = HostError::TooManyEventPorts {
            unit: "shaper".to_string(),
            direction: "input",
            count: 2,
        };
        assert!(err.to_string().contains("2 event input ports"));
    }
}
