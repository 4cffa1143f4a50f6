//! Processing-unit interface
//!
//! A unit is the thing the host runs once per audio cycle. It declares its
//! ports up front in a [`UnitDescriptor`]; the driver validates the
//! descriptor, allocates one buffer per port and hands the unit a
//! [`PortBuffers`] view for every `run`.
//!
//! Units that need to do slow work (file IO, table generation, anything that
//! allocates) hand a [`WorkHandler`] to the host at startup. Requests are
//! scheduled from `run` through [`PortBuffers::schedule_work`], executed on
//! the worker thread, and the responses come back through
//! [`ProcessingUnit::work_response`] before a later cycle's outputs leave the host.

mod buffers;
mod error;

pub use buffers::PortBuffers;
pub use error::{HostError, HostResult};

/// Kind of a unit port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    AudioIn,
    AudioOut,
    ControlIn,
    ControlOut,
    EventIn,
    EventOut,
}

impl PortKind {
    pub fn is_control(self) -> bool {
        matches!(self, PortKind::ControlIn | PortKind::ControlOut)
    }

    pub fn label(self) -> &'static str {
        match self {
            PortKind::AudioIn => "audio in",
            PortKind::AudioOut => "audio out",
            PortKind::ControlIn => "control in",
            PortKind::ControlOut => "control out",
            PortKind::EventIn => "event in",
            PortKind::EventOut => "event out",
        }
    }
}

/// Description of a single port
#[derive(Debug, Clone)]
pub struct PortDescriptor {
    pub kind: PortKind,
    /// Short symbol, unique within the unit
    pub name: String,
    pub default: f32,
    pub min: f32,
    pub max: f32,
    /// Human-readable description
    pub doc: String,
}

impl PortDescriptor {
    pub fn new(kind: PortKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            default: 0.0,
            min: 0.0,
            max: 1.0,
            doc: String::new(),
        }
    }

    pub fn audio_in(name: impl Into<String>) -> Self {
        Self::new(PortKind::AudioIn, name)
    }

    pub fn audio_out(name: impl Into<String>) -> Self {
        Self::new(PortKind::AudioOut, name)
    }

    pub fn control_in(name: impl Into<String>, default: f32) -> Self {
        Self::new(PortKind::ControlIn, name).with_default(default)
    }

    pub fn control_out(name: impl Into<String>) -> Self {
        Self::new(PortKind::ControlOut, name)
    }

    pub fn event_in(name: impl Into<String>) -> Self {
        Self::new(PortKind::EventIn, name)
    }

    pub fn event_out(name: impl Into<String>) -> Self {
        Self::new(PortKind::EventOut, name)
    }

    pub fn with_default(mut self, default: f32) -> Self {
        self.default = default;
        self
    }

    /// Set the value range
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }
}

/// Everything the host needs to know about a unit before running it
#[derive(Debug, Clone)]
pub struct UnitDescriptor {
    /// Globally unique identifier
    pub uri: String,
    /// Display name
    pub name: String,
    /// Ports in index order
    pub ports: Vec<PortDescriptor>,
    /// Smallest event buffer the unit can work with (bytes)
    pub min_event_buffer: usize,
    /// Whether the unit wants transport position events
    pub send_time_info: bool,
    /// Control output that reports the unit's own latency (frames)
    pub latency_port: Option<usize>,
}

impl UnitDescriptor {
    pub fn new(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
            ports: Vec::new(),
            min_event_buffer: crate::types::DEFAULT_EVENT_BUFFER,
            send_time_info: false,
            latency_port: None,
        }
    }

    pub fn with_port(mut self, port: PortDescriptor) -> Self {
        self.ports.push(port);
        self
    }

    pub fn with_min_event_buffer(mut self, bytes: usize) -> Self {
        self.min_event_buffer = bytes;
        self
    }

    pub fn with_time_info(mut self) -> Self {
        self.send_time_info = true;
        self
    }

    /// Mark the most recently added port as the latency port
    pub fn with_latency_port(mut self) -> Self {
        self.latency_port = self.ports.len().checked_sub(1);
        self
    }

    /// Port indices of one kind, in order
    pub fn ports_of(&self, kind: PortKind) -> impl Iterator<Item = (usize, &PortDescriptor)> + '_ {
        self.ports
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.kind == kind)
    }

    pub fn count(&self, kind: PortKind) -> usize {
        self.ports_of(kind).count()
    }

    /// Number of control ports (inputs and outputs)
    pub fn control_count(&self) -> usize {
        self.ports.iter().filter(|p| p.kind.is_control()).count()
    }

    /// Find a port by name
    pub fn port_index(&self, name: &str) -> Option<usize> {
        self.ports.iter().position(|p| p.name == name)
    }

    /// Check the structural rules the host relies on
    pub fn validate(&self) -> HostResult<()> {
        for (kind, direction) in [(PortKind::EventIn, "input"), (PortKind::EventOut, "output")] {
            let count = self.count(kind);
            if count > 1 {
                return Err(HostError::TooManyEventPorts {
                    unit: self.name.clone(),
                    direction,
                    count,
                });
            }
        }
        if let Some(index) = self.latency_port {
            if self.ports.get(index).map(|p| p.kind) != Some(PortKind::ControlOut) {
                return Err(HostError::BadLatencyPort {
                    unit: self.name.clone(),
                    index,
                });
            }
        }
        for (index, port) in self.ports.iter().enumerate() {
            if port.kind.is_control() && port.min > port.max {
                return Err(HostError::InvalidPort {
                    unit: self.name.clone(),
                    index,
                    reason: format!("min {} > max {}", port.min, port.max),
                });
            }
        }
        Ok(())
    }

    /// Check that `value` may be sent to control input `index`
    pub fn check_control_value(&self, index: usize, value: f32) -> HostResult<()> {
        let port = self
            .ports
            .get(index)
            .filter(|p| p.kind == PortKind::ControlIn)
            .ok_or_else(|| HostError::InvalidPort {
                unit: self.name.clone(),
                index,
                reason: "not a control input".to_string(),
            })?;
        if !(port.min..=port.max).contains(&value) {
            return Err(HostError::ValueOutOfRange {
                port: port.name.clone(),
                value,
                min: port.min,
                max: port.max,
            });
        }
        Ok(())
    }
}

/// Result of one unit of background work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    Success,
    /// The response did not fit into the response ring
    NoSpace,
    Error,
}

/// Background half of a unit, owned by the worker thread
pub trait WorkHandler: Send {
    /// Handle one request
    ///
    /// `respond` queues a response for the audio thread and returns `false`
    /// when the response ring is full.
    fn work(&mut self, request: &[u8], respond: &mut dyn FnMut(&[u8]) -> bool) -> WorkStatus;
}

/// The unit driven by the host once per audio cycle
///
/// Everything except `descriptor`/`activate`/`deactivate`/`take_work_handler`
/// is called on the audio thread and must not block or allocate.
pub trait ProcessingUnit: Send {
    fn descriptor(&self) -> &UnitDescriptor;

    /// Prepare for processing at `sample_rate`
    fn activate(&mut self, sample_rate: u32) -> HostResult<()>;

    /// Process one cycle
    fn run(&mut self, ports: &mut PortBuffers<'_>);

    fn deactivate(&mut self) {}

    /// Deliver a response produced by the [`WorkHandler`]
    ///
    /// Runs after `run` and before the outputs leave the host, so `ports`
    /// still holds this cycle's buffers. Work cannot be scheduled from here.
    fn work_response(&mut self, _body: &[u8], _ports: &mut PortBuffers<'_>) {}

    /// Called at the very end of every cycle, after all responses were delivered
    fn end_run(&mut self) {}

    /// Hand the background half to the host (called once, before activation)
    fn take_work_handler(&mut self) -> Option<Box<dyn WorkHandler>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> UnitDescriptor {
        UnitDescriptor::new("urn:test", "test")
            .with_port(PortDescriptor::audio_in("in"))
            .with_port(PortDescriptor::audio_out("out"))
            .with_port(PortDescriptor::control_in("gain", 1.0).with_range(0.0, 2.0))
            .with_port(PortDescriptor::control_out("latency").with_range(0.0, 1000.0))
            .with_latency_port()
            .with_port(PortDescriptor::event_in("midi_in"))
    }

    #[test]
    fn test_descriptor_queries() {
        let d = descriptor();
        assert!(d.validate().is_ok());
        assert_eq!(d.latency_port, Some(3));
        assert_eq!(d.count(PortKind::AudioIn), 1);
        assert_eq!(d.control_count(), 2);
        assert_eq!(d.port_index("gain"), Some(2));
        let controls: Vec<_> = d.ports_of(PortKind::ControlIn).map(|(i, _)| i).collect();
        assert_eq!(controls, vec![2]);
    }

    #[test]
    fn test_two_event_inputs_rejected() {
        let d = descriptor().with_port(PortDescriptor::event_in("second"));
        assert!(matches!(
            d.validate(),
            Err(HostError::TooManyEventPorts { count: 2, .. })
        ));
    }

    #[test]
    fn test_latency_port_must_be_control_out() {
        let mut d = descriptor();
        d.latency_port = Some(2);
        assert!(matches!(d.validate(), Err(HostError::BadLatencyPort { index: 2, .. })));
    }

    #[test]
    fn test_control_value_checks() {
        let d = descriptor();
        assert!(d.check_control_value(2, 1.5).is_ok());
        assert!(matches!(
            d.check_control_value(2, 3.0),
            Err(HostError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            d.check_control_value(3, 0.0),
            Err(HostError::InvalidPort { index: 3, .. })
        ));
        assert!(d.check_control_value(99, 0.0).is_err());
    }
}
