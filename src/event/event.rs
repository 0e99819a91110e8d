use crate::metrics::sample::Sample;
use crate::supervisor::state::HostState;

/// Which standard stream a [`Event::LogLine`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One of the three variants delivered on the fleet-wide event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    StateChanged {
        host_name: String,
        state: HostState,
    },
    LogLine {
        host_name: String,
        timestamp: i64,
        line: String,
        stream: LogStream,
    },
    Metrics {
        host_name: String,
        sample: Sample,
    },
}

impl Event {
    pub fn host_name(&self) -> &str {
        match self {
            Event::StateChanged { host_name, .. } => host_name,
            Event::LogLine { host_name, .. } => host_name,
            Event::Metrics { host_name, .. } => host_name,
        }
    }
}
