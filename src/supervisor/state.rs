/// The six states a Supervisor's managed process can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Disconnected,
    Connecting,
    Running,
    Stopped,
    Error,
    External,
}

/// Mutable runtime state owned exclusively by one host's Supervisor, and the
/// payload of every `StateChanged` event.
#[derive(Debug, Clone, PartialEq)]
pub struct HostState {
    pub host_name: String,
    pub status: Status,
    pub pid: Option<u32>,
    pub uptime_s: u64,
    pub restarts_count: u64,
    pub last_restart_time: Option<i64>,
    pub last_error: Option<String>,
    pub backoff_s: u64,
}

impl HostState {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            status: Status::Disconnected,
            pid: None,
            uptime_s: 0,
            restarts_count: 0,
            last_restart_time: None,
            last_error: None,
            backoff_s: 5,
        }
    }

    /// Enforces the invariant that a non-Running host reports no PID and no uptime.
    pub fn set_status(&mut self, status: Status) {
        self.status = status;
        if status != Status::Running {
            self.pid = None;
            self.uptime_s = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_running_status_clears_pid_and_uptime() {
        let mut state = HostState::new("h1");
        state.pid = Some(42);
        state.uptime_s = 100;
        state.set_status(Status::Stopped);
        assert_eq!(state.pid, None);
        assert_eq!(state.uptime_s, 0);
    }
}
