use std::io::{ErrorKind, Read};

use ssh2::Channel as Ssh2Channel;

use crate::ssh::error::SshError;

/// The non-blocking surface the Supervisor tick loop drives a streaming
/// command channel through. Implemented by [`Channel`] over a real `ssh2`
/// channel, and by a scripted fake in `supervisor::worker`'s tests so the
/// state machine can be exercised without a live host.
pub trait ChannelLike {
    fn try_read_stdout(&mut self) -> Result<Option<String>, SshError>;
    fn try_read_stderr(&mut self) -> Result<Option<String>, SshError>;
    fn try_exit_status(&mut self) -> Option<i32>;
}

/// Handle to a long-running remote command. Reads are always non-blocking:
/// the Supervisor tick loop polls readiness, it never blocks on I/O.
pub struct Channel {
    inner: Ssh2Channel,
    closed: bool,
}

impl Channel {
    pub(crate) fn new(inner: Ssh2Channel) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    /// Returns any stdout bytes currently available, or `None` if none are
    /// ready yet. A transport-level error becomes a [`SshError::ProtocolError`].
    pub fn try_read_stdout(&mut self) -> Result<Option<String>, SshError> {
        Self::try_read(&mut self.inner)
    }

    /// Returns any stderr bytes currently available, or `None` if none are ready yet.
    pub fn try_read_stderr(&mut self) -> Result<Option<String>, SshError> {
        let mut stderr = self.inner.stderr();
        Self::try_read(&mut stderr)
    }

    fn try_read<R: Read>(reader: &mut R) -> Result<Option<String>, SshError> {
        let mut buf = [0u8; 4096];
        match reader.read(&mut buf) {
            Ok(0) => Ok(None),
            Ok(n) => Ok(Some(String::from_utf8_lossy(&buf[..n]).into_owned())),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(SshError::ProtocolError(e.to_string())),
        }
    }

    /// Returns the exit status once the remote process has terminated, or
    /// `None` if it is still running.
    pub fn try_exit_status(&mut self) -> Option<i32> {
        if !self.inner.eof() {
            return None;
        }
        self.inner.exit_status().ok()
    }

    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.inner.close();
        let _ = self.inner.wait_close();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}

impl ChannelLike for Channel {
    fn try_read_stdout(&mut self) -> Result<Option<String>, SshError> {
        Channel::try_read_stdout(self)
    }

    fn try_read_stderr(&mut self) -> Result<Option<String>, SshError> {
        Channel::try_read_stderr(self)
    }

    fn try_exit_status(&mut self) -> Option<i32> {
        Channel::try_exit_status(self)
    }
}
