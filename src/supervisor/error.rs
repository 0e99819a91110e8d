use thiserror::Error;

use crate::metrics::error::MetricsStoreError;
use crate::ssh::error::SshError;

/// Error taxonomy for the Supervisor state machine. `MetricsError`/`StoreError`
/// never affect `HostState`; they are logged and swallowed by the caller.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("authentication error: {0}")]
    AuthError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("precondition not met: {0}")]
    PreconditionError(String),

    #[error("metrics sampling error: {0}")]
    MetricsError(String),

    #[error("metrics store error: {0}")]
    StoreError(#[from] MetricsStoreError),
}

impl From<SshError> for SupervisorError {
    fn from(value: SshError) -> Self {
        match value {
            SshError::AuthError(m) => SupervisorError::AuthError(m),
            SshError::KeyError(m) => SupervisorError::AuthError(m),
            SshError::NetworkError(m) => SupervisorError::NetworkError(m),
            SshError::ProtocolError(m) => SupervisorError::ProtocolError(m),
            SshError::Io(e) => SupervisorError::ProtocolError(e.to_string()),
        }
    }
}
