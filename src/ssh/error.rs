use thiserror::Error;

/// Errors that originate at the transport layer, surfaced by [`super::session::Session`].
/// These map directly onto the taxonomy's connection-time kinds; `ProtocolError`
/// additionally covers unexpected channel behavior once a session is open.
#[derive(Error, Debug)]
pub enum SshError {
    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("{0}")]
    KeyError(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
