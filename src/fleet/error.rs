use thiserror::Error;

use crate::config::error::ConfigError;

/// Errors raised by the Fleet Manager's own operations. Errors internal to a
/// single Supervisor never surface here; they stay in that host's `HostState`.
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("duplicate host name: {0}")]
    DuplicateName(String),

    #[error("unknown host: {0}")]
    NotFound(String),

    #[error("config store error: {0}")]
    Config(#[from] ConfigError),
}
