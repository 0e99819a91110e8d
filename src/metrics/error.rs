use thiserror::Error;

/// Errors raised by the [`super::store::MetricsStore`]. These never reach the
/// Supervisor's lifecycle state machine: a failing store degrades silently,
/// logged but otherwise ignored.
#[derive(Error, Debug)]
pub enum MetricsStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
