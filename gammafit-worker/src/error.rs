//! Error types for gammafit-worker.

use thiserror::Error;

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, WorkerError>;

/// Errors reported to the submitting side.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A job is already in flight; the new one was not queued.
    #[error("worker busy: {0} job in flight")]
    Busy(crate::WorkerState),

    /// The worker thread is gone.
    #[error("worker thread disconnected")]
    Disconnected,

    /// The worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}
