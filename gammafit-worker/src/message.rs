//! Messages sent from the worker thread back to the submitter.

use std::time::Duration;

use gammafit_algorithms::Fitter;

use crate::WorkerState;

/// Messages sent from the worker thread.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Batch fit progress, throttled to a coarse wall-clock interval.
    Progress(f32, String),

    /// The job ran to the end or was cancelled between regions.
    ///
    /// `fitter` is the worker's own copy with the job applied; partial
    /// results of a cancelled batch are kept.
    Complete {
        kind: WorkerState,
        fitter: Box<Fitter>,
        elapsed: Duration,
        cancelled: bool,
    },

    /// The job produced no usable result; the submitted fitter is unchanged.
    NoResult { kind: WorkerState, reason: String },
}

impl WorkerMessage {
    /// Whether this message ends a job.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress(..))
    }
}
