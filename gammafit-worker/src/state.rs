//! Worker state machine.

use std::fmt;

/// What the worker thread is doing.
///
/// The worker moves from `Idle` to one job state and back; it never
/// holds two jobs at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerState {
    #[default]
    Idle,
    Fit,
    Refit,
    AddPeak,
    AdjustBounds,
    AdjustLb,
    AdjustRb,
    RemovePeaks,
}

impl WorkerState {
    #[must_use]
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Fit => "fit",
            Self::Refit => "refit",
            Self::AddPeak => "add-peak",
            Self::AdjustBounds => "adjust-bounds",
            Self::AdjustLb => "adjust-lb",
            Self::AdjustRb => "adjust-rb",
            Self::RemovePeaks => "remove-peaks",
        };
        f.write_str(name)
    }
}
