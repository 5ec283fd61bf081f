//! Long-running operations the worker accepts.

use gammafit_algorithms::Fitter;
use gammafit_core::CancelToken;

use crate::WorkerState;

/// A long operation on a fitter copy.
///
/// Region arguments name a region by its left channel.
#[derive(Debug, Clone, PartialEq)]
pub enum FitJob {
    /// Rebuild the regions and fit them all.
    Fit,
    Refit { roi: usize },
    AddPeak { left: usize, right: usize },
    AdjustBounds { roi: usize, left: usize, right: usize },
    AdjustLb { roi: usize, left: usize, right: usize },
    AdjustRb { roi: usize, left: usize, right: usize },
    RemovePeaks { centers: Vec<f64> },
}

impl FitJob {
    /// Worker state while this job runs.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        match self {
            Self::Fit => WorkerState::Fit,
            Self::Refit { .. } => WorkerState::Refit,
            Self::AddPeak { .. } => WorkerState::AddPeak,
            Self::AdjustBounds { .. } => WorkerState::AdjustBounds,
            Self::AdjustLb { .. } => WorkerState::AdjustLb,
            Self::AdjustRb { .. } => WorkerState::AdjustRb,
            Self::RemovePeaks { .. } => WorkerState::RemovePeaks,
        }
    }

    /// Applies a single-region job. Returns whether it changed anything.
    ///
    /// Batch fits go through [`Fitter::auto_fit`] with a progress observer
    /// instead.
    pub(crate) fn apply(&self, fitter: &mut Fitter, cancel: &CancelToken) -> bool {
        match self {
            Self::Fit => {
                fitter.find_regions(cancel);
                fitter.auto_fit(cancel, |_| {}) > 0
            }
            Self::Refit { roi } => fitter.refit_roi(*roi, cancel),
            Self::AddPeak { left, right } => fitter.add_peak(*left, *right, cancel),
            Self::AdjustBounds { roi, left, right } => {
                fitter.adjust_bounds(*roi, *left, *right, cancel)
            }
            Self::AdjustLb { roi, left, right } => fitter.adjust_lb(*roi, *left, *right, cancel),
            Self::AdjustRb { roi, left, right } => fitter.adjust_rb(*roi, *left, *right, cancel),
            Self::RemovePeaks { centers } => fitter.remove_peaks(centers, cancel),
        }
    }
}
