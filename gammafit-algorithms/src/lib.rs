//! gammafit-algorithms: Peak finding and fitting for gamma spectra.
//!
//! This crate provides the fitting engine:
//! - **Finder** - smoothed-derivative peak candidate search
//! - **SUM4** - closed-form integration with Currie grading
//! - **Hypermet** - parametric peak shape fitted by an [`Optimizer`]
//! - **Peak** - reconciliation of both estimators
//! - **Roi** / **Fitter** - region management and the editing surface
//!

pub mod calibrate;
mod finder;
mod fitter;
mod hypermet;
pub mod optimizer;
mod peak;
mod report;
mod roi;
mod sum4;

pub use calibrate::{energy_calibration, fwhm_calibration, CalibrationPoint};
pub use finder::{Candidate, Finder};
pub use fitter::{merge_candidates, FitProgress, Fitter};
pub use hypermet::{fwhm_to_width, width_to_fwhm, Hypermet, HYPERMET_PARAMS};
pub use optimizer::{
    FitParam, FitReport, LeastSquares, LevenbergMarquardt, Minimum, NelderMead, Optimizer,
    WidthPolicy,
};
pub use peak::{CenterKey, Peak};
pub use roi::{PeakRecord, Roi, RoiRecord, RoiState};
pub use sum4::{CurrieLimits, Sum4, Sum4Edge};

// Re-export core types used throughout the fitting API
pub use gammafit_core::{CancelToken, FitSettings, Histogram, Spectrum};
