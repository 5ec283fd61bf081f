//! gammafit-core: Core value types for gamma spectrum peak fitting.
//!
//! This crate provides the foundational types shared by the finder,
//! the peak estimators and the fitter: uncertain values, curve families
//! and calibrations, spectra, fit settings and cancellation.
//!

pub mod calibration;
pub mod cancel;
pub mod curve;
pub mod error;
pub mod settings;
pub mod spectrum;
pub mod uncertain;

pub use calibration::Calibration;
pub use cancel::CancelToken;
pub use curve::{Curve, CurveFunction, Effit, LogInverse, PolyLog, Polynomial, SqrtPoly};
pub use error::{Error, Result};
pub use settings::{AreaPolicy, FitSettings, HypermetTerms, ParamBounds, TermSettings};
pub use spectrum::{Histogram, Spectrum};
pub use uncertain::UncertainValue;
