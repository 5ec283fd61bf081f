//! gammafit-worker: Background fitting off the interactive path.
//!
//! One dedicated thread runs long fitter operations on a copy of the
//! caller's [`Fitter`](gammafit_algorithms::Fitter):
//! - single-flight dispatch: a second job while one runs is rejected
//! - cooperative cancellation checked between regions
//! - throttled progress messages
//!

mod error;
mod job;
mod message;
mod state;
mod worker;

pub use error::{Result, WorkerError};
pub use job::FitJob;
pub use message::WorkerMessage;
pub use state::WorkerState;
pub use worker::{FitWorker, IDLE_POLL, PROGRESS_INTERVAL};
