#![allow(clippy::uninlined_format_args)]
use std::time::Duration;

use approx::assert_abs_diff_eq;
use gammafit_algorithms::{Fitter, RoiState};
use gammafit_core::{FitSettings, Spectrum};
use gammafit_worker::{FitJob, FitWorker, WorkerError, WorkerMessage, WorkerState};

const SHAPE: [f64; 7] = [5.0, 20.0, 80.0, 200.0, 80.0, 20.0, 5.0];

/// `n` separated peaks on a flat background, 70 channels apart.
fn comb(n: usize) -> Fitter {
    let mut counts = vec![3.0; 70 * n + 40];
    for k in 0..n {
        let start = 40 + 70 * k;
        for (i, v) in SHAPE.iter().enumerate() {
            counts[start + i] += v;
        }
    }
    let mut fitter = Fitter::new(FitSettings::default());
    fitter.set_data(&Spectrum::new(counts).unwrap());
    fitter
}

fn expect_complete(message: WorkerMessage) -> (WorkerState, Fitter, bool) {
    match message {
        WorkerMessage::Complete {
            kind,
            fitter,
            cancelled,
            ..
        } => (kind, *fitter, cancelled),
        other => panic!("expected Complete, got {:?}", other),
    }
}

#[test]
fn test_fit_job_completes() {
    let worker = FitWorker::spawn().unwrap();
    let fitter = comb(1);
    worker.submit(&fitter, FitJob::Fit).unwrap();
    assert!(worker.is_busy());

    let (kind, result, cancelled) = expect_complete(worker.wait(|_, _| {}).unwrap());
    assert_eq!(kind, WorkerState::Fit);
    assert!(!cancelled);
    assert_eq!(result.peak_count(), 1);
    assert_abs_diff_eq!(result.peaks().keys().next().unwrap().0, 43.0, epsilon = 1.0);

    // the submitted fitter is a snapshot and stays untouched
    assert!(fitter.regions().is_empty());
    assert!(!worker.is_busy());
}

#[test]
fn test_second_submit_is_rejected_while_busy() {
    let worker = FitWorker::spawn().unwrap();
    let fitter = comb(5);
    worker.submit(&fitter, FitJob::Fit).unwrap();

    let err = worker.submit(&fitter, FitJob::Refit { roi: 0 }).unwrap_err();
    assert!(matches!(err, WorkerError::Busy(WorkerState::Fit)), "{}", err);

    // the first job runs to completion unaffected
    let (kind, result, cancelled) = expect_complete(worker.wait(|_, _| {}).unwrap());
    assert_eq!(kind, WorkerState::Fit);
    assert!(!cancelled);
    assert_eq!(result.regions().len(), 5);
    assert_eq!(result.peak_count(), 5);

    // accepted again once the result was taken
    let key = *result.regions().keys().next().unwrap();
    worker.submit(&result, FitJob::Refit { roi: key }).unwrap();
    let (kind, _, _) = expect_complete(worker.wait(|_, _| {}).unwrap());
    assert_eq!(kind, WorkerState::Refit);
}

#[test]
fn test_cancel_keeps_partial_results() {
    let worker = FitWorker::spawn().unwrap();
    let fitter = comb(40);
    worker.submit(&fitter, FitJob::Fit).unwrap();
    worker.cancel();

    let (_, result, cancelled) = expect_complete(worker.wait(|_, _| {}).unwrap());
    assert!(cancelled);
    let fitted = result
        .regions()
        .values()
        .filter(|r| matches!(r.state(), RoiState::HasPeaks(_)))
        .count();
    assert!(fitted < 40, "fitted {} regions", fitted);
}

#[test]
fn test_no_result_for_unknown_region() {
    let worker = FitWorker::spawn().unwrap();
    worker
        .submit(&comb(1), FitJob::Refit { roi: 10_000 })
        .unwrap();
    match worker.wait(|_, _| {}).unwrap() {
        WorkerMessage::NoResult { kind, .. } => assert_eq!(kind, WorkerState::Refit),
        other => panic!("expected NoResult, got {:?}", other),
    }
    assert!(!worker.is_busy());
}

#[test]
fn test_idle_worker_polls_quietly() {
    let worker = FitWorker::spawn().unwrap();
    assert_eq!(worker.state(), WorkerState::Idle);
    assert!(worker.recv_timeout(Duration::from_millis(120)).unwrap().is_none());
    assert!(worker.try_recv().unwrap().is_none());
}
