//! The worker thread and its submitting handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use gammafit_algorithms::Fitter;
use gammafit_core::CancelToken;
use log::{debug, info, warn};

use crate::error::{Result, WorkerError};
use crate::{FitJob, WorkerMessage, WorkerState};

/// How long the idle worker sleeps between shutdown checks.
pub const IDLE_POLL: Duration = Duration::from_millis(50);

/// Minimum wall-clock time between two progress messages.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

struct Request {
    fitter: Fitter,
    job: FitJob,
}

/// State shared between the handle and the worker thread.
#[derive(Default)]
struct Shared {
    state: Mutex<WorkerState>,
    shutdown: AtomicBool,
}

impl Shared {
    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a dedicated fitting thread.
///
/// At most one job is in flight. A job counts as in flight from
/// [`submit`](Self::submit) until its terminal message has been received
/// through this handle, so a second submit in between is rejected with
/// [`WorkerError::Busy`] and never queued.
pub struct FitWorker {
    jobs: Option<Sender<Request>>,
    messages: Receiver<WorkerMessage>,
    in_flight: Mutex<Option<WorkerState>>,
    cancel: CancelToken,
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl FitWorker {
    /// Starts the worker thread.
    ///
    /// # Errors
    /// Fails when the thread cannot be spawned.
    pub fn spawn() -> Result<Self> {
        let (job_tx, job_rx) = channel::<Request>();
        let (msg_tx, msg_rx) = channel::<WorkerMessage>();
        let shared = Arc::new(Shared::default());
        let cancel = CancelToken::new();

        let handle = {
            let shared = Arc::clone(&shared);
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("gammafit-worker".to_string())
                .spawn(move || run_worker(&job_rx, &msg_tx, &shared, &cancel))?
        };
        debug!("fit worker started");

        Ok(Self {
            jobs: Some(job_tx),
            messages: msg_rx,
            in_flight: Mutex::new(None),
            cancel,
            shared,
            handle: Some(handle),
        })
    }

    /// Hands a copy of `fitter` and `job` to the worker.
    ///
    /// # Errors
    /// [`WorkerError::Busy`] while another job is in flight,
    /// [`WorkerError::Disconnected`] when the thread has exited.
    pub fn submit(&self, fitter: &Fitter, job: FitJob) -> Result<()> {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = *in_flight {
            warn!("rejected {} job: {running} job in flight", job.state());
            return Err(WorkerError::Busy(running));
        }
        let jobs = self.jobs.as_ref().ok_or(WorkerError::Disconnected)?;
        let kind = job.state();
        self.cancel.reset();
        jobs.send(Request {
            fitter: fitter.clone(),
            job,
        })
        .map_err(|_| WorkerError::Disconnected)?;
        *in_flight = Some(kind);
        debug!("submitted {kind} job");
        Ok(())
    }

    /// Requests cancellation of the running job.
    ///
    /// Batch fits stop before the next region; a single-region job is not
    /// interrupted once its solve started.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether a submitted job has not delivered its terminal message yet.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// What the worker thread is doing right now.
    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.shared.state()
    }

    fn observe(&self, message: WorkerMessage) -> WorkerMessage {
        if message.is_terminal() {
            *self
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = None;
        }
        message
    }

    /// Next pending message, if any.
    ///
    /// # Errors
    /// [`WorkerError::Disconnected`] when the thread has exited.
    pub fn try_recv(&self) -> Result<Option<WorkerMessage>> {
        match self.messages.try_recv() {
            Ok(message) => Ok(Some(self.observe(message))),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Waits up to `timeout` for the next message.
    ///
    /// # Errors
    /// [`WorkerError::Disconnected`] when the thread has exited.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerMessage>> {
        match self.messages.recv_timeout(timeout) {
            Ok(message) => Ok(Some(self.observe(message))),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Blocks until the in-flight job ends, passing progress to
    /// `on_progress`, and returns its terminal message.
    ///
    /// # Errors
    /// [`WorkerError::Disconnected`] when the thread has exited.
    pub fn wait(&self, mut on_progress: impl FnMut(f32, &str)) -> Result<WorkerMessage> {
        loop {
            let message = self
                .messages
                .recv()
                .map_err(|_| WorkerError::Disconnected)?;
            match self.observe(message) {
                WorkerMessage::Progress(fraction, text) => on_progress(fraction, &text),
                terminal => return Ok(terminal),
            }
        }
    }
}

impl Drop for FitWorker {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.cancel.cancel();
        self.jobs = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("fit worker panicked");
            }
        }
        debug!("fit worker stopped");
    }
}

fn run_worker(
    jobs: &Receiver<Request>,
    tx: &Sender<WorkerMessage>,
    shared: &Shared,
    cancel: &CancelToken,
) {
    while !shared.shutdown.load(Ordering::Acquire) {
        match jobs.recv_timeout(IDLE_POLL) {
            Ok(request) => {
                let kind = request.job.state();
                shared.set_state(kind);
                let message = run_job(request, tx, cancel);
                shared.set_state(WorkerState::Idle);
                if tx.send(message).is_err() {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn run_job(request: Request, tx: &Sender<WorkerMessage>, cancel: &CancelToken) -> WorkerMessage {
    let Request { mut fitter, job } = request;
    let kind = job.state();
    let start = Instant::now();

    let changed = if matches!(job, FitJob::Fit) {
        run_batch(&mut fitter, tx, cancel)
    } else {
        job.apply(&mut fitter, cancel)
    };
    let cancelled = cancel.is_cancelled();

    if !changed && !cancelled {
        info!("{kind} job produced no usable result");
        return WorkerMessage::NoResult {
            kind,
            reason: format!("{kind} produced no usable result"),
        };
    }
    info!(
        "{kind} job finished in {:.1?}{}",
        start.elapsed(),
        if cancelled { " (cancelled)" } else { "" }
    );
    WorkerMessage::Complete {
        kind,
        fitter: Box::new(fitter),
        elapsed: start.elapsed(),
        cancelled,
    }
}

fn run_batch(fitter: &mut Fitter, tx: &Sender<WorkerMessage>, cancel: &CancelToken) -> bool {
    fitter.find_regions(cancel);
    let mut last_update = Instant::now();
    let fitted = fitter.auto_fit(cancel, |progress| {
        if last_update.elapsed() > PROGRESS_INTERVAL {
            let fraction = progress.fraction();
            let _ = tx.send(WorkerMessage::Progress(
                fraction,
                format!(
                    "Fitting region {} of {}... {:.0}%",
                    progress.completed,
                    progress.total,
                    fraction * 100.0
                ),
            ));
            last_update = Instant::now();
        }
    });
    fitted > 0
}
