//! Background validation worker.
//!
//! In deferred mode the writer mutates state and emits lines on the
//! caller's thread and hands each [`Check`] snapshot to a single worker
//! thread over a FIFO channel. The worker owns its own copy of the policy;
//! policy changes travel down the same channel so they apply in order.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use knit_policy::{ConstraintLimits, Diagnostic, DiagnosticLog, ExceptionPolicy, PolicyError, Severity};
use tracing::{debug, warn};

use crate::checks::Check;
use crate::error::{KnitError, KnitResult};

const WORKER_NAME: &str = "knitout-validator";

#[derive(Debug)]
enum Job {
    Check { line: usize, check: Check },
    Reconfigure {
        policy: ExceptionPolicy,
        limits: ConstraintLimits,
    },
    Shutdown,
}

/// What the worker saw by the time it shut down.
#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    /// Checks evaluated
    pub checks: usize,
    /// Error-grade violations, in submission order
    pub failures: Vec<Diagnostic>,
}

/// Handle to the validation thread.
pub struct ValidationWorker {
    sender: Sender<Job>,
    handle: Option<JoinHandle<WorkerReport>>,
}

impl ValidationWorker {
    /// Start the worker. Diagnostics are recorded into `log`.
    pub fn spawn(
        policy: ExceptionPolicy,
        limits: ConstraintLimits,
        log: DiagnosticLog,
    ) -> KnitResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(WORKER_NAME.to_owned())
            .spawn(move || run_worker_loop(receiver, policy, limits, log))
            .map_err(|error| KnitError::Worker(format!("failed to spawn validation worker: {error}")))?;
        debug!("validation worker started");

        Ok(Self {
            sender,
            handle: Some(handle),
        })
    }

    fn send(&self, job: Job) -> KnitResult<()> {
        self.sender
            .send(job)
            .map_err(|_| KnitError::Worker("validation worker has stopped".to_string()))
    }

    /// Queue a check for the operation on `line`.
    pub fn submit(&self, line: usize, check: Check) -> KnitResult<()> {
        self.send(Job::Check { line, check })
    }

    /// Swap the policy and limits for every check queued after this call.
    pub fn reconfigure(&self, policy: ExceptionPolicy, limits: ConstraintLimits) -> KnitResult<()> {
        self.send(Job::Reconfigure { policy, limits })
    }

    /// Drain the queue, stop the worker and wait for it to exit.
    pub fn finish(mut self) -> KnitResult<WorkerReport> {
        // a failed send means the worker already exited; join still reports it
        let _ = self.sender.send(Job::Shutdown);
        let handle = self
            .handle
            .take()
            .ok_or_else(|| KnitError::Worker("validation worker already joined".to_string()))?;
        handle
            .join()
            .map_err(|_| KnitError::Worker("validation worker panicked".to_string()))
    }
}

impl Drop for ValidationWorker {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.sender.send(Job::Shutdown);
            if let Err(error) = handle.join() {
                warn!(?error, "validation worker panicked during shutdown");
            }
        }
    }
}

fn run_worker_loop(
    receiver: Receiver<Job>,
    mut policy: ExceptionPolicy,
    mut limits: ConstraintLimits,
    log: DiagnosticLog,
) -> WorkerReport {
    let mut report = WorkerReport::default();

    while let Ok(job) = receiver.recv() {
        match job {
            Job::Check { line, check } => {
                report.checks += 1;
                if let Err(PolicyError::ConstraintViolated { line, violation }) =
                    policy.enforce(line, check.evaluate(&limits), &log)
                {
                    report
                        .failures
                        .push(Diagnostic::new(line, Severity::Error, violation));
                }
            }
            Job::Reconfigure {
                policy: next_policy,
                limits: next_limits,
            } => {
                policy = next_policy;
                limits = next_limits;
            }
            Job::Shutdown => break,
        }
    }

    debug!(
        checks = report.checks,
        failures = report.failures.len(),
        "validation worker finished"
    );
    report
}
