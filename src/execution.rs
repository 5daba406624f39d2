//! The execution wrapper: runs a job's action once and drives its callbacks.

use crate::error::{ActionPanicked, ActionTimedOut, JobStateError};
use crate::job::callbacks::{contain, panic_message};
use crate::job::{Job, JobId, JobStatus};

#[cfg(feature = "job_context")]
use crate::job::context::{JobContext, CURRENT_JOB_CONTEXT};

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, warn};

/// How one execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
  Finished,
  Failed,
  Panicked,
  TimedOut,
  Canceled,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Execution {
  pub outcome: Outcome,
  pub duration: Duration,
}

/// Abort handles of the actions currently in flight, by job.
#[derive(Debug, Default)]
pub(crate) struct ExecutionHandles {
  handles: Mutex<HashMap<JobId, AbortHandle>>,
}

impl ExecutionHandles {
  fn register(&self, id: JobId, handle: AbortHandle) {
    self.handles.lock().insert(id, handle);
  }

  fn discard(&self, id: JobId) {
    self.handles.lock().remove(&id);
  }

  /// Aborts the action of `id`, if it is in flight.
  pub fn abort(&self, id: JobId) -> bool {
    match self.handles.lock().remove(&id) {
      Some(handle) => {
        handle.abort();
        true
      }
      None => false,
    }
  }

  pub fn abort_all(&self) -> usize {
    let drained: Vec<_> = self.handles.lock().drain().collect();
    for (_, handle) in &drained {
      handle.abort();
    }
    drained.len()
  }
}

impl Job {
  /// Runs this job on the current Tokio runtime, outside any queue, and waits
  /// for its callbacks to complete.
  ///
  /// The action itself never makes this call fail; its outcome is reported
  /// through [`Job::status`], [`Job::error`] and the callback chains.
  ///
  /// # Errors
  ///
  /// - [`JobStateError::AlreadyStarted`]: the job has a start time already.
  /// - [`JobStateError::InvalidJobState`]: the job belongs to a queue, which
  ///   alone decides when it runs, or it has been canceled.
  pub async fn start(&self) -> Result<(), JobStateError> {
    if self.is_submitted() {
      return Err(match self.started_at() {
        Some(started_at) => JobStateError::AlreadyStarted { started_at },
        None => JobStateError::InvalidJobState(format!(
          "job in status {} is owned by a queue and cannot be started directly",
          self.status()
        )),
      });
    }
    self.begin()?;
    drive(self, None).await;
    Ok(())
  }
}

/// Runs the action of a job already in `RunningAction`, then its success or
/// error chain, then its finalize chain.
pub(crate) async fn drive(job: &Job, handles: Option<&ExecutionHandles>) -> Execution {
  job.mark_started();
  let started = Instant::now();
  let action = job.action();
  let future = action(job.clone());

  #[cfg(feature = "job_context")]
  let task = {
    let context = JobContext {
      job_id: job.id(),
      resource_key: job.resource_key().map(str::to_owned),
      description: job.description().map(str::to_owned),
    };
    tokio::spawn(CURRENT_JOB_CONTEXT.scope(context, future))
  };
  #[cfg(not(feature = "job_context"))]
  let task = tokio::spawn(future);

  let abort = task.abort_handle();
  let registered = match (handles, job.id()) {
    (Some(handles), Some(id)) => {
      handles.register(id, abort.clone());
      Some((handles, id))
    }
    _ => None,
  };
  // A cancel that landed before registration found no handle to abort.
  if job.status() == JobStatus::Canceled {
    abort.abort();
  }

  let joined = match job.options().timeout {
    Some(limit) => match tokio::time::timeout(limit, task).await {
      Ok(joined) => Ok(joined),
      Err(_) => {
        abort.abort();
        Err(limit)
      }
    },
    None => Ok(task.await),
  };
  if let Some((handles, id)) = registered {
    handles.discard(id);
  }

  let result: Result<(), (anyhow::Error, Outcome)> = match joined {
    Ok(Ok(Ok(()))) => Ok(()),
    Ok(Ok(Err(err))) => Err((err, Outcome::Failed)),
    Ok(Err(join_err)) if join_err.is_panic() => {
      let message = panic_message(join_err.into_panic().as_ref());
      error!(job_id = ?job.id(), panic = %message, "Job action panicked.");
      Err((ActionPanicked { message }.into(), Outcome::Panicked))
    }
    Ok(Err(_cancelled)) => {
      debug!(job_id = ?job.id(), "Job action was aborted.");
      Err((
        anyhow::anyhow!("job action was aborted"),
        Outcome::Canceled,
      ))
    }
    Err(timeout) => {
      warn!(job_id = ?job.id(), ?timeout, "Job action timed out.");
      Err((ActionTimedOut { timeout }.into(), Outcome::TimedOut))
    }
  };

  let outcome = match result {
    Ok(()) => complete(job),
    Err((err, outcome)) => fail(job, err, outcome),
  };

  finalize(job);
  Execution {
    outcome,
    duration: started.elapsed(),
  }
}

fn complete(job: &Job) -> Outcome {
  if !job.set_status(JobStatus::RunningCallback) {
    return Outcome::Canceled;
  }
  let chain = job.callbacks().on_success;
  for callback in chain.iter() {
    contain(job, "on_success", || callback(job));
  }
  if job.set_status(JobStatus::Finished) {
    Outcome::Finished
  } else {
    Outcome::Canceled
  }
}

fn fail(job: &Job, err: anyhow::Error, outcome: Outcome) -> Outcome {
  if outcome == Outcome::Canceled || job.status() == JobStatus::Canceled {
    job.set_status(JobStatus::Canceled);
    return Outcome::Canceled;
  }
  let err = job.capture_error(err);
  if !job.set_status(JobStatus::Failed) {
    return Outcome::Canceled;
  }
  let chain = job.callbacks().on_error;
  for callback in chain.iter() {
    contain(job, "on_error", || callback(job, &*err));
  }
  outcome
}

/// Records the stop time and runs the finalize chain, at most once per job.
pub(crate) fn finalize(job: &Job) {
  if !job.mark_stopped() {
    return;
  }
  let chain = job.callbacks().on_finalize;
  for callback in chain.iter() {
    contain(job, "on_finalize", || callback(job));
  }
}
