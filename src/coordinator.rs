use crate::command::{DispatchContext, ShutdownMode, WorkerId};
use crate::config::{log_status_change, QueueConfig};
use crate::error::{JobStateError, SubmitError};
use crate::execution::{self, ExecutionHandles, Outcome};
use crate::job::{IdAssignmentHook, Job, JobCategory, JobId, JobStatus};
use crate::metrics::QueueMetrics;
use crate::storage::JobStorage;
use crate::worker::{job_span, PoolRejection, WorkerPool};

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn, Instrument};

/// State shared by every handle to one queue and by its executors.
pub(crate) struct QueueState {
  pub config: QueueConfig,
  pub storage: Arc<dyn JobStorage>,
  pub metrics: QueueMetrics,
  pub handles: ExecutionHandles,
  pub pool: WorkerPool,
  pub runtime: Handle,
  // Serializes admission with submission and id assignment. Pending jobs only
  // change status under it; running jobs are never transitioned while it is
  // held, since their status listeners may submit.
  admission_lock: ReentrantMutex<()>,
  // Set when a caller's pass stopped on a saturated pool.
  admission_retry: AtomicBool,
  started: AtomicBool,
  pub shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  // Jobs admitted whose execution has not ended yet.
  in_flight: watch::Sender<usize>,
  pub worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for QueueState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueState")
      .field("config", &self.config)
      .field("storage", &self.storage)
      .field("pool", &self.pool)
      .field("started", &self.started.load(AtomicOrdering::Relaxed))
      .field("shutdown", &*self.shutdown_tx.borrow())
      .field("in_flight", &*self.in_flight.borrow())
      .finish()
  }
}

impl QueueState {
  pub fn new(
    config: QueueConfig,
    storage: Arc<dyn JobStorage>,
    pool: WorkerPool,
    runtime: Handle,
    shutdown_tx: watch::Sender<Option<ShutdownMode>>,
  ) -> Self {
    Self {
      config,
      storage,
      metrics: QueueMetrics::new(),
      handles: ExecutionHandles::default(),
      pool,
      runtime,
      admission_lock: ReentrantMutex::new(()),
      admission_retry: AtomicBool::new(false),
      started: AtomicBool::new(false),
      shutdown_tx,
      in_flight: watch::channel(0).0,
      worker_handles: Mutex::new(Vec::new()),
    }
  }

  pub fn shutdown_mode(&self) -> Option<ShutdownMode> {
    *self.shutdown_tx.borrow()
  }

  pub fn is_started(&self) -> bool {
    self.started.load(AtomicOrdering::SeqCst)
  }

  // --- Submission ---

  pub fn submit(self: &Arc<Self>, job: Job) -> Result<Job, SubmitError> {
    let _admission = self.admission_lock.lock();

    let status = job.status();
    if !matches!(status, JobStatus::Created | JobStatus::WaitingForId) {
      return Err(
        JobStateError::InvalidJobState(format!("cannot submit a job in status {}", status)).into(),
      );
    }
    if let Some(id) = job.id() {
      if self.storage.contains(id) {
        return Err(JobStateError::JobIdAlreadyExists(id).into());
      }
    }
    if !job.mark_submitted() {
      return Err(JobStateError::InvalidJobState("job was already submitted".to_string()).into());
    }

    if let Some(handler) = &self.config.on_job_error {
      job.prepend_on_error_arc(handler.clone());
    }
    let storage = Arc::downgrade(&self.storage);
    let debug = self.config.debug;
    job.prepend_on_status_change(move |job| {
      log_status_change(debug, job);
      if let Some(storage) = storage.upgrade() {
        if job.status().category().is_some() && storage.upsert(job).is_none() {
          warn!(job_id = ?job.id(), status = %job.status(), "Storage did not accept job update.");
        }
      }
    });
    QueueMetrics::incr(&self.metrics.jobs_submitted);

    if status == JobStatus::WaitingForId {
      let queue = Arc::downgrade(self);
      let hook: IdAssignmentHook = Arc::new(move |job: &Job, id: JobId| match queue.upgrade() {
        Some(queue) => queue.complete_deferred(job, id),
        None => Err(JobStateError::InvalidJobState(
          "the queue owning this job has been dropped".to_string(),
        )),
      });
      job.install_id_hook(hook);
      debug!(description = ?job.description(), "Job queued until an ID is assigned.");
      return Ok(job);
    }

    job.set_status(JobStatus::Initialized);
    match job.id() {
      Some(id) if self.storage.contains(id) => {}
      _ => {
        job.set_status(JobStatus::Canceled);
        execution::finalize(&job);
        return Err(SubmitError::StorageRejected(format!("{:?}", job.id())));
      }
    }
    debug!(job_id = ?job.id(), resource_key = ?job.resource_key(), "Job submitted.");

    self.arm_pending_timeout(&job);
    self.admission_pass(DispatchContext::Caller);
    Ok(job)
  }

  fn complete_deferred(self: &Arc<Self>, job: &Job, id: JobId) -> Result<(), JobStateError> {
    let _admission = self.admission_lock.lock();
    if self.storage.contains(id) {
      return Err(JobStateError::JobIdAlreadyExists(id));
    }
    job.commit_deferred_id(id)?;
    if !self.storage.contains(id) {
      warn!(job_id = id, "Storage did not accept job after ID assignment.");
    }
    debug!(job_id = id, "Deferred job received its ID.");
    self.arm_pending_timeout(job);
    self.admission_pass(DispatchContext::Caller);
    Ok(())
  }

  /// Cancels `job` if it is still pending once its timeout elapses.
  fn arm_pending_timeout(self: &Arc<Self>, job: &Job) {
    let Some(limit) = job.options().timeout else {
      return;
    };
    let queue = Arc::downgrade(self);
    let job = job.clone();
    self.runtime.spawn(async move {
      tokio::time::sleep(limit).await;
      if let Some(queue) = queue.upgrade() {
        queue.expire_pending(&job, limit);
      }
    });
  }

  fn expire_pending(&self, job: &Job, limit: Duration) {
    let expired = {
      let _admission = self.admission_lock.lock();
      job.status().is_pending_and_ready() && job.set_status(JobStatus::Canceled)
    };
    if expired {
      info!(job_id = ?job.id(), ?limit, "Pending job timed out before it could run.");
      QueueMetrics::incr(&self.metrics.jobs_timed_out);
      QueueMetrics::incr(&self.metrics.jobs_cancelled);
      execution::finalize(job);
    }
  }

  // --- Lifecycle ---

  /// Returns `false` if the queue was already started.
  pub fn start(self: &Arc<Self>) -> bool {
    if self.started.swap(true, AtomicOrdering::SeqCst) {
      return false;
    }
    info!(
      max_workers = self.config.max_workers,
      elastic = self.config.elastic_pool,
      "Job queue started."
    );
    self.admission_pass(DispatchContext::Caller);
    true
  }

  pub fn stop(&self) {
    let requested = self.shutdown_tx.send_if_modified(|mode| {
      if mode.is_none() {
        *mode = Some(ShutdownMode::Graceful);
        true
      } else {
        false
      }
    });
    if requested {
      info!("Graceful stop requested.");
      self.pool.close();
    }
  }

  pub fn stop_now(&self) -> usize {
    let running = {
      // Once Force is visible under the lock, no pass admits anything else.
      let _admission = self.admission_lock.lock();
      self.shutdown_tx.send_replace(Some(ShutdownMode::Force));
      self.pool.close();
      self.storage.running()
    };
    let aborted = self.handles.abort_all();
    let mut cancelled = 0;
    for job in running {
      if job.set_status(JobStatus::Canceled) {
        QueueMetrics::incr(&self.metrics.jobs_cancelled);
        cancelled += 1;
      }
    }
    warn!(aborted, cancelled, "Forced stop: in-flight jobs cancelled.");
    cancelled
  }

  /// Waits until no admitted job is left executing and the fixed workers exit.
  pub async fn await_idle(&self) {
    let mut in_flight = self.in_flight.subscribe();
    // The sender lives in `self`, so this only errs if `self` is gone.
    let _ = in_flight.wait_for(|n| *n == 0).await;

    let workers = std::mem::take(&mut *self.worker_handles.lock());
    if let Err(e) = futures::future::try_join_all(workers).await {
      warn!(error = %e, "A worker task ended abnormally.");
    }
  }

  // --- Cancellation ---

  /// Cancels a job in the running category. Returns `false` for any other job.
  pub fn cancel(self: &Arc<Self>, job: &Job) -> bool {
    let Some(id) = job.id() else {
      return false;
    };
    let running = {
      let _admission = self.admission_lock.lock();
      let owned = self
        .storage
        .get_by_id(id)
        .map(|stored| stored.ptr_eq(job))
        .unwrap_or(false);
      owned && self.storage.category_of(id) == Some(JobCategory::Running)
    };
    // A running job never returns to pending, so the decision holds after the
    // lock is released. The worker may still finish it first.
    if !running || !job.set_status(JobStatus::Canceled) {
      return false;
    }
    QueueMetrics::incr(&self.metrics.jobs_cancelled);
    let aborted = self.handles.abort(id);
    info!(job_id = id, aborted, "Job cancelled.");
    self.admission_pass(DispatchContext::Caller);
    true
  }

  /// Removes a job that is not running, cancelling it first if pending.
  pub fn remove(&self, id: JobId) -> Option<Job> {
    let (removed, cancelled) = {
      let _admission = self.admission_lock.lock();
      let job = self.storage.get_by_id(id)?;
      let cancelled = match self.storage.category_of(id) {
        Some(JobCategory::Running) => {
          debug!(job_id = id, "Refusing to remove a running job.");
          return None;
        }
        Some(JobCategory::Pending) => job.set_status(JobStatus::Canceled),
        _ => false,
      };
      (self.storage.remove(id), cancelled.then_some(job))
    };
    if let Some(job) = cancelled {
      QueueMetrics::incr(&self.metrics.jobs_cancelled);
      execution::finalize(&job);
    }
    removed
  }

  // --- Admission ---

  /// One sweep over the pending jobs, in insertion order.
  ///
  /// Returns the jobs the calling worker must run itself. In `Caller` context
  /// this is always empty.
  pub fn admission_pass(self: &Arc<Self>, ctx: DispatchContext) -> Vec<Job> {
    let _admission = self.admission_lock.lock();

    if !self.is_started() {
      trace!("Queue not started; admission skipped.");
      return Vec::new();
    }
    match (self.shutdown_mode(), ctx) {
      (Some(ShutdownMode::Force), _) => return Vec::new(),
      (Some(ShutdownMode::Graceful), DispatchContext::Caller) => {
        debug!("Queue is stopping; admission from callers is closed.");
        return Vec::new();
      }
      _ => {}
    }

    let mut inline = Vec::new();
    for job in self.storage.pending_ready() {
      if let Some(key) = job.resource_key() {
        if !self.storage.is_resource_free(key) {
          job.set_status(JobStatus::WaitingForResource);
          QueueMetrics::incr(&self.metrics.resource_waits);
          trace!(job_id = ?job.id(), resource_key = key, "Resource busy.");
          continue;
        }
      }

      let slot = if ctx.is_worker() && inline.is_empty() {
        None
      } else {
        match self.pool.try_reserve() {
          Ok(slot) => Some(slot),
          Err(rejection) if ctx.is_worker() => {
            trace!(?rejection, "Pool rejected job; running it inline.");
            None
          }
          Err(rejection) => {
            QueueMetrics::incr(&self.metrics.dispatch_rejected);
            match rejection {
              PoolRejection::Saturated => {
                self.admission_retry.store(true, AtomicOrdering::SeqCst);
                debug!(job_id = ?job.id(), "Worker pool is saturated; admission pass aborted.")
              }
              PoolRejection::Closed => {
                warn!(job_id = ?job.id(), "Worker pool is closed; admission pass aborted.")
              }
            }
            break;
          }
        }
      };

      if let Err(e) = job.claim() {
        warn!(job_id = ?job.id(), error = %e, "Pending job could not be started.");
        continue;
      }
      QueueMetrics::incr(&self.metrics.jobs_admitted);
      self.in_flight.send_modify(|n| *n += 1);

      match slot {
        Some(slot) => slot.dispatch(self, job),
        None => inline.push(job),
      }
    }
    inline
  }

  /// Re-runs a caller pass that a saturated pool cut short. Called by a worker
  /// after it has given its slot back.
  pub fn resume_admission(self: &Arc<Self>) {
    let _admission = self.admission_lock.lock();
    if self.admission_retry.swap(false, AtomicOrdering::SeqCst) {
      trace!("Retrying admission after a saturated pass.");
      self.admission_pass(DispatchContext::Caller);
    }
  }

  // --- Execution ---

  /// Runs `first`, then every job the following admission passes hand back to
  /// this worker.
  pub async fn execute_chain(self: &Arc<Self>, first: Job, worker_id: WorkerId) {
    let mut queue = VecDeque::from([first]);
    let mut chained = false;
    while let Some(job) = queue.pop_front() {
      if chained {
        QueueMetrics::incr(&self.metrics.inline_executions);
      }
      let span = job_span(worker_id, &job);
      self.execute_one(&job).instrument(span).await;

      queue.extend(self.admission_pass(DispatchContext::Worker(worker_id)));
      // Released after the pass so the count never reads zero while this
      // chain still has work to pick up.
      self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
      chained = true;
    }
  }

  async fn execute_one(&self, job: &Job) {
    if self.shutdown_mode() == Some(ShutdownMode::Force) && job.set_status(JobStatus::Canceled) {
      QueueMetrics::incr(&self.metrics.jobs_cancelled);
    }
    if job.status().is_terminal() {
      debug!(job_id = ?job.id(), status = %job.status(), "Skipping job that ended before it ran.");
      execution::finalize(job);
      return;
    }

    let active = &self.metrics.workers_active_current;
    active.fetch_add(1, AtomicOrdering::Relaxed);
    debug!("Starting job execution.");
    let run = execution::drive(job, Some(&self.handles)).await;
    active.fetch_sub(1, AtomicOrdering::Relaxed);

    self.metrics.job_execution_duration.record(run.duration);
    let m = &self.metrics;
    match run.outcome {
      Outcome::Finished => QueueMetrics::incr(&m.jobs_finished),
      Outcome::Failed => QueueMetrics::incr(&m.jobs_failed),
      Outcome::Panicked => {
        QueueMetrics::incr(&m.jobs_failed);
        QueueMetrics::incr(&m.jobs_panicked);
      }
      Outcome::TimedOut => {
        QueueMetrics::incr(&m.jobs_failed);
        QueueMetrics::incr(&m.jobs_timed_out);
      }
      Outcome::Canceled => {}
    }
    debug!(
      duration_ms = run.duration.as_millis() as u64,
      outcome = ?run.outcome,
      status = %job.status(),
      "Finished job execution."
    );
  }

  /// Ends an admitted job that will never run.
  pub fn abandon(&self, job: &Job) {
    if !job.status().is_terminal() && job.set_status(JobStatus::Canceled) {
      QueueMetrics::incr(&self.metrics.jobs_cancelled);
    }
    execution::finalize(job);
    self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
  }
}
