use crate::command::ShutdownMode;
use crate::config::{self, QueueConfig};
use crate::coordinator::QueueState;
use crate::error::{BuildError, SubmitError};
use crate::job::{Job, JobId};
use crate::metrics::MetricsSnapshot;
use crate::storage::{JobStorage, StorageBackend};
use crate::worker::{spawn_fixed_workers, WorkerPool};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{info, warn};

/// Builder for configuring and creating a [`JobQueue`].
///
/// # Example
///
/// ```no_run
/// use jobgate::{Job, JobQueue};
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let queue = JobQueue::builder()
///     .max_workers(8)
///     .on_job_error(|job, err| tracing::error!(job_id = ?job.id(), "{err:#}"))
///     .build_and_start()?;
///
/// queue.submit(
///     Job::builder()
///         .resource_key("invoices")
///         .action(|_job| async { Ok(()) })
///         .build(),
/// )?;
/// # Ok(())
/// # }
/// ```
pub struct QueueBuilder {
  config: QueueConfig,
  storage: Result<StorageBackend, crate::error::ConfigError>,
  predefined_jobs: Vec<Job>,
}

impl fmt::Debug for QueueBuilder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("QueueBuilder")
      .field("config", &self.config)
      .field("storage", &self.storage)
      .field("predefined_jobs", &self.predefined_jobs.len())
      .finish()
  }
}

impl Default for QueueBuilder {
  fn default() -> Self {
    Self {
      config: QueueConfig::default(),
      storage: Ok(StorageBackend::InMemory),
      predefined_jobs: Vec::new(),
    }
  }
}

impl QueueBuilder {
  /// Creates a builder with default settings:
  /// - `max_workers`: 4
  /// - `elastic_pool`: `true`
  /// - `queue_capacity`: 1024 (fixed pool only)
  /// - storage: in-memory
  pub fn new() -> Self {
    Self::default()
  }

  /// Maximum number of jobs executing at once. Must be greater than 0.
  pub fn max_workers(mut self, count: usize) -> Self {
    self.config.max_workers = count;
    self
  }

  /// `true` (default): one task per job, bounded by `max_workers`.
  /// `false`: `max_workers` long-lived workers fed through a bounded queue.
  pub fn elastic_pool(mut self, elastic: bool) -> Self {
    self.config.elastic_pool = elastic;
    self
  }

  /// Capacity of the fixed pool's dispatch queue.
  pub fn queue_capacity(mut self, capacity: usize) -> Self {
    self.config.queue_capacity = capacity;
    self
  }

  /// Stop the queue (gracefully) right after the admission pass run by `start`.
  pub fn single_execution(mut self, enabled: bool) -> Self {
    self.config.single_execution = enabled;
    self
  }

  /// Log every status transition at `info` instead of `debug`.
  pub fn debug(mut self, enabled: bool) -> Self {
    self.config.debug = enabled;
    self
  }

  /// Reads debug mode from `JOBGATE_DEBUG`.
  pub fn debug_from_env(mut self) -> Self {
    self.config.debug = config::debug_from_env();
    self
  }

  /// Error handler run before any job-local error handler of every submitted job.
  pub fn on_job_error<F>(mut self, handler: F) -> Self
  where
    F: Fn(&Job, &anyhow::Error) + Send + Sync + 'static,
  {
    self.config.on_job_error = Some(Arc::new(handler));
    self
  }

  pub fn storage(mut self, backend: StorageBackend) -> Self {
    self.storage = Ok(backend);
    self
  }

  /// Shorthand for `storage(StorageBackend::Custom(storage))`.
  pub fn custom_storage(self, storage: Arc<dyn JobStorage>) -> Self {
    self.storage(StorageBackend::Custom(storage))
  }

  /// Selects storage from `JOBGATE_STORAGE_MODE`. Resolution errors surface
  /// from [`QueueBuilder::build`].
  pub fn storage_from_env(mut self, custom: Option<Arc<dyn JobStorage>>) -> Self {
    self.storage = StorageBackend::from_env_with(custom);
    self
  }

  /// Jobs submitted while the queue is built, before it starts.
  pub fn predefined_jobs(mut self, jobs: impl IntoIterator<Item = Job>) -> Self {
    self.predefined_jobs.extend(jobs);
    self
  }

  /// Builds the queue without starting it. Submitted jobs stay pending until
  /// [`JobQueue::start`].
  ///
  /// Must be called within a Tokio runtime.
  ///
  /// # Errors
  ///
  /// - [`BuildError::ZeroMaxWorkers`] / [`BuildError::ZeroQueueCapacity`]
  /// - [`BuildError::NoRuntime`]: called outside a Tokio runtime.
  /// - [`BuildError::Config`]: storage selection failed.
  /// - [`BuildError::PredefinedJob`]: a predefined job was rejected.
  pub fn build(self) -> Result<JobQueue, BuildError> {
    let config = self.config;
    if config.max_workers == 0 {
      return Err(BuildError::ZeroMaxWorkers);
    }
    if !config.elastic_pool && config.queue_capacity == 0 {
      return Err(BuildError::ZeroQueueCapacity);
    }
    let storage = self.storage?.into_storage();
    let runtime = Handle::try_current().map_err(|_| BuildError::NoRuntime)?;

    let (shutdown_tx, shutdown_rx) = watch::channel::<Option<ShutdownMode>>(None);

    let (pool, dispatch_rx) = if config.elastic_pool {
      (WorkerPool::elastic(config.max_workers, runtime.clone()), None)
    } else {
      let (pool, rx) = WorkerPool::fixed(config.queue_capacity);
      (pool, Some(rx))
    };

    let max_workers = config.max_workers;
    let state = Arc::new(QueueState::new(
      config,
      storage,
      pool,
      runtime.clone(),
      shutdown_tx,
    ));

    if let Some(dispatch_rx) = dispatch_rx {
      let handles = spawn_fixed_workers(max_workers, &runtime, &state, dispatch_rx, shutdown_rx);
      state.worker_handles.lock().extend(handles);
    }

    let queue = JobQueue { state };
    for job in self.predefined_jobs {
      queue.submit(job)?;
    }
    Ok(queue)
  }

  /// [`QueueBuilder::build`] followed by [`JobQueue::start`].
  pub fn build_and_start(self) -> Result<JobQueue, BuildError> {
    let queue = self.build()?;
    queue.start();
    Ok(queue)
  }
}

/// An in-process job queue.
///
/// Runs submitted jobs on a bounded pool while never running two jobs with the
/// same resource key at once. Cloning gives another handle to the same queue.
///
/// Use [`JobQueue::builder()`] to create one.
#[derive(Debug, Clone)]
pub struct JobQueue {
  state: Arc<QueueState>,
}

impl JobQueue {
  pub fn builder() -> QueueBuilder {
    QueueBuilder::new()
  }

  // --- Lifecycle ---

  /// Starts admitting jobs. With `single_execution`, stops gracefully right
  /// after the first admission pass. Has no effect on a started queue.
  pub fn start(&self) {
    if !self.state.start() {
      warn!("Job queue already started.");
      return;
    }
    if self.state.config.single_execution {
      self.stop();
    }
  }

  pub fn is_started(&self) -> bool {
    self.state.is_started()
  }

  pub fn shutdown_mode(&self) -> Option<ShutdownMode> {
    self.state.shutdown_mode()
  }

  /// Stops admitting jobs from callers. In-flight jobs finish, and the jobs
  /// their completions unblock still run. Jobs left pending stay pending.
  pub fn stop(&self) {
    self.state.stop();
  }

  /// Aborts every in-flight action and cancels the running jobs. Returns how
  /// many jobs were cancelled.
  pub fn stop_now(&self) -> usize {
    self.state.stop_now()
  }

  /// Stops gracefully and waits up to `timeout` for in-flight work to end.
  /// Returns `true` if it ended in time.
  pub async fn stop_and_await(&self, timeout: Duration) -> bool {
    info!(?timeout, "Stopping job queue and waiting for in-flight jobs...");
    self.stop();
    match tokio::time::timeout(timeout, self.state.await_idle()).await {
      Ok(()) => {
        info!("Job queue stopped.");
        true
      }
      Err(_) => {
        warn!(?timeout, "Job queue did not become idle in time.");
        false
      }
    }
  }

  // --- Submission & cancellation ---

  /// Hands `job` to the queue and returns it.
  ///
  /// A job built with `defer_id` is held until [`Job::assign_id`]; any other
  /// job becomes `Initialized`, receives an identifier if it had none, and is
  /// considered by an admission pass right away.
  ///
  /// # Errors
  ///
  /// - [`JobStateError::JobIdAlreadyExists`](crate::JobStateError::JobIdAlreadyExists):
  ///   the job's chosen identifier is taken.
  /// - [`JobStateError::InvalidJobState`](crate::JobStateError::InvalidJobState):
  ///   the job was submitted before or has left `Created`.
  /// - [`SubmitError::StorageRejected`]: the storage backend refused the job.
  pub fn submit(&self, job: Job) -> Result<Job, SubmitError> {
    self.state.submit(job)
  }

  /// Cancels a running job of this queue, aborting its action.
  /// Returns `false` if the job is not running.
  pub fn cancel(&self, job: &Job) -> bool {
    self.state.cancel(job)
  }

  pub fn cancel_by_id(&self, id: JobId) -> bool {
    match self.state.storage.get_by_id(id) {
      Some(job) => self.state.cancel(&job),
      None => false,
    }
  }

  // --- Queries ---

  pub fn get_job_by_id(&self, id: JobId) -> Option<Job> {
    self.state.storage.get_by_id(id)
  }

  pub fn get_all_jobs(&self) -> Vec<Job> {
    self.state.storage.all()
  }

  pub fn get_pending_jobs(&self) -> Vec<Job> {
    self.state.storage.pending()
  }

  pub fn get_running_jobs(&self) -> Vec<Job> {
    self.state.storage.running()
  }

  pub fn get_finished_jobs(&self) -> Vec<Job> {
    self.state.storage.finished()
  }

  pub fn get_pending_jobs_by_resource(&self, key: &str) -> Vec<Job> {
    self.state.storage.pending_by_resource(key)
  }

  pub fn get_running_job_by_resource(&self, key: &str) -> Option<Job> {
    self.state.storage.running_by_resource(key)
  }

  pub fn get_finished_jobs_by_resource(&self, key: &str) -> Vec<Job> {
    self.state.storage.finished_by_resource(key)
  }

  pub fn get_last_added_job(&self) -> Option<Job> {
    self.state.storage.last_added()
  }

  pub fn get_last_finished_job(&self) -> Option<Job> {
    self.state.storage.last_finished()
  }

  /// Removes a job that is not running. A pending job is cancelled first.
  /// Returns `None` if the job is unknown or running.
  pub fn remove_job(&self, id: JobId) -> Option<Job> {
    self.state.remove(id)
  }

  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.state.metrics.snapshot()
  }
}
